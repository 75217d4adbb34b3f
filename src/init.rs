use crate::config::{AdapterConfig, Config};
use crate::providers::binary_available;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use walkdir::WalkDir;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

pub async fn ensure_directories(config: &Config) -> Result<()> {
    let dir = &config.download_dir;
    if fs::metadata(dir).await.is_err() {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create dir {}", dir.display()))?;
        logi(format!("Created directory: {}", dir.display()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCheck {
    pub provider: String,
    pub binary: String,
    pub available: bool,
}

/// Probes every subprocess-backed provider's binary. Missing tools are only
/// logged; their providers fail at call time like any other provider.
pub async fn check_tools(config: &Config) -> Vec<ToolCheck> {
    let mut checks = Vec::new();
    for section in config.capabilities.values() {
        for provider in section.providers.iter().filter(|p| p.enabled) {
            let (binary, flag) = match &provider.adapter {
                AdapterConfig::YtDlp { binary, .. } => (binary, "--version"),
                AdapterConfig::Ffmpeg { binary } => (binary, "-version"),
                _ => continue,
            };
            let available = binary_available(binary, flag).await;
            if available {
                logok(format!("{} found ({})", binary, provider.name));
            } else {
                logw(format!("{} not found; provider {} will fail", binary, provider.name));
            }
            checks.push(ToolCheck { provider: provider.name.clone(), binary: binary.clone(), available });
        }
    }
    checks
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_count: usize,
    pub deleted_bytes: u64,
    pub deleted: Vec<PathBuf>,
}

/// Deletes regular files directly inside `dir` whose modification time is
/// older than `older_than_days`. A missing directory is not an error.
pub async fn cleanup_downloads(dir: &Path, older_than_days: u64) -> Result<CleanupReport> {
    let max_age = Duration::from_secs(older_than_days.saturating_mul(SECS_PER_DAY));
    cleanup_older_than(dir, max_age).await
}

pub(crate) async fn cleanup_older_than(dir: &Path, max_age: Duration) -> Result<CleanupReport> {
    if fs::metadata(dir).await.is_err() {
        return Ok(CleanupReport::default());
    }

    let dir = dir.to_owned();
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let stale = tokio::task::spawn_blocking(move || -> Result<Vec<(PathBuf, u64)>> {
        let mut stale = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("read dir {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = entry.metadata()?;
            let modified = meta.modified().unwrap_or(SystemTime::now());
            if modified <= cutoff {
                stale.push((entry.into_path(), meta.len()));
            }
        }
        Ok(stale)
    })
    .await??;

    let mut report = CleanupReport::default();
    for (path, size) in stale {
        match fs::remove_file(&path).await {
            Ok(()) => {
                logi(format!("Removed old file: {}", path.display()));
                report.deleted_count += 1;
                report.deleted_bytes += size;
                report.deleted.push(path);
            }
            Err(err) => logw(format!("Failed to remove {}: {}", path.display(), err)),
        }
    }

    logok(format!(
        "Cleanup removed {} file(s) ({:.1} MB)",
        report.deleted_count,
        report.deleted_bytes as f64 / 1024.0 / 1024.0
    ));
    Ok(report)
}
