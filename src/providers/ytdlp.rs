use super::run_cmd;
use crate::error::AdapterError;
use crate::models::{DownloadRequest, DownloadResult};
use crate::platform::Platform;
use crate::registry::Provider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;

const TITLE_MARKER: &str = "TITLE:";
const DEFAULT_FORMAT: &str = "bv*[ext=mp4]+ba[ext=m4a]/b[ext=mp4]/b";

fn output_patterns() -> Result<&'static [Regex; 3]> {
    static PATTERNS: OnceCell<[Regex; 3]> = OnceCell::new();
    PATTERNS.get_or_try_init(|| {
        Ok([
            Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#)
                .context("failed to compile merger regex")?,
            Regex::new(r#"^\[(?:download|ExtractAudio)\] Destination: (.+)$"#)
                .context("failed to compile destination regex")?,
            Regex::new(r#"^\[download\] (.+) has already been downloaded$"#)
                .context("failed to compile already-downloaded regex")?,
        ])
    })
}

/// Downloads through the `yt-dlp` binary. Instagram is not in the default
/// platform set; it needs cookies that most installs do not have.
pub struct YtDlpDownloader {
    name: String,
    binary: String,
    platforms: Vec<Platform>,
    proxy: Option<String>,
    cookies_path: Option<PathBuf>,
}

impl YtDlpDownloader {
    pub const DEFAULT_PLATFORMS: [Platform; 5] = [
        Platform::Youtube,
        Platform::Tiktok,
        Platform::Facebook,
        Platform::Twitter,
        Platform::Unknown,
    ];

    pub fn new(name: impl Into<String>, binary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            platforms: Self::DEFAULT_PLATFORMS.to_vec(),
            proxy: None,
            cookies_path: None,
        }
    }

    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies(mut self, cookies_path: Option<PathBuf>) -> Self {
        self.cookies_path = cookies_path;
        self
    }

    fn build_args(&self, request: &DownloadRequest) -> Vec<String> {
        let template = request.output_dir.join("%(id)s.%(ext)s");
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--restrict-filenames".to_string(),
            "--no-simulate".to_string(),
            "--print".to_string(),
            format!("before_dl:{}%(title)s", TITLE_MARKER),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "-o".to_string(),
            template.display().to_string(),
        ];

        if request.audio_only {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push("mp3".to_string());
        } else {
            let format = request.format.as_deref().unwrap_or(DEFAULT_FORMAT);
            args.push("-f".to_string());
            args.push(format.to_string());
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }

        if let Some(path) = &self.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.display().to_string());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(request.url.clone());
        args
    }
}

/// Pulls the title and the final file path out of yt-dlp stdout.
pub(crate) fn parse_output(stdout: &str) -> Result<(Option<String>, Option<PathBuf>)> {
    let patterns = output_patterns()?;
    let mut title = None;
    let mut path = None;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(t) = line.strip_prefix(TITLE_MARKER) {
            title = Some(t.to_string());
            continue;
        }
        let captured = patterns
            .iter()
            .find_map(|re| re.captures(line).and_then(|c| c.get(1)))
            .map(|m| m.as_str().to_string());
        match captured {
            Some(p) => path = Some(PathBuf::from(p)),
            None if !line.starts_with('[') && Path::new(line).extension().is_some() => {
                path = Some(PathBuf::from(line));
            }
            None => {}
        }
    }

    Ok((title, path))
}

#[async_trait]
impl Provider<DownloadRequest, DownloadResult> for YtDlpDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, request: &DownloadRequest) -> bool {
        !request.url.is_empty() && self.platforms.contains(&request.platform())
    }

    fn decline_reason(&self, request: &DownloadRequest) -> String {
        if request.url.is_empty() {
            "empty url".to_string()
        } else {
            format!("platform {} is not enabled for {}", request.platform(), self.name)
        }
    }

    async fn call(&self, request: &DownloadRequest) -> Result<DownloadResult, AdapterError> {
        fs::create_dir_all(&request.output_dir).await?;

        let output = run_cmd(&self.binary, &self.build_args(request)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (title, path) = parse_output(&stdout)?;
        let path = path.ok_or_else(|| AdapterError::new("yt-dlp did not report an output file"))?;

        let meta = fs::metadata(&path).await.map_err(|e| {
            AdapterError::new(format!("yt-dlp output {} missing: {}", path.display(), e))
        })?;
        if meta.len() == 0 {
            return Err(AdapterError::new(format!("yt-dlp output {} is empty", path.display())));
        }

        Ok(DownloadResult { path, platform: request.platform(), bytes: meta.len(), title })
    }
}
