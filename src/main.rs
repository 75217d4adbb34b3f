//! shorts-orchestrator CLI
//!
//! Usage:
//!   shorts-orchestrator download URL...      Download through the provider chain
//!   shorts-orchestrator analyze --title ...  Analyze video metadata with an LLM
//!   shorts-orchestrator effects IN OUT ...   Render effects with ffmpeg
//!   shorts-orchestrator status               Show providers, health and cache
//!   shorts-orchestrator cleanup --days 7     Remove old downloads
//!   shorts-orchestrator check                Probe external tools

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shorts_orchestrator::config::Config;
use shorts_orchestrator::init;
use shorts_orchestrator::models::{DownloadRequest, Effect, EffectRequest, VideoMetadata};
use shorts_orchestrator::platform::Platform;
use shorts_orchestrator::{FallbackOutcome, Orchestrator};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "shorts-orchestrator", version, about = "Provider fallback for downloading, analyzing and editing short videos")]
struct Cli {
    /// Path to config.json (built-in defaults when missing)
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs
    Download {
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// yt-dlp format selector
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        audio_only: bool,
    },
    /// Analyze a video's metadata
    Analyze {
        /// JSON file with video metadata; flags below override its fields
        #[arg(long)]
        metadata: Option<PathBuf>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        views: Option<u64>,
        #[arg(long)]
        likes: Option<u64>,
        #[arg(long)]
        comments: Option<u64>,
        #[arg(long)]
        url: Option<String>,
        /// Custom instruction instead of the configured prompt
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Apply effects to a video
    Effects {
        input: PathBuf,
        output: PathBuf,
        /// JSON array, e.g. '[{"name":"brightness","value":0.1},{"name":"mirror"}]'
        #[arg(long)]
        effects: String,
        /// Keep container metadata of the input
        #[arg(long)]
        keep_metadata: bool,
    },
    /// Show provider order, circuit state and cache stats
    Status,
    /// Delete downloads older than N days
    Cleanup {
        #[arg(long)]
        days: Option<u64>,
    },
    /// Check that yt-dlp and ffmpeg are installed
    Check,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints the outcome and reports every provider's failure on stderr.
fn report<T: Serialize>(outcome: &FallbackOutcome<T>) -> Result<bool> {
    print_json(outcome)?;
    if !outcome.succeeded {
        eprintln!("[WARN] {}", outcome.failure_summary());
    }
    Ok(outcome.succeeded)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[WARN] Interrupted; stopping after the current attempt");
            trigger.cancel();
        }
    });
    token
}

async fn load_metadata(path: Option<&PathBuf>) -> Result<VideoMetadata> {
    match path {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| format!("Invalid metadata JSON: {}", path.display()))
        }
        None => Ok(VideoMetadata::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    shorts_orchestrator::init_logging(&cli.log_level);

    let config = Config::load_or_default(&cli.config).await?;
    init::ensure_directories(&config).await?;
    let orchestrator = Orchestrator::from_config(&config)?;
    let cancel = cancel_on_ctrl_c();

    let ok = match cli.command {
        Commands::Download { urls, output_dir, format, audio_only } => {
            let output_dir = output_dir.unwrap_or_else(|| config.download_dir.clone());
            let mut all_ok = true;
            for url in urls {
                let mut request = DownloadRequest::new(url, output_dir.clone());
                request.format = format.clone();
                request.audio_only = audio_only;
                let outcome = orchestrator.download_with_cancel(&request, &cancel).await;
                all_ok &= report(&outcome)?;
                if cancel.is_cancelled() {
                    break;
                }
            }
            all_ok
        }
        Commands::Analyze { metadata, title, description, views, likes, comments, url, prompt } => {
            let mut video = load_metadata(metadata.as_ref()).await?;
            video.title = title.or(video.title);
            video.description = description.or(video.description);
            video.views = views.or(video.views);
            video.likes = likes.or(video.likes);
            video.comments = comments.or(video.comments);
            if let Some(url) = url {
                video.platform = Some(Platform::detect(&url));
            }
            let outcome = orchestrator
                .analyze_with_cancel(video, prompt.as_deref(), &cancel)
                .await;
            report(&outcome)?
        }
        Commands::Effects { input, output, effects, keep_metadata } => {
            let effects: Vec<Effect> = serde_json::from_str(&effects).context("Invalid --effects JSON")?;
            let mut request = EffectRequest::new(input, output, effects);
            request.strip_metadata = !keep_metadata;
            let outcome = orchestrator.apply_effects_with_cancel(&request, &cancel).await;
            report(&outcome)?
        }
        Commands::Status => {
            print_json(&orchestrator.status())?;
            true
        }
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(config.cleanup_after_days);
            print_json(&orchestrator.cleanup_downloads(days).await?)?;
            true
        }
        Commands::Check => {
            let checks = init::check_tools(&config).await;
            print_json(&checks)?;
            checks.iter().all(|c| c.available)
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
