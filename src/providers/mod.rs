//! Concrete adapters behind the `Provider` trait.
//!
//! Download: `ytdlp` (subprocess) and `direct` (plain HTTP).
//! Analyze: `chat` (OpenAI-compatible gateways) and `gemini`.
//! Apply effect: `ffmpeg`.

pub mod chat;
pub mod direct;
pub mod ffmpeg;
pub mod gemini;
pub mod ytdlp;

pub use chat::ChatGateway;
pub use direct::DirectLinkDownloader;
pub use ffmpeg::FfmpegEffects;
pub use gemini::GeminiGateway;
pub use ytdlp::YtDlpDownloader;

use crate::error::AdapterError;
use std::process::Output;
use tokio::process::Command;

const STDERR_TAIL_CHARS: usize = 600;

/// Runs `program args..` to completion and returns its output. The child is
/// killed if the returned future is dropped, so an executor timeout also ends
/// the process.
pub(crate) async fn run_cmd(program: &str, args: &[String]) -> Result<Output, AdapterError> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AdapterError::new(format!("failed to start {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(AdapterError::new(format!(
            "{} exited with {}: {}",
            program,
            code,
            tail(stderr.trim(), STDERR_TAIL_CHARS)
        )));
    }

    Ok(output)
}

/// `<binary> -version` (or `--version`) succeeds.
pub async fn binary_available(program: &str, version_flag: &str) -> bool {
    match Command::new(program).arg(version_flag).kill_on_drop(true).output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Last `max_chars` characters of `text`.
pub(crate) fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let (idx, _) = text.char_indices().nth(skip).unwrap_or((0, ' '));
    &text[idx..]
}

/// First `max_chars` characters of a response body, for error messages.
pub(crate) fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
