use crate::capability::Capability;
use crate::error::AdapterError;
use crate::fingerprint::fingerprint;
use crate::models::{DownloadRequest, DownloadResult};
use crate::platform::Platform;
use crate::registry::Provider;
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "m4v", "avi", "mp3", "m4a"];
const MAX_FILE_NAME_CHARS: usize = 120;

/// Fetches a file URL over plain HTTP. Only handles links no platform
/// extractor recognizes.
pub struct DirectLinkDownloader {
    name: String,
    client: Client,
    max_bytes: Option<u64>,
}

impl DirectLinkDownloader {
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        Self { name: name.into(), client, max_bytes: None }
    }

    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn stream_to_file(&self, request: &DownloadRequest, path: &Path) -> Result<u64, AdapterError> {
        let mut resp = self
            .client
            .get(&request.url)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::new(format!("HTTP {}", status.as_u16())));
        }
        if let Some(content_type) = resp.headers().get(reqwest::header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default().to_ascii_lowercase();
            if content_type.starts_with("text/html") {
                return Err(AdapterError::new("link points to an HTML page, not a media file"));
            }
        }
        if let (Some(limit), Some(len)) = (self.max_bytes, resp.content_length()) {
            if len > limit {
                return Err(AdapterError::new(format!("file is {} bytes, limit is {}", len, limit)));
            }
        }

        let mut file = fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            written += chunk.len() as u64;
            if self.max_bytes.is_some_and(|limit| written > limit) {
                return Err(AdapterError::new("download exceeded size limit"));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if written == 0 {
            return Err(AdapterError::new("empty response body"));
        }
        Ok(written)
    }
}

/// Target file name for `url`: the last path segment when it looks like a
/// media file, otherwise a name derived from the URL hash.
pub(crate) fn file_name_for(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or_default();
    let sanitized: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(MAX_FILE_NAME_CHARS)
        .collect();

    let has_media_ext = Path::new(&sanitized)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    if has_media_ext && !sanitized.starts_with('.') {
        return sanitized;
    }

    let digest = fingerprint(Capability::Download, url)
        .map(|f| f.as_str()[..16].to_string())
        .unwrap_or_else(|_| "download".to_string());
    format!("{}.mp4", digest)
}

#[async_trait]
impl Provider<DownloadRequest, DownloadResult> for DirectLinkDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, request: &DownloadRequest) -> bool {
        let url = request.url.to_ascii_lowercase();
        request.platform() == Platform::Unknown
            && !request.audio_only
            && (url.starts_with("http://") || url.starts_with("https://"))
    }

    fn decline_reason(&self, request: &DownloadRequest) -> String {
        if request.audio_only {
            "audio-only downloads need a platform extractor".to_string()
        } else if request.platform() != Platform::Unknown {
            format!("{} links need a platform extractor", request.platform())
        } else {
            "not an http(s) link".to_string()
        }
    }

    async fn call(&self, request: &DownloadRequest) -> Result<DownloadResult, AdapterError> {
        fs::create_dir_all(&request.output_dir).await?;
        let path: PathBuf = request.output_dir.join(file_name_for(&request.url));
        let partial = partial_path(&path);

        match self.stream_to_file(request, &partial).await {
            Ok(bytes) => {
                fs::rename(&partial, &path).await?;
                Ok(DownloadResult { path, platform: Platform::Unknown, bytes, title: None })
            }
            Err(err) => {
                let _ = fs::remove_file(&partial).await;
                Err(err)
            }
        }
    }
}

/// Staging name used while the body streams in; renamed once complete.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
