use crate::platform::Platform;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MAX_DESCRIPTION_CHARS: usize = 500;

pub const DEFAULT_ANALYSIS_PROMPT: &str =
    "Analyze this short-form video and explain why it could go viral. \
     Return JSON with keys \"summary\", \"hooks\", \"recommendations\" and \"scores\".";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub audio_only: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self { url: url.into().trim().to_string(), output_dir: output_dir.into(), format: None, audio_only: false }
    }

    pub fn platform(&self) -> Platform {
        Platform::detect(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub platform: Platform,
    pub bytes: u64,
    #[serde(default)]
    pub title: Option<String>,
}

/// What the dashboard knows about a video before analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub views: Option<u64>,
    #[serde(default)]
    pub likes: Option<u64>,
    #[serde(default)]
    pub comments: Option<u64>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub viral_score: Option<f64>,
}

impl VideoMetadata {
    /// (likes + comments) / views in percent, two decimals. None without views.
    pub fn engagement_rate(&self) -> Option<f64> {
        let views = self.views.filter(|v| *v > 0)?;
        let interactions = self.likes.unwrap_or(0) + self.comments.unwrap_or(0);
        let rate = interactions as f64 / views as f64 * 100.0;
        Some((rate * 100.0).round() / 100.0)
    }

    fn describe(&self) -> String {
        let mut lines = Vec::new();
        if let Some(title) = &self.title {
            lines.push(format!("Title: {}", title));
        }
        if let Some(desc) = &self.description {
            let desc: String = desc.chars().take(MAX_DESCRIPTION_CHARS).collect();
            lines.push(format!("Description: {}", desc));
        }
        if let Some(views) = self.views {
            lines.push(format!("Views: {}", views));
        }
        if let Some(likes) = self.likes {
            lines.push(format!("Likes: {}", likes));
        }
        if let Some(comments) = self.comments {
            lines.push(format!("Comments: {}", comments));
        }
        if let Some(duration) = self.duration_secs {
            lines.push(format!("Duration: {} sec", duration));
        }
        if let Some(platform) = self.platform {
            lines.push(format!("Platform: {}", platform));
        }
        if let Some(score) = self.viral_score {
            lines.push(format!("Viral score: {}", score));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub video: VideoMetadata,
    pub prompt: String,
}

impl AnalysisRequest {
    /// Builds the full prompt from an instruction (custom or default) and the
    /// video metadata.
    pub fn new(video: VideoMetadata, instruction: Option<&str>, default_instruction: &str) -> Self {
        let instruction = instruction
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(default_instruction);
        let prompt = format!("{}\n\nVideo data:\n{}", instruction, video.describe());
        Self { video, prompt }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
    /// The JSON object found in `text`, if the model returned one.
    #[serde(default)]
    pub parsed: Option<serde_json::Value>,
    #[serde(default)]
    pub engagement_rate: Option<f64>,
    /// Gateway that produced the text; kept across cache hits.
    #[serde(default)]
    pub provider: Option<String>,
}

impl AnalysisResult {
    pub fn from_text(text: impl Into<String>, model: Option<String>) -> Self {
        let text = text.into();
        let parsed = extract_json_object(&text).ok();
        Self { text, model, parsed, engagement_rate: None, provider: None }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Parses the outermost `{...}` block of a model answer, tolerating prose or
/// code fences around it.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value> {
    let start = text.find('{').context("no JSON object in model output")?;
    let end = text.rfind('}').context("unterminated JSON object in model output")?;
    if end < start {
        anyhow::bail!("malformed JSON object in model output");
    }
    let value: serde_json::Value =
        serde_json::from_str(&text[start..=end]).with_context(|| "Failed to parse model JSON")?;
    if !value.is_object() {
        anyhow::bail!("model output is not a JSON object");
    }
    Ok(value)
}

/// One filter applied by the effect pipeline. Values are passed through to the
/// renderer's built-in filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Effect {
    /// -1.0 ..= 1.0
    Brightness { value: f64 },
    /// 0.0 ..= 2.0, 1.0 is neutral
    Contrast { value: f64 },
    /// 0.0 ..= 3.0, 1.0 is neutral
    Saturation { value: f64 },
    Hue { degrees: f64 },
    Grayscale,
    Sepia,
    /// Sepia with lifted blacks and lower contrast.
    Vintage,
    /// Desaturated, warm tones.
    Retro,
    /// Boosted saturation and brightness.
    Neon,
    Blur { radius: u32 },
    Sharpen { amount: f64 },
    EdgeEnhance,
    Emboss,
    /// 0.0 ..= 1.0
    FilmGrain { intensity: f64 },
    /// 0.0 ..= 1.0
    Vignette { strength: f64 },
    /// 0.0 ..= 1.0, barrel distortion
    Fisheye { strength: f64 },
    /// 0.0 ..= 1.0, channel shift
    Glitch { intensity: f64 },
    /// Playback speed factor, audio follows.
    Speed { factor: f64 },
    /// Audio gain, 1.0 is unchanged.
    Volume { factor: f64 },
    Mirror,
    /// Center crop to 9:16.
    Vertical,
    /// Caption burned into the first seconds of the video.
    Text {
        content: String,
        #[serde(default = "default_font_size")]
        font_size: u32,
        #[serde(default = "default_font_color")]
        color: String,
        #[serde(default)]
        position: TextPosition,
        #[serde(default = "default_text_secs")]
        duration_secs: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextPosition {
    Top,
    Center,
    #[default]
    Bottom,
}

fn default_font_size() -> u32 {
    40
}

fn default_font_color() -> String {
    "white".to_string()
}

fn default_text_secs() -> f64 {
    3.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub effects: Vec<Effect>,
    /// Drop container metadata (title, encoder, creation time) from the output.
    #[serde(default = "default_true")]
    pub strip_metadata: bool,
}

impl EffectRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, effects: Vec<Effect>) -> Self {
        Self { input: input.into(), output: output.into(), effects, strip_metadata: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectResult {
    pub output: PathBuf,
    pub video_filter: String,
    #[serde(default)]
    pub audio_filter: Option<String>,
}
