use super::run_cmd;
use crate::error::AdapterError;
use crate::logi;
use crate::models::{Effect, EffectRequest, EffectResult, TextPosition};
use crate::registry::Provider;
use async_trait::async_trait;
use tokio::fs;

const MIN_SPEED: f64 = 0.25;
const MAX_SPEED: f64 = 4.0;
const MAX_VOLUME: f64 = 4.0;
const SEPIA_MATRIX: &str = ".393:.769:.189:0:.349:.686:.168:0:.272:.534:.131";
const EMBOSS_KERNEL: &str = "-2 -1 0 -1 1 1 0 1 2";
const EDGE_KERNEL: &str = "0 -1 0 -1 5 -1 0 -1 0";

/// Renders an effect list with a single `ffmpeg` pass.
pub struct FfmpegEffects {
    name: String,
    binary: String,
}

impl FfmpegEffects {
    pub fn new(name: impl Into<String>, binary: impl Into<String>) -> Self {
        Self { name: name.into(), binary: binary.into() }
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

/// `-vf` chain for `effects`, in order. `null` when nothing touches video.
pub fn video_filter(effects: &[Effect]) -> String {
    let mut filters = Vec::new();
    for effect in effects {
        let filter = match effect {
            Effect::Brightness { value } => format!("eq=brightness={:.3}", value.clamp(-1.0, 1.0)),
            Effect::Contrast { value } => format!("eq=contrast={:.3}", value.clamp(0.0, 2.0)),
            Effect::Saturation { value } => format!("eq=saturation={:.3}", value.clamp(0.0, 3.0)),
            Effect::Hue { degrees } => format!("hue=h={:.1}", degrees),
            Effect::Grayscale => "hue=s=0".to_string(),
            Effect::Sepia => format!("colorchannelmixer={}", SEPIA_MATRIX),
            Effect::Vintage => format!("colorchannelmixer={},eq=contrast=0.800:brightness=0.157", SEPIA_MATRIX),
            Effect::Retro => "eq=saturation=0.700,colorchannelmixer=rr=1.1:gg=1.05:bb=0.9".to_string(),
            Effect::Neon => "eq=saturation=1.500:brightness=0.080".to_string(),
            Effect::Blur { radius } => format!("boxblur={}:1", (*radius).max(1)),
            Effect::Sharpen { amount } => format!("unsharp=5:5:{:.2}:5:5:0", amount.clamp(-2.0, 5.0)),
            Effect::EdgeEnhance => format!("convolution=0m='{}'", EDGE_KERNEL),
            Effect::Emboss => format!("convolution=0m='{}':0bias=128", EMBOSS_KERNEL),
            Effect::FilmGrain { intensity } => {
                format!("noise=alls={}:allf=t+u", (unit(*intensity) * 100.0).round() as u32)
            }
            Effect::Vignette { strength } => {
                format!("vignette=angle={:.4}", unit(*strength) * std::f64::consts::FRAC_PI_2)
            }
            Effect::Fisheye { strength } => format!("lenscorrection=k1={:.3}:k2=0", unit(*strength)),
            Effect::Glitch { intensity } => {
                let i = unit(*intensity);
                format!("rgbashift=rh={}:gv={}", (i * 20.0).round() as i32, (i * 10.0).round() as i32)
            }
            Effect::Speed { factor } => format!("setpts=PTS/{:.4}", clamp_speed(*factor)),
            Effect::Mirror => "hflip".to_string(),
            Effect::Vertical => {
                "crop=w='min(iw,ih*9/16)':h=ih,scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string()
            }
            Effect::Text { content, font_size, color, position, duration_secs } => {
                drawtext(content, *font_size, color, *position, *duration_secs)
            }
            Effect::Volume { .. } => continue,
        };
        filters.push(filter);
    }

    if filters.is_empty() {
        "null".to_string()
    } else {
        filters.join(",")
    }
}

/// drawtext escaping differs per parser level; keep only characters that need none.
fn caption_text(content: &str) -> String {
    content
        .chars()
        .map(|c| if c.is_alphanumeric() || " .!?-#".contains(c) { c } else { ' ' })
        .collect::<String>()
        .trim()
        .to_string()
}

fn drawtext(content: &str, font_size: u32, color: &str, position: TextPosition, duration_secs: f64) -> String {
    let y = match position {
        TextPosition::Top => "50",
        TextPosition::Center => "(h-text_h)/2",
        TextPosition::Bottom => "h-100",
    };
    let color: String = color.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '#').collect();
    let duration = if duration_secs.is_finite() && duration_secs > 0.0 { duration_secs } else { 3.0 };
    format!(
        "drawtext=text='{}':fontsize={}:fontcolor={}:x=(w-text_w)/2:y={}:enable='lte(t,{:.2})'",
        caption_text(content),
        font_size.max(1),
        if color.is_empty() { "white" } else { color.as_str() },
        y,
        duration
    )
}

/// `-af` chain: speed and volume changes touch audio.
pub fn audio_filter(effects: &[Effect]) -> Option<String> {
    let stages: Vec<String> = effects
        .iter()
        .filter_map(|e| match e {
            Effect::Speed { factor } => Some(atempo_chain(clamp_speed(*factor))),
            Effect::Volume { factor } => {
                let factor = if factor.is_finite() { factor.clamp(0.0, MAX_VOLUME) } else { 1.0 };
                Some(format!("volume={:.3}", factor))
            }
            _ => None,
        })
        .collect();
    if stages.is_empty() {
        None
    } else {
        Some(stages.join(","))
    }
}

fn clamp_speed(factor: f64) -> f64 {
    if factor.is_finite() {
        factor.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

/// `atempo` accepts 0.5..=2.0 per instance; larger changes are chained.
fn atempo_chain(mut factor: f64) -> String {
    let mut parts = Vec::new();
    while factor > 2.0 {
        parts.push("atempo=2.0".to_string());
        factor /= 2.0;
    }
    while factor < 0.5 {
        parts.push("atempo=0.5".to_string());
        factor /= 0.5;
    }
    parts.push(format!("atempo={:.4}", factor));
    parts.join(",")
}

fn ffmpeg_args(request: &EffectRequest, vf: &str, af: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        request.input.display().to_string(),
        "-map".to_string(),
        "0:v".to_string(),
        "-map".to_string(),
        "0:a?".to_string(),
    ];
    if request.strip_metadata {
        args.extend(["-map_metadata".to_string(), "-1".to_string()]);
    }
    args.extend(["-vf".to_string(), vf.to_string()]);
    if let Some(af) = af {
        args.extend(["-af".to_string(), af.to_string()]);
    }
    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        request.output.display().to_string(),
    ]);
    args
}

#[async_trait]
impl Provider<EffectRequest, EffectResult> for FfmpegEffects {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, request: &EffectRequest) -> bool {
        request.input != request.output
    }

    fn decline_reason(&self, _request: &EffectRequest) -> String {
        "output path must differ from input".to_string()
    }

    async fn call(&self, request: &EffectRequest) -> Result<EffectResult, AdapterError> {
        if fs::metadata(&request.input).await.is_err() {
            return Err(AdapterError::new(format!("input {} not found", request.input.display())));
        }
        if let Some(parent) = request.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let vf = video_filter(&request.effects);
        let af = audio_filter(&request.effects);
        let args = ffmpeg_args(request, &vf, af.as_deref());

        logi(format!("Rendering {} effect(s) -> {}", request.effects.len(), request.output.display()));
        run_cmd(&self.binary, &args).await?;

        match fs::metadata(&request.output).await {
            Ok(meta) if meta.len() > 0 => Ok(EffectResult {
                output: request.output.clone(),
                video_filter: vf,
                audio_filter: af,
            }),
            _ => Err(AdapterError::new(format!("ffmpeg produced no output at {}", request.output.display()))),
        }
    }
}
