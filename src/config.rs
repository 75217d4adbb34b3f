use crate::capability::Capability;
use crate::error::OrchestratorError;
use crate::executor::{CapabilitySettings, ExecutorSettings};
use crate::health::HealthConfig;
use crate::platform::Platform;
use crate::retry::{RetryOverrides, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub health: HealthConfig,
    /// Instruction used when an analysis request carries none.
    #[serde(default)]
    pub analysis_prompt: Option<String>,
    #[serde(default = "default_cleanup_days")]
    pub cleanup_after_days: u64,
    #[serde(default = "default_capabilities")]
    pub capabilities: BTreeMap<Capability, CapabilityConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Overrides the capability's default TTL; 0 disables caching.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "RetryOverrides::is_empty")]
    pub retry: RetryOverrides,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "RetryOverrides::is_empty")]
    pub retry: RetryOverrides,
    #[serde(flatten)]
    pub adapter: AdapterConfig,
}

/// Which adapter backs a provider, plus its adapter-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum AdapterConfig {
    #[serde(rename = "ytdlp")]
    YtDlp {
        #[serde(default = "default_ytdlp_binary")]
        binary: String,
        #[serde(default)]
        platforms: Option<Vec<Platform>>,
        #[serde(default)]
        proxy: Option<String>,
        #[serde(default)]
        cookies_path: Option<PathBuf>,
    },
    Direct {
        #[serde(default)]
        max_bytes: Option<u64>,
    },
    OpenaiCompatible {
        base_url: String,
        model: String,
        #[serde(default)]
        api_key: Option<String>,
        /// Environment variable that, when set, wins over `api_key`.
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default)]
        temperature: Option<f64>,
        #[serde(default)]
        max_tokens: Option<u32>,
    },
    Gemini {
        #[serde(default = "default_gemini_model")]
        model: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_gemini_env")]
        api_key_env: Option<String>,
    },
    Ffmpeg {
        #[serde(default = "default_ffmpeg_binary")]
        binary: String,
    },
}

impl AdapterConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::YtDlp { .. } => "ytdlp",
            Self::Direct { .. } => "direct",
            Self::OpenaiCompatible { .. } => "openai_compatible",
            Self::Gemini { .. } => "gemini",
            Self::Ffmpeg { .. } => "ffmpeg",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::YtDlp { .. } | Self::Direct { .. } => Capability::Download,
            Self::OpenaiCompatible { .. } | Self::Gemini { .. } => Capability::Analyze,
            Self::Ffmpeg { .. } => Capability::ApplyEffect,
        }
    }

    /// API key with the environment override applied.
    pub fn resolved_api_key(&self) -> Option<String> {
        let (key, env) = match self {
            Self::OpenaiCompatible { api_key, api_key_env, .. } | Self::Gemini { api_key, api_key_env, .. } => {
                (api_key, api_key_env)
            }
            _ => return None,
        };
        env.as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.trim().is_empty())
            .or_else(|| key.clone().filter(|k| !k.trim().is_empty()))
    }
}

fn default_true() -> bool {
    true
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_cleanup_days() -> u64 {
    7
}

fn default_ytdlp_binary() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_gemini_env() -> Option<String> {
    Some("GEMINI_API_KEY".to_string())
}

fn timeout_override(secs: u64) -> RetryOverrides {
    RetryOverrides { per_attempt_timeout_ms: Some(secs * 1000), ..RetryOverrides::default() }
}

fn openai_compatible(
    name: &str,
    priority: i32,
    enabled: bool,
    base_url: &str,
    model: &str,
    api_key_env: Option<&str>,
    timeout_secs: u64,
) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        priority,
        enabled,
        retry: timeout_override(timeout_secs),
        adapter: AdapterConfig::OpenaiCompatible {
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key: None,
            api_key_env: api_key_env.map(str::to_string),
            temperature: None,
            max_tokens: None,
        },
    }
}

fn default_capabilities() -> BTreeMap<Capability, CapabilityConfig> {
    let download = CapabilityConfig {
        providers: vec![
            ProviderConfig {
                name: "ytdlp".to_string(),
                priority: 1,
                enabled: true,
                retry: RetryOverrides::default(),
                adapter: AdapterConfig::YtDlp {
                    binary: default_ytdlp_binary(),
                    platforms: None,
                    proxy: None,
                    cookies_path: None,
                },
            },
            ProviderConfig {
                name: "directLink".to_string(),
                priority: 2,
                enabled: true,
                retry: RetryOverrides::default(),
                adapter: AdapterConfig::Direct { max_bytes: None },
            },
        ],
        ..CapabilityConfig::default()
    };

    let analyze = CapabilityConfig {
        providers: vec![
            openai_compatible("gpt4free", 1, true, "http://localhost:1337/v1", "gpt-3.5-turbo", None, 30),
            ProviderConfig {
                name: "gemini".to_string(),
                priority: 2,
                enabled: true,
                retry: RetryOverrides::default(),
                adapter: AdapterConfig::Gemini {
                    model: default_gemini_model(),
                    api_key: None,
                    api_key_env: default_gemini_env(),
                },
            },
            openai_compatible(
                "openrouter",
                3,
                false,
                "https://openrouter.ai/api/v1",
                "deepseek/deepseek-chat",
                Some("OPENROUTER_API_KEY"),
                20,
            ),
            openai_compatible("localai", 4, false, "http://localhost:8080/v1", "gpt-3.5-turbo", None, 15),
        ],
        ..CapabilityConfig::default()
    };

    let effects = CapabilityConfig {
        providers: vec![ProviderConfig {
            name: "ffmpeg".to_string(),
            priority: 1,
            enabled: true,
            retry: RetryOverrides::default(),
            adapter: AdapterConfig::Ffmpeg { binary: default_ffmpeg_binary() },
        }],
        ..CapabilityConfig::default()
    };

    BTreeMap::from([
        (Capability::Download, download),
        (Capability::Analyze, analyze),
        (Capability::ApplyEffect, effects),
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            cache_enabled: true,
            health: HealthConfig::default(),
            analysis_prompt: None,
            cleanup_after_days: default_cleanup_days(),
            capabilities: default_capabilities(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, built-in defaults otherwise.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if fs::metadata(&path).await.is_ok() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write config: {}", path.as_ref().display()))
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.health.failure_threshold == 0 {
            return Err(OrchestratorError::Config("health.failure_threshold must be at least 1".into()));
        }

        for (capability, section) in &self.capabilities {
            self.retry_for(*capability).validate()?;

            let mut seen = HashSet::new();
            for provider in &section.providers {
                if provider.name.trim().is_empty() {
                    return Err(OrchestratorError::Config(format!("{}: provider name missing", capability)));
                }
                if provider.adapter.capability() != *capability {
                    return Err(OrchestratorError::UnknownAdapter {
                        capability: *capability,
                        name: provider.adapter.kind().to_string(),
                    });
                }
                if !seen.insert(provider.name.as_str()) {
                    return Err(OrchestratorError::DuplicateProvider {
                        capability: *capability,
                        name: provider.name.clone(),
                    });
                }
                self.retry_for(*capability).with_overrides(&provider.retry).validate()?;
            }
        }
        Ok(())
    }

    pub fn section(&self, capability: Capability) -> Option<&CapabilityConfig> {
        self.capabilities.get(&capability)
    }

    /// Capability default policy with the section-level overrides applied.
    pub fn retry_for(&self, capability: Capability) -> RetryPolicy {
        let base = capability.default_retry();
        match self.section(capability) {
            Some(section) => base.with_overrides(&section.retry),
            None => base,
        }
    }

    pub fn cache_ttl(&self, capability: Capability) -> Duration {
        self.section(capability)
            .and_then(|s| s.cache_ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| capability.default_cache_ttl())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        Capability::ALL.iter().fold(ExecutorSettings::default(), |settings, cap| {
            settings.with_capability(
                *cap,
                CapabilitySettings { retry: self.retry_for(*cap), cache_ttl: self.cache_ttl(*cap) },
            )
        })
    }

    /// Fully resolved policy for one provider, if it overrides anything.
    pub fn provider_retry(&self, capability: Capability, provider: &ProviderConfig) -> Option<RetryPolicy> {
        if provider.retry.is_empty() {
            None
        } else {
            Some(self.retry_for(capability).with_overrides(&provider.retry))
        }
    }
}
