//! Facade wiring the three capabilities to their executors.
//!
//! Circuit state is shared across capabilities (records are keyed by
//! capability and provider); each capability has its own result cache since
//! the result types differ.

use crate::cache::{CacheStats, ResultCache};
use crate::capability::Capability;
use crate::config::{AdapterConfig, CapabilityConfig, Config, ProviderConfig};
use crate::error::OrchestratorError;
use crate::executor::FallbackExecutor;
use crate::fingerprint::fingerprint;
use crate::health::{HealthRecord, ProviderHealthTracker};
use crate::init::{cleanup_downloads, CleanupReport};
use crate::models::{
    AnalysisRequest, AnalysisResult, DownloadRequest, DownloadResult, EffectRequest, EffectResult,
    VideoMetadata, DEFAULT_ANALYSIS_PROMPT,
};
use crate::outcome::FallbackOutcome;
use crate::providers::{ChatGateway, DirectLinkDownloader, FfmpegEffects, GeminiGateway, YtDlpDownloader};
use crate::registry::{Provider, ProviderDescriptor, ProviderRegistry};
use crate::retry::RetryPolicy;
use crate::{logi, logw};
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;

const USER_AGENT: &str = concat!("shorts-orchestrator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub health: Option<HealthRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityStatus {
    pub capability: Capability,
    pub providers: Vec<ProviderStatus>,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub capabilities: Vec<CapabilityStatus>,
}

pub struct Orchestrator {
    downloads: FallbackExecutor<DownloadRequest, DownloadResult>,
    analysis: FallbackExecutor<AnalysisRequest, AnalysisResult>,
    effects: FallbackExecutor<EffectRequest, EffectResult>,
    health: Arc<ProviderHealthTracker>,
    client: Client,
    download_dir: PathBuf,
    analysis_prompt: String,
}

impl Orchestrator {
    /// Builds every provider listed in `config`.
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        let orchestrator = Self::without_providers(config)?;
        for capability in Capability::ALL {
            if let Some(section) = config.section(capability) {
                for provider in &section.providers {
                    orchestrator.register_from_config(config, capability, provider)?;
                }
            }
        }
        Ok(orchestrator)
    }

    /// Same settings as `from_config`, but no providers; callers register
    /// their own through the executors' registries.
    pub fn without_providers(config: &Config) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OrchestratorError::Config(format!("http client: {}", e)))?;

        let health = Arc::new(ProviderHealthTracker::new(config.health));
        let settings = config.executor_settings();

        Ok(Self {
            downloads: FallbackExecutor::new(
                Arc::new(ProviderRegistry::new()),
                Arc::clone(&health),
                Arc::new(ResultCache::new(config.cache_enabled)),
                settings.clone(),
            ),
            analysis: FallbackExecutor::new(
                Arc::new(ProviderRegistry::new()),
                Arc::clone(&health),
                Arc::new(ResultCache::new(config.cache_enabled)),
                settings.clone(),
            ),
            effects: FallbackExecutor::new(
                Arc::new(ProviderRegistry::new()),
                Arc::clone(&health),
                Arc::new(ResultCache::new(config.cache_enabled)),
                settings,
            ),
            health,
            client,
            download_dir: config.download_dir.clone(),
            analysis_prompt: config
                .analysis_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ANALYSIS_PROMPT.to_string()),
        })
    }

    pub fn downloads(&self) -> &FallbackExecutor<DownloadRequest, DownloadResult> {
        &self.downloads
    }

    pub fn analysis(&self) -> &FallbackExecutor<AnalysisRequest, AnalysisResult> {
        &self.analysis
    }

    pub fn effects(&self) -> &FallbackExecutor<EffectRequest, EffectResult> {
        &self.effects
    }

    pub fn health(&self) -> &Arc<ProviderHealthTracker> {
        &self.health
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub async fn download(&self, request: &DownloadRequest) -> FallbackOutcome<DownloadResult> {
        self.download_with_cancel(request, &CancellationToken::new()).await
    }

    pub async fn download_with_cancel(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> FallbackOutcome<DownloadResult> {
        logi(format!("Download requested: {} ({})", request.url, request.platform()));
        let outcome = self
            .downloads
            .execute_with_cancel(Capability::Download, request, cancel)
            .await;

        let stale = match &outcome.result {
            Some(result) if outcome.from_cache() => !fs::try_exists(&result.path).await.unwrap_or(false),
            _ => false,
        };
        if !stale {
            return outcome;
        }
        logw(format!("Cached download for {} no longer exists on disk, fetching again", request.url));
        if let Ok(key) = fingerprint(Capability::Download, request) {
            self.downloads.cache().invalidate(&key);
        }
        self.downloads
            .execute_with_cancel(Capability::Download, request, cancel)
            .await
    }

    /// Downloads `url` into the configured download directory.
    pub async fn download_url(&self, url: &str) -> FallbackOutcome<DownloadResult> {
        self.download(&DownloadRequest::new(url, self.download_dir.clone()))
            .await
    }

    /// One outcome per URL, in input order. URLs are processed one at a time.
    pub async fn download_batch(&self, urls: &[String]) -> Vec<FallbackOutcome<DownloadResult>> {
        let mut outcomes = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            logi(format!("Batch download {}/{}", i + 1, urls.len()));
            outcomes.push(self.download_url(url).await);
        }
        let ok = outcomes.iter().filter(|o| o.succeeded).count();
        logi(format!("Batch finished: {}/{} downloaded", ok, urls.len()));
        outcomes
    }

    pub async fn analyze(&self, video: VideoMetadata, instruction: Option<&str>) -> FallbackOutcome<AnalysisResult> {
        self.analyze_with_cancel(video, instruction, &CancellationToken::new())
            .await
    }

    /// Runs the analysis chain and stamps the engagement rate computed from
    /// the metadata onto the result.
    pub async fn analyze_with_cancel(
        &self,
        video: VideoMetadata,
        instruction: Option<&str>,
        cancel: &CancellationToken,
    ) -> FallbackOutcome<AnalysisResult> {
        let engagement_rate = video.engagement_rate();
        let request = AnalysisRequest::new(video, instruction, &self.analysis_prompt);
        let outcome = self
            .analysis
            .execute_with_cancel(Capability::Analyze, &request, cancel)
            .await;
        let used = if outcome.from_cache() { None } else { outcome.provider_used.clone() };
        outcome.map(|mut result| {
            result.engagement_rate = engagement_rate;
            if result.provider.is_none() {
                result.provider = used;
            }
            result
        })
    }

    pub async fn apply_effects(&self, request: &EffectRequest) -> FallbackOutcome<EffectResult> {
        self.apply_effects_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn apply_effects_with_cancel(
        &self,
        request: &EffectRequest,
        cancel: &CancellationToken,
    ) -> FallbackOutcome<EffectResult> {
        self.effects
            .execute_with_cancel(Capability::ApplyEffect, request, cancel)
            .await
    }

    pub fn status(&self) -> OrchestratorStatus {
        let capabilities = vec![
            self.capability_status(Capability::Download, self.downloads.registry(), self.downloads.cache().stats()),
            self.capability_status(Capability::Analyze, self.analysis.registry(), self.analysis.cache().stats()),
            self.capability_status(Capability::ApplyEffect, self.effects.registry(), self.effects.cache().stats()),
        ];
        OrchestratorStatus { capabilities }
    }

    fn capability_status<Req, Res>(
        &self,
        capability: Capability,
        registry: &ProviderRegistry<Req, Res>,
        cache: CacheStats,
    ) -> CapabilityStatus {
        let mut providers: Vec<ProviderStatus> = registry
            .providers(capability)
            .into_iter()
            .map(|d| ProviderStatus {
                health: self.health.record(capability, &d.name),
                name: d.name,
                priority: d.priority,
                enabled: d.enabled,
            })
            .collect();
        providers.sort_by_key(|p| p.priority);
        CapabilityStatus { capability, providers, cache }
    }

    pub fn clear_cache(&self) {
        self.downloads.cache().clear();
        self.analysis.cache().clear();
        self.effects.cache().clear();
        logi("Result cache cleared");
    }

    /// Drops expired cache entries in every capability; returns the total.
    pub fn purge_expired_cache(&self) -> usize {
        self.downloads.cache().purge_expired()
            + self.analysis.cache().purge_expired()
            + self.effects.cache().purge_expired()
    }

    /// Removes old files from the download directory. Cached download results
    /// are dropped when anything was deleted, since they may point at it.
    pub async fn cleanup_downloads(&self, older_than_days: u64) -> anyhow::Result<CleanupReport> {
        let report = cleanup_downloads(&self.download_dir, older_than_days).await?;
        if report.deleted_count > 0 {
            self.downloads.cache().clear();
        }
        Ok(report)
    }

    /// Applies a changed configuration to the running registries: priorities
    /// and enabled flags are updated in place, new providers are registered
    /// and providers no longer listed are disabled. Adapter settings of
    /// existing providers, cache and health settings need a restart.
    pub fn reload(&self, config: &Config) -> Result<(), OrchestratorError> {
        config.validate()?;
        for capability in Capability::ALL {
            let empty = CapabilityConfig::default();
            let section = config.section(capability).unwrap_or(&empty);
            match capability {
                Capability::Download => self.reload_section(config, capability, section, self.downloads.registry())?,
                Capability::Analyze => self.reload_section(config, capability, section, self.analysis.registry())?,
                Capability::ApplyEffect => self.reload_section(config, capability, section, self.effects.registry())?,
            }
        }
        logi("Configuration reloaded");
        Ok(())
    }

    fn reload_section<Req, Res>(
        &self,
        config: &Config,
        capability: Capability,
        section: &CapabilityConfig,
        registry: &ProviderRegistry<Req, Res>,
    ) -> Result<(), OrchestratorError> {
        let existing: Vec<String> = registry.providers(capability).into_iter().map(|d| d.name).collect();

        for provider in &section.providers {
            if existing.contains(&provider.name) {
                registry.set_priority(capability, &provider.name, provider.priority)?;
                registry.set_enabled(capability, &provider.name, provider.enabled)?;
            } else {
                self.register_from_config(config, capability, provider)?;
            }
        }

        for name in existing {
            if !section.providers.iter().any(|p| p.name == name) {
                logw(format!("{} provider {} no longer configured; disabling", capability, name));
                registry.set_enabled(capability, &name, false)?;
            }
        }
        Ok(())
    }

    fn register_from_config(
        &self,
        config: &Config,
        capability: Capability,
        provider: &ProviderConfig,
    ) -> Result<(), OrchestratorError> {
        let unknown = || OrchestratorError::UnknownAdapter {
            capability,
            name: provider.adapter.kind().to_string(),
        };
        let retry = config.provider_retry(capability, provider);

        match (&provider.adapter, capability) {
            (AdapterConfig::YtDlp { binary, platforms, proxy, cookies_path }, Capability::Download) => {
                let mut ytdlp = YtDlpDownloader::new(&provider.name, binary.clone())
                    .with_proxy(proxy.clone())
                    .with_cookies(cookies_path.clone());
                if let Some(platforms) = platforms {
                    ytdlp = ytdlp.with_platforms(platforms.clone());
                }
                let adapter: Arc<dyn Provider<DownloadRequest, DownloadResult>> = Arc::new(ytdlp);
                self.downloads
                    .registry()
                    .register(capability, descriptor(adapter, provider, retry))
            }
            (AdapterConfig::Direct { max_bytes }, Capability::Download) => {
                let adapter: Arc<dyn Provider<DownloadRequest, DownloadResult>> =
                    Arc::new(DirectLinkDownloader::new(&provider.name, self.client.clone()).with_max_bytes(*max_bytes));
                self.downloads
                    .registry()
                    .register(capability, descriptor(adapter, provider, retry))
            }
            (
                AdapterConfig::OpenaiCompatible { base_url, model, temperature, max_tokens, .. },
                Capability::Analyze,
            ) => {
                let gateway = ChatGateway::new(&provider.name, self.client.clone(), base_url.clone(), model.clone())
                    .with_api_key(provider.adapter.resolved_api_key())
                    .with_sampling(temperature.unwrap_or(0.7), max_tokens.unwrap_or(2048));
                let adapter: Arc<dyn Provider<AnalysisRequest, AnalysisResult>> = Arc::new(gateway);
                self.analysis
                    .registry()
                    .register(capability, descriptor(adapter, provider, retry))
            }
            (AdapterConfig::Gemini { model, .. }, Capability::Analyze) => {
                let key = provider.adapter.resolved_api_key();
                if key.is_none() {
                    logw(format!("{}: no API key configured; calls will fail", provider.name));
                }
                let adapter: Arc<dyn Provider<AnalysisRequest, AnalysisResult>> =
                    Arc::new(GeminiGateway::new(&provider.name, self.client.clone(), model.clone()).with_api_key(key));
                self.analysis
                    .registry()
                    .register(capability, descriptor(adapter, provider, retry))
            }
            (AdapterConfig::Ffmpeg { binary }, Capability::ApplyEffect) => {
                let adapter: Arc<dyn Provider<EffectRequest, EffectResult>> =
                    Arc::new(FfmpegEffects::new(&provider.name, binary.clone()));
                self.effects
                    .registry()
                    .register(capability, descriptor(adapter, provider, retry))
            }
            _ => Err(unknown()),
        }
    }
}

fn descriptor<Req, Res>(
    adapter: Arc<dyn Provider<Req, Res>>,
    provider: &ProviderConfig,
    retry: Option<RetryPolicy>,
) -> ProviderDescriptor<Req, Res> {
    let descriptor = ProviderDescriptor::new(adapter)
        .with_name(&provider.name)
        .with_priority(provider.priority)
        .with_enabled(provider.enabled);
    match retry {
        Some(policy) => descriptor.with_retry(policy),
        None => descriptor,
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("download_dir", &self.download_dir)
            .field("analysis_prompt", &self.analysis_prompt)
            .finish_non_exhaustive()
    }
}
