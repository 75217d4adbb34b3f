//! The fallback control loop.
//!
//! For one request: consult the result cache once, then walk the enabled
//! providers in priority order. Each provider gets its retry policy; an open
//! circuit skips it without a call. The first success wins and is cached.
//! Providers are never raced in parallel.

use crate::cache::ResultCache;
use crate::capability::Capability;
use crate::error::{AttemptError, OutcomeFailure};
use crate::fingerprint::fingerprint;
use crate::health::ProviderHealthTracker;
use crate::outcome::{AttemptRecord, FallbackOutcome};
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::retry::RetryPolicy;
use crate::{logi, logok, logw};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySettings {
    pub retry: RetryPolicy,
    /// Zero disables caching for the capability.
    pub cache_ttl: Duration,
}

impl CapabilitySettings {
    pub fn defaults_for(capability: Capability) -> Self {
        Self { retry: capability.default_retry(), cache_ttl: capability.default_cache_ttl() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorSettings {
    capabilities: HashMap<Capability, CapabilitySettings>,
}

impl ExecutorSettings {
    pub fn with_capability(mut self, capability: Capability, settings: CapabilitySettings) -> Self {
        self.capabilities.insert(capability, settings);
        self
    }

    pub fn for_capability(&self, capability: Capability) -> CapabilitySettings {
        self.capabilities
            .get(&capability)
            .cloned()
            .unwrap_or_else(|| CapabilitySettings::defaults_for(capability))
    }
}

pub struct FallbackExecutor<Req, Res> {
    registry: Arc<ProviderRegistry<Req, Res>>,
    health: Arc<ProviderHealthTracker>,
    cache: Arc<ResultCache<Res>>,
    settings: ExecutorSettings,
}

impl<Req, Res> FallbackExecutor<Req, Res>
where
    Req: Serialize + Send + Sync,
    Res: Clone + Send + Sync,
{
    pub fn new(
        registry: Arc<ProviderRegistry<Req, Res>>,
        health: Arc<ProviderHealthTracker>,
        cache: Arc<ResultCache<Res>>,
        settings: ExecutorSettings,
    ) -> Self {
        Self { registry, health, cache, settings }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry<Req, Res>> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<ProviderHealthTracker> {
        &self.health
    }

    pub fn cache(&self) -> &Arc<ResultCache<Res>> {
        &self.cache
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub async fn execute(&self, capability: Capability, request: &Req) -> FallbackOutcome<Res> {
        self.execute_with_cancel(capability, request, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but stops at the next attempt boundary
    /// once `cancel` fires. An adapter call already in flight is bounded by its
    /// per-attempt timeout, not interrupted.
    pub async fn execute_with_cancel(
        &self,
        capability: Capability,
        request: &Req,
        cancel: &CancellationToken,
    ) -> FallbackOutcome<Res> {
        let key = match fingerprint(capability, request) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(capability = %capability, error = %err, "request not serializable, caching skipped");
                None
            }
        };

        if let Some(key) = &key {
            if let Some(hit) = self.cache.get(key) {
                debug!(capability = %capability, fingerprint = %key, "cache hit");
                return FallbackOutcome::cached(hit);
            }
        }

        let providers = self.registry.ordered_providers(capability);
        if providers.is_empty() {
            logw(format!("No providers configured for {}", capability));
            return FallbackOutcome::failed(OutcomeFailure::NoProvidersConfigured, Vec::new());
        }

        let settings = self.settings.for_capability(capability);
        let mut attempts = Vec::with_capacity(providers.len());

        for descriptor in providers {
            if cancel.is_cancelled() {
                return FallbackOutcome::failed(OutcomeFailure::Cancelled, attempts);
            }
            if !descriptor.adapter.supports(request) {
                let reason = descriptor.adapter.decline_reason(request);
                debug!(capability = %capability, provider = %descriptor.name, reason = %reason, "provider declined request");
                attempts.push(AttemptRecord {
                    provider_name: descriptor.name.clone(),
                    error: Some(AttemptError::Unsupported { reason }),
                    duration: Duration::ZERO,
                    invocations: 0,
                });
                continue;
            }

            if capability.tracks_health() {
                let availability = self.health.is_available(capability, &descriptor.name);
                if !availability.available {
                    logw(format!(
                        "Skipping {} provider {}: {}",
                        capability,
                        descriptor.name,
                        availability.reason.as_deref().unwrap_or("unavailable")
                    ));
                    attempts.push(AttemptRecord {
                        provider_name: descriptor.name.clone(),
                        error: Some(AttemptError::CircuitOpen),
                        duration: Duration::ZERO,
                        invocations: 0,
                    });
                    continue;
                }
            }

            let policy = descriptor.retry.as_ref().unwrap_or(&settings.retry);
            logi(format!("Trying {} provider: {}", capability, descriptor.name));

            let started = Instant::now();
            let (result, invocations) = self.run_provider(&descriptor, request, policy, cancel).await;
            let duration = started.elapsed();

            match result {
                Ok(value) => {
                    if capability.tracks_health() {
                        self.health.record_success(capability, &descriptor.name);
                    }
                    if let Some(key) = &key {
                        self.cache.put(key.clone(), value.clone(), settings.cache_ttl);
                    }
                    attempts.push(AttemptRecord {
                        provider_name: descriptor.name.clone(),
                        error: None,
                        duration,
                        invocations,
                    });
                    logok(format!(
                        "{} succeeded with {} ({} ms)",
                        capability,
                        descriptor.name,
                        duration.as_millis()
                    ));
                    return FallbackOutcome::success(value, descriptor.name, attempts);
                }
                Err(AttemptError::Cancelled) => {
                    attempts.push(AttemptRecord {
                        provider_name: descriptor.name.clone(),
                        error: Some(AttemptError::Cancelled),
                        duration,
                        invocations,
                    });
                    logw(format!("{} cancelled during {}", capability, descriptor.name));
                    return FallbackOutcome::failed(OutcomeFailure::Cancelled, attempts);
                }
                Err(err) => {
                    if capability.tracks_health() {
                        self.health
                            .record_failure(capability, &descriptor.name, &err.to_string());
                    }
                    logw(format!("{} provider {} failed: {}", capability, descriptor.name, err));
                    attempts.push(AttemptRecord {
                        provider_name: descriptor.name.clone(),
                        error: Some(err),
                        duration,
                        invocations,
                    });
                }
            }
        }

        let all_declined = attempts
            .iter()
            .all(|a| matches!(a.error, Some(AttemptError::Unsupported { .. })));
        if all_declined {
            logw(format!("No {} provider supports the request", capability));
            return FallbackOutcome::failed(OutcomeFailure::NoProviderSupportsRequest, attempts);
        }
        logw(format!("All {} providers exhausted ({} considered)", capability, attempts.len()));
        FallbackOutcome::failed(OutcomeFailure::AllProvidersExhausted, attempts)
    }

    /// Invokes one provider under `policy`. Returns the final result and the
    /// number of adapter invocations.
    async fn run_provider(
        &self,
        descriptor: &ProviderDescriptor<Req, Res>,
        request: &Req,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> (Result<Res, AttemptError>, u32) {
        let mut attempt_index = 0u32;
        loop {
            let call = descriptor.adapter.call(request);
            let err = match tokio::time::timeout(policy.per_attempt_timeout, call).await {
                Ok(Ok(value)) => return (Ok(value), attempt_index + 1),
                Ok(Err(err)) => AttemptError::from(err),
                Err(_) => AttemptError::timeout(policy.per_attempt_timeout),
            };

            if cancel.is_cancelled() {
                return (Err(AttemptError::Cancelled), attempt_index + 1);
            }
            if !policy.should_retry(attempt_index) {
                return (Err(err), attempt_index + 1);
            }

            let delay = policy.delay_for_attempt(attempt_index);
            debug!(
                provider = %descriptor.name,
                attempt = attempt_index + 1,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying provider"
            );
            tokio::select! {
                _ = cancel.cancelled() => return (Err(AttemptError::Cancelled), attempt_index + 1),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::health::HealthConfig;
    use crate::registry::FnProvider;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(retry: RetryPolicy) -> FallbackExecutor<String, String> {
        let settings = ExecutorSettings::default().with_capability(
            Capability::Analyze,
            CapabilitySettings { retry, cache_ttl: Duration::from_secs(60) },
        );
        FallbackExecutor::new(
            Arc::new(ProviderRegistry::new()),
            Arc::new(ProviderHealthTracker::new(HealthConfig::default())),
            Arc::new(ResultCache::new(true)),
            settings,
        )
    }

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            per_attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_within_provider_then_succeeds() {
        let exec = executor(quick_retry(3));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let flaky = FnProvider::new("flaky", move |req: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::new("connection reset"))
                } else {
                    Ok(format!("analysis of {}", req))
                }
            }
        });
        exec.registry()
            .register(Capability::Analyze, ProviderDescriptor::new(Arc::new(flaky)))
            .unwrap();

        let outcome = exec.execute(Capability::Analyze, &"clip".to_string()).await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].invocations, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let record = exec.health().record(Capability::Analyze, "flaky").unwrap();
        assert_eq!(record.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleeps_between_invocations() {
        let exec = executor(quick_retry(3));
        let failing = FnProvider::new("down", |_req: String| async {
            Err::<String, _>(AdapterError::new("HTTP 502"))
        });
        exec.registry()
            .register(Capability::Analyze, ProviderDescriptor::new(Arc::new(failing)))
            .unwrap();

        let started = Instant::now();
        let outcome = exec.execute(Capability::Analyze, &"x".to_string()).await;
        assert!(!outcome.succeeded);
        // 100 ms + 200 ms of backoff between three invocations
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(400));
        assert_eq!(
            outcome.attempts[0].error,
            Some(AttemptError::Adapter { reason: "HTTP 502".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_next_provider() {
        let exec = executor(quick_retry(1));
        let token = CancellationToken::new();
        let trigger = token.clone();
        let first = FnProvider::new("first", move |_req: String| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                Err::<String, _>(AdapterError::new("boom"))
            }
        });
        let second_calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&second_calls);
        let second = FnProvider::new("second", move |_req: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, AdapterError>("never".to_string()) }
        });
        let reg = exec.registry();
        reg.register(Capability::Analyze, ProviderDescriptor::new(Arc::new(first)).with_priority(1))
            .unwrap();
        reg.register(Capability::Analyze, ProviderDescriptor::new(Arc::new(second)).with_priority(2))
            .unwrap();

        let outcome = exec
            .execute_with_cancel(Capability::Analyze, &"x".to_string(), &token)
            .await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.failure, Some(OutcomeFailure::Cancelled));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].error, Some(AttemptError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn declined_requests_are_listed_with_reason() {
        struct OnlyUrls;

        #[async_trait::async_trait]
        impl crate::registry::Provider<String, String> for OnlyUrls {
            fn name(&self) -> &str {
                "only-urls"
            }

            fn supports(&self, request: &String) -> bool {
                request.starts_with("http")
            }

            fn decline_reason(&self, _request: &String) -> String {
                "not an http url".to_string()
            }

            async fn call(&self, request: &String) -> Result<String, AdapterError> {
                Ok(request.clone())
            }
        }

        let exec = executor(quick_retry(1));
        exec.registry()
            .register(Capability::Analyze, ProviderDescriptor::new(Arc::new(OnlyUrls)).with_priority(1))
            .unwrap();

        let outcome = exec.execute(Capability::Analyze, &"not a url".to_string()).await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.failure, Some(OutcomeFailure::NoProviderSupportsRequest));
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].invocations, 0);
        assert_eq!(
            outcome.attempts[0].error,
            Some(AttemptError::Unsupported { reason: "not an http url".into() })
        );
        assert_eq!(
            outcome.failure_summary(),
            "no provider supports this request\n  only-urls: not supported: not an http url"
        );
        assert!(exec.health().record(Capability::Analyze, "only-urls").is_none());

        // a real failure next to a decline is still exhaustion
        let down = FnProvider::new("down", |_req: String| async {
            Err::<String, _>(AdapterError::new("HTTP 503"))
        });
        exec.registry()
            .register(Capability::Analyze, ProviderDescriptor::new(Arc::new(down)).with_priority(2))
            .unwrap();
        let outcome = exec.execute(Capability::Analyze, &"still not a url".to_string()).await;
        assert_eq!(outcome.failure, Some(OutcomeFailure::AllProvidersExhausted));
        assert_eq!(outcome.attempts.len(), 2);
    }
}
