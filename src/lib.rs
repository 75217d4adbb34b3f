use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod cache;
pub mod capability;
pub mod config;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod health;
pub mod init;
pub mod models;
pub mod orchestrator;
pub mod outcome;
pub mod platform;
pub mod providers;
pub mod registry;
pub mod retry;

pub use capability::Capability;
pub use error::{AdapterError, AttemptError, OrchestratorError, OutcomeFailure};
pub use executor::{ExecutorSettings, FallbackExecutor};
pub use health::{Availability, CircuitState, HealthRecord, ProviderHealthTracker};
pub use orchestrator::Orchestrator;
pub use outcome::{AttemptRecord, FallbackOutcome};
pub use registry::{Provider, ProviderDescriptor, ProviderRegistry};
pub use retry::RetryPolicy;

pub type OrchestratorLogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<OrchestratorLogHook>>> = Lazy::new(|| Mutex::new(None));

/// Installs (or removes) a process-wide sink that receives every orchestrator
/// log line, e.g. so a web layer can stream progress to a dashboard.
pub fn set_log_hook(hook: Option<OrchestratorLogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("{}", message),
        _ => tracing::info!("{}", message),
    }

    if let Ok(guard) = LOG_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag, message);
                callback(&line);
            }
        }
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}

/// Sets up the global `tracing` subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_hook_receives_tagged_lines() {
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        set_log_hook(Some(Arc::new(Mutex::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }))));

        logw("provider degraded");
        logok("provider recovered");
        set_log_hook(None);
        logi("not captured");

        let captured = lines.lock().unwrap().clone();
        assert!(captured.contains(&"[WARN] provider degraded".to_string()));
        assert!(captured.contains(&"[OK] provider recovered".to_string()));
        assert!(!captured.iter().any(|l| l.contains("not captured")));
    }
}
