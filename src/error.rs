use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Setup-time errors. Ordinary provider failures never surface through this
/// type; they are folded into a `FallbackOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("provider '{name}' is already registered for {capability}")]
    DuplicateProvider { capability: Capability, name: String },

    #[error("provider '{name}' is not registered for {capability}")]
    UnknownProvider { capability: Capability, name: String },

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("no adapter named '{name}' exists for {capability}")]
    UnknownAdapter { capability: Capability, name: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Failure reported by a provider adapter. The orchestrator treats the reason
/// as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct AdapterError {
    pub reason: String,
}

impl AdapterError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("io: {}", err))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        // the URL may carry credentials in its query string
        let err = err.without_url();
        if err.is_timeout() {
            return Self::new(format!("http timeout: {}", err));
        }
        match err.status() {
            Some(status) => Self::new(format!("HTTP {}: {}", status.as_u16(), err)),
            None => Self::new(format!("http: {}", err)),
        }
    }
}

impl From<anyhow::Error> for AdapterError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// Why one provider did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    /// The last invocation exceeded the per-attempt timeout.
    #[error("timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    /// The adapter itself reported a failure.
    #[error("{reason}")]
    Adapter { reason: String },
    /// Skipped without invocation after repeated recent failures.
    #[error("circuit open")]
    CircuitOpen,
    /// The provider declined the request without being invoked.
    #[error("not supported: {reason}")]
    Unsupported { reason: String },
    /// The caller cancelled before this provider produced a result.
    #[error("cancelled")]
    Cancelled,
}

impl AttemptError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout { after_ms: after.as_millis() as u64 }
    }
}

impl From<AdapterError> for AttemptError {
    fn from(err: AdapterError) -> Self {
        Self::Adapter { reason: err.reason }
    }
}

/// Terminal reason carried by a failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeFailure {
    #[error("no providers configured")]
    NoProvidersConfigured,
    #[error("no provider supports this request")]
    NoProviderSupportsRequest,
    #[error("all providers exhausted")]
    AllProvidersExhausted,
    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(AttemptError::timeout(Duration::from_secs(2))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "timeout", "after_ms": 2000}));

        let json = serde_json::to_value(AttemptError::CircuitOpen).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "circuit_open"}));
    }

    #[test]
    fn adapter_reason_is_kept_verbatim() {
        let err: AttemptError = AdapterError::new("yt-dlp exited with status 1: ERROR: Private video").into();
        assert_eq!(err.to_string(), "yt-dlp exited with status 1: ERROR: Private video");
    }

    #[test]
    fn display_texts() {
        assert_eq!(AttemptError::timeout(Duration::from_millis(1500)).to_string(), "timed out after 1500 ms");
        assert_eq!(AttemptError::CircuitOpen.to_string(), "circuit open");
        let declined = AttemptError::Unsupported { reason: "platform instagram not handled".into() };
        assert_eq!(declined.to_string(), "not supported: platform instagram not handled");
        assert_eq!(OutcomeFailure::NoProviderSupportsRequest.to_string(), "no provider supports this request");
    }

    #[tokio::test]
    async fn reqwest_errors_drop_the_url() {
        let client = reqwest::Client::new();
        let err = client
            .get("http://127.0.0.1:9/v1/models?key=SECRET123")
            .send()
            .await
            .unwrap_err();
        let reason = AdapterError::from(err).reason;
        assert!(reason.starts_with("http"), "{}", reason);
        assert!(!reason.contains("SECRET123"), "{}", reason);
        assert!(!reason.contains("127.0.0.1"), "{}", reason);
    }
}
