use crate::error::{AttemptError, OutcomeFailure};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Provider name reported when the result came from the result cache.
pub const CACHE_PROVIDER: &str = "cache";

/// One entry per provider considered in an execution (not one per retry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider_name: String,
    pub error: Option<AttemptError>,
    #[serde(rename = "duration_ms", with = "crate::retry::duration_ms")]
    pub duration: Duration,
    /// Adapter invocations made for this provider, retries included.
    pub invocations: u32,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one `execute` call. Returned on success and failure alike; the
/// attempts list is the diagnostic callers are expected to surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackOutcome<T> {
    pub succeeded: bool,
    pub result: Option<T>,
    pub provider_used: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub failure: Option<OutcomeFailure>,
}

impl<T> FallbackOutcome<T> {
    pub fn success(result: T, provider_used: impl Into<String>, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            succeeded: true,
            result: Some(result),
            provider_used: Some(provider_used.into()),
            attempts,
            failure: None,
        }
    }

    pub fn cached(result: T) -> Self {
        Self::success(result, CACHE_PROVIDER, Vec::new())
    }

    pub fn failed(failure: OutcomeFailure, attempts: Vec<AttemptRecord>) -> Self {
        Self { succeeded: false, result: None, provider_used: None, attempts, failure: Some(failure) }
    }

    pub fn from_cache(&self) -> bool {
        self.provider_used.as_deref() == Some(CACHE_PROVIDER)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FallbackOutcome<U> {
        FallbackOutcome {
            succeeded: self.succeeded,
            result: self.result.map(f),
            provider_used: self.provider_used,
            attempts: self.attempts,
            failure: self.failure,
        }
    }

    /// Every provider's failure reason, one per line, for operators. Reasons are
    /// never merged into a single generic message.
    pub fn failure_summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.attempts.len() + 1);
        if let Some(failure) = self.failure {
            lines.push(failure.to_string());
        }
        for attempt in &self.attempts {
            if let Some(err) = &attempt.error {
                lines.push(format!("  {}: {}", attempt.provider_name, err));
            }
        }
        lines.join("\n")
    }
}
