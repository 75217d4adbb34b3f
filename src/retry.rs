use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry, backoff and timeout for invocations of a single provider.
///
/// Retries stay within one provider (network blips). Moving on to the next
/// provider is the executor's job and happens without backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    #[serde(rename = "per_attempt_timeout_ms", with = "duration_ms")]
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            per_attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that invokes the provider once.
    pub fn single_attempt(per_attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
            per_attempt_timeout,
        }
    }

    /// `min(base_delay * backoff_multiplier^attempt_index, max_delay)`.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt_index.min(i32::MAX as u32) as i32);
        let raw = self.base_delay.as_secs_f64() * factor;
        if !raw.is_finite() || raw >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(raw)
    }

    pub fn should_retry(&self, attempt_index: u32) -> bool {
        attempt_index.saturating_add(1) < self.max_attempts
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_attempts < 1 {
            return Err(OrchestratorError::InvalidRetryPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(OrchestratorError::InvalidRetryPolicy(format!(
                "backoff_multiplier must be >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(OrchestratorError::InvalidRetryPolicy(
                "per_attempt_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_overrides(&self, overrides: &RetryOverrides) -> Self {
        Self {
            max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
            base_delay: overrides
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(self.base_delay),
            backoff_multiplier: overrides.backoff_multiplier.unwrap_or(self.backoff_multiplier),
            max_delay: overrides
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(self.max_delay),
            per_attempt_timeout: overrides
                .per_attempt_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.per_attempt_timeout),
        }
    }
}

/// Per-provider partial override of a capability's default policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverrides {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub per_attempt_timeout_ms: Option<u64>,
}

impl RetryOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
