//! Per-provider circuit breaker.
//!
//! ```text
//! Closed   -> Open      consecutive failures reach the threshold
//! Open     -> HalfOpen  cool-down elapsed; one probe is let through
//! HalfOpen -> Closed    probe succeeded
//! HalfOpen -> Open      probe failed
//! ```
//!
//! Records live in memory only and are created on the first recorded attempt.

use crate::capability::Capability;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub capability: Capability,
    pub provider_name: String,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub circuit_state: CircuitState,
}

impl HealthRecord {
    fn new(capability: Capability, provider_name: &str) -> Self {
        Self {
            capability,
            provider_name: provider_name.to_string(),
            consecutive_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            last_failure_reason: None,
            circuit_state: CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub reason: Option<String>,
}

impl Availability {
    fn yes() -> Self {
        Self { available: true, reason: None }
    }

    fn probe() -> Self {
        Self { available: true, reason: Some("half-open probe".to_string()) }
    }

    fn no(reason: String) -> Self {
        Self { available: false, reason: Some(reason) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    pub failure_threshold: u32,
    #[serde(rename = "cool_down_ms", with = "crate::retry::duration_ms")]
    pub cool_down: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, cool_down: Duration::from_secs(60) }
    }
}

#[derive(Debug)]
struct Entry {
    record: HealthRecord,
    open_until: Option<Instant>,
    probe_started_at: Option<Instant>,
}

/// Tracks availability per (capability, provider). Safe to share across
/// concurrent executions; a lost update on the failure counter only makes the
/// heuristic slightly less precise.
#[derive(Debug, Default)]
pub struct ProviderHealthTracker {
    config: HealthConfig,
    records: DashMap<(Capability, String), Entry>,
}

impl ProviderHealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config: HealthConfig {
                failure_threshold: config.failure_threshold.max(1),
                cool_down: config.cool_down,
            },
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> HealthConfig {
        self.config
    }

    pub fn record_success(&self, capability: Capability, provider_name: &str) {
        let mut entry = self.entry(capability, provider_name);
        if entry.record.circuit_state != CircuitState::Closed {
            info!(capability = %capability, provider = provider_name, "circuit closed after successful probe");
        }
        entry.record.consecutive_failures = 0;
        entry.record.circuit_state = CircuitState::Closed;
        entry.record.last_success_at = Some(Utc::now());
        entry.open_until = None;
        entry.probe_started_at = None;
    }

    pub fn record_failure(&self, capability: Capability, provider_name: &str, reason: &str) {
        let cool_down = self.config.cool_down;
        let threshold = self.config.failure_threshold;
        let mut entry = self.entry(capability, provider_name);

        entry.record.consecutive_failures = entry.record.consecutive_failures.saturating_add(1);
        entry.record.last_failure_at = Some(Utc::now());
        entry.record.last_failure_reason = Some(reason.to_string());

        let probe_failed = entry.record.circuit_state == CircuitState::HalfOpen;
        if probe_failed || entry.record.consecutive_failures >= threshold {
            if entry.record.circuit_state != CircuitState::Open {
                warn!(
                    capability = %capability,
                    provider = provider_name,
                    consecutive_failures = entry.record.consecutive_failures,
                    cool_down_ms = cool_down.as_millis() as u64,
                    "circuit opened"
                );
            }
            entry.record.circuit_state = CircuitState::Open;
            entry.open_until = Some(Instant::now() + cool_down);
            entry.probe_started_at = None;
        } else {
            debug!(
                capability = %capability,
                provider = provider_name,
                consecutive_failures = entry.record.consecutive_failures,
                "failure recorded"
            );
        }
    }

    /// Whether the provider may be invoked now. An elapsed cool-down moves an
    /// open circuit to half-open and admits exactly one probe; a probe that never
    /// reports back is released after another cool-down.
    pub fn is_available(&self, capability: Capability, provider_name: &str) -> Availability {
        let key = (capability, provider_name.to_string());
        let Some(mut entry) = self.records.get_mut(&key) else {
            return Availability::yes();
        };

        let now = Instant::now();
        match entry.record.circuit_state {
            CircuitState::Closed => Availability::yes(),
            CircuitState::Open => {
                let open_until = entry.open_until.unwrap_or(now);
                if now >= open_until {
                    entry.record.circuit_state = CircuitState::HalfOpen;
                    entry.probe_started_at = Some(now);
                    info!(capability = %capability, provider = provider_name, "circuit half-open, probing");
                    Availability::probe()
                } else {
                    let remaining = open_until - now;
                    Availability::no(format!("circuit open (retry in {} ms)", remaining.as_millis()))
                }
            }
            CircuitState::HalfOpen => {
                let started = entry.probe_started_at.unwrap_or(now);
                if now.duration_since(started) >= self.config.cool_down {
                    entry.probe_started_at = Some(now);
                    Availability::probe()
                } else {
                    Availability::no("circuit half-open, probe in flight".to_string())
                }
            }
        }
    }

    pub fn record(&self, capability: Capability, provider_name: &str) -> Option<HealthRecord> {
        self.records
            .get(&(capability, provider_name.to_string()))
            .map(|e| e.record.clone())
    }

    /// All known records, ordered by capability then provider name.
    pub fn snapshot(&self) -> Vec<HealthRecord> {
        let mut out: Vec<HealthRecord> = self.records.iter().map(|e| e.record.clone()).collect();
        out.sort_by(|a, b| {
            a.capability
                .cmp(&b.capability)
                .then_with(|| a.provider_name.cmp(&b.provider_name))
        });
        out
    }

    pub fn reset(&self, capability: Capability, provider_name: &str) {
        self.records.remove(&(capability, provider_name.to_string()));
    }

    pub fn reset_all(&self) {
        self.records.clear();
    }

    fn entry(
        &self,
        capability: Capability,
        provider_name: &str,
    ) -> dashmap::mapref::one::RefMut<'_, (Capability, String), Entry> {
        self.records
            .entry((capability, provider_name.to_string()))
            .or_insert_with(|| Entry {
                record: HealthRecord::new(capability, provider_name),
                open_until: None,
                probe_started_at: None,
            })
    }
}
