use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kind of work a caller asks for. Each capability has its own provider list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Download,
    Analyze,
    ApplyEffect,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Download, Capability::Analyze, Capability::ApplyEffect];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Analyze => "analyze",
            Self::ApplyEffect => "apply_effect",
        }
    }

    /// Effects are local deterministic transforms; circuit breaking is
    /// meaningless for them.
    pub fn tracks_health(&self) -> bool {
        !matches!(self, Self::ApplyEffect)
    }

    /// Analysis answers go stale quickly; a finished download stays valid for a day.
    pub fn default_cache_ttl(&self) -> Duration {
        match self {
            Self::Download => Duration::from_secs(24 * 60 * 60),
            Self::Analyze => Duration::from_secs(30 * 60),
            Self::ApplyEffect => Duration::ZERO,
        }
    }

    pub fn default_retry(&self) -> RetryPolicy {
        match self {
            Self::Download => RetryPolicy {
                per_attempt_timeout: Duration::from_secs(600),
                ..RetryPolicy::default()
            },
            Self::Analyze => RetryPolicy::default(),
            Self::ApplyEffect => RetryPolicy::single_attempt(Duration::from_secs(1800)),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "download" => Ok(Self::Download),
            "analyze" | "analysis" => Ok(Self::Analyze),
            "apply_effect" | "applyeffect" | "effect" | "effects" => Ok(Self::ApplyEffect),
            other => Err(format!("unknown capability: {}", other)),
        }
    }
}
