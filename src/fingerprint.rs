use crate::capability::Capability;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic cache key for a (capability, request) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes `request` to canonical JSON and hashes it together with the
/// capability. Object keys are sorted, so field order never changes the key.
pub fn fingerprint<R: Serialize + ?Sized>(capability: Capability, request: &R) -> serde_json::Result<Fingerprint> {
    let canonical = canonical_json(request)?;
    let mut hasher = Sha256::new();
    hasher.update(capability.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

pub fn canonical_json<R: Serialize + ?Sized>(request: &R) -> serde_json::Result<String> {
    // serde_json::Map is BTreeMap-backed, so going through Value sorts keys.
    let value = serde_json::to_value(request)?;
    serde_json::to_string(&value)
}
