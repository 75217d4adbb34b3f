use crate::fingerprint::Fingerprint;
use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub fingerprint: Fingerprint,
    pub result: V,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
}

/// TTL memoization of successful results. Identical requests racing each other
/// may both miss and both do the work; no in-flight coalescing is done.
#[derive(Debug)]
pub struct ResultCache<V> {
    enabled: bool,
    entries: DashMap<Fingerprint, CacheEntry<V>>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, entries: DashMap::new() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the payload if present and unexpired. Expired entries are evicted here.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        let hit = {
            let entry = self.entries.get(fingerprint)?;
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.result.clone())
            }
        };
        if hit.is_none() {
            self.entries.remove_if(fingerprint, |_, e| e.is_expired(now));
        }
        hit
    }

    pub fn put(&self, fingerprint: Fingerprint, result: V, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            result,
            created_at: Instant::now(),
            ttl,
        };
        self.entries.insert(fingerprint, entry);
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.remove(fingerprint);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { enabled: self.enabled, entries: self.entries.len() }
    }
}
