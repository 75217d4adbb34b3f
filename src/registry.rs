use crate::capability::Capability;
use crate::error::{AdapterError, OrchestratorError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

/// One concrete backend for a capability (a downloader tool, an LLM gateway,
/// an effect renderer).
#[async_trait]
pub trait Provider<Req, Res>: Send + Sync {
    /// Name of the backend (for logging and attempt records)
    fn name(&self) -> &str;

    /// Whether this backend can handle the request at all. A declined request
    /// is never passed to `call` and has no health effect.
    fn supports(&self, _request: &Req) -> bool {
        true
    }

    /// Shown in the attempts list when `supports` returns false.
    fn decline_reason(&self, _request: &Req) -> String {
        "request not supported".to_string()
    }

    async fn call(&self, request: &Req) -> Result<Res, AdapterError>;
}

/// Adapter built from an async closure.
pub struct FnProvider<F> {
    name: String,
    f: F,
}

impl<F> FnProvider<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<Req, Res, F, Fut> Provider<Req, Res> for FnProvider<F>
where
    Req: Clone + Send + Sync + 'static,
    Res: Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, AdapterError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: &Req) -> Result<Res, AdapterError> {
        (self.f)(request.clone()).await
    }
}

pub struct ProviderDescriptor<Req, Res> {
    pub name: String,
    /// Lower is tried first.
    pub priority: i32,
    pub enabled: bool,
    /// Replaces the capability default when set.
    pub retry: Option<RetryPolicy>,
    pub adapter: Arc<dyn Provider<Req, Res>>,
    seq: u64,
}

impl<Req, Res> ProviderDescriptor<Req, Res> {
    pub fn new(adapter: Arc<dyn Provider<Req, Res>>) -> Self {
        Self {
            name: adapter.name().to_string(),
            priority: 0,
            enabled: true,
            retry: None,
            adapter,
            seq: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl<Req, Res> Clone for ProviderDescriptor<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            priority: self.priority,
            enabled: self.enabled,
            retry: self.retry.clone(),
            adapter: Arc::clone(&self.adapter),
            seq: self.seq,
        }
    }
}

impl<Req, Res> fmt::Debug for ProviderDescriptor<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("retry", &self.retry)
            .finish()
    }
}

type ProviderList<Req, Res> = Arc<Vec<ProviderDescriptor<Req, Res>>>;

/// Provider lists per capability. Every mutation swaps in a fresh list, so a
/// reader always holds a consistent snapshot.
pub struct ProviderRegistry<Req, Res> {
    lists: RwLock<HashMap<Capability, ProviderList<Req, Res>>>,
    next_seq: AtomicU64,
}

impl<Req, Res> Default for ProviderRegistry<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Res> ProviderRegistry<Req, Res> {
    pub fn new() -> Self {
        Self { lists: RwLock::new(HashMap::new()), next_seq: AtomicU64::new(0) }
    }

    pub fn register(
        &self,
        capability: Capability,
        mut descriptor: ProviderDescriptor<Req, Res>,
    ) -> Result<(), OrchestratorError> {
        if let Some(policy) = &descriptor.retry {
            policy.validate()?;
        }

        let mut lists = self.lists.write().unwrap_or_else(|e| e.into_inner());
        let current = lists.get(&capability).cloned().unwrap_or_default();
        if current.iter().any(|d| d.name == descriptor.name) {
            return Err(OrchestratorError::DuplicateProvider { capability, name: descriptor.name });
        }

        descriptor.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        info!(
            capability = %capability,
            provider = %descriptor.name,
            priority = descriptor.priority,
            enabled = descriptor.enabled,
            "provider registered"
        );

        let mut next = current.as_ref().clone();
        next.push(descriptor);
        lists.insert(capability, Arc::new(next));
        Ok(())
    }

    /// Enabled providers, priority ascending, ties in registration order.
    pub fn ordered_providers(&self, capability: Capability) -> Vec<ProviderDescriptor<Req, Res>> {
        let mut out: Vec<_> = self
            .snapshot(capability)
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .collect();
        out.sort_by_key(|d| (d.priority, d.seq));
        out
    }

    /// Every registered provider, enabled or not, in registration order.
    pub fn providers(&self, capability: Capability) -> Vec<ProviderDescriptor<Req, Res>> {
        let mut out = self.snapshot(capability).as_ref().clone();
        out.sort_by_key(|d| d.seq);
        out
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let lists = self.lists.read().unwrap_or_else(|e| e.into_inner());
        let mut caps: Vec<Capability> = lists.keys().copied().collect();
        caps.sort();
        caps
    }

    pub fn set_enabled(&self, capability: Capability, name: &str, enabled: bool) -> Result<(), OrchestratorError> {
        self.update(capability, name, |d| d.enabled = enabled)
    }

    pub fn set_priority(&self, capability: Capability, name: &str, priority: i32) -> Result<(), OrchestratorError> {
        self.update(capability, name, |d| d.priority = priority)
    }

    fn snapshot(&self, capability: Capability) -> ProviderList<Req, Res> {
        let lists = self.lists.read().unwrap_or_else(|e| e.into_inner());
        lists.get(&capability).cloned().unwrap_or_default()
    }

    fn update(
        &self,
        capability: Capability,
        name: &str,
        apply: impl FnOnce(&mut ProviderDescriptor<Req, Res>),
    ) -> Result<(), OrchestratorError> {
        let mut lists = self.lists.write().unwrap_or_else(|e| e.into_inner());
        let unknown = || OrchestratorError::UnknownProvider { capability, name: name.to_string() };

        let current = lists.get(&capability).ok_or_else(unknown)?;
        let mut next = current.as_ref().clone();
        let target = next.iter_mut().find(|d| d.name == name).ok_or_else(unknown)?;
        apply(target);
        lists.insert(capability, Arc::new(next));
        Ok(())
    }
}
