#![allow(dead_code)]

use async_trait::async_trait;
use shorts_orchestrator::cache::ResultCache;
use shorts_orchestrator::executor::{CapabilitySettings, ExecutorSettings};
use shorts_orchestrator::health::HealthConfig;
use shorts_orchestrator::{
    AdapterError, Capability, FallbackExecutor, Provider, ProviderDescriptor, ProviderHealthTracker,
    ProviderRegistry, RetryPolicy,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted provider does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    Ok(String),
    Fail(String),
    /// Never returns; the executor's timeout has to cut it off.
    Hang,
}

pub fn ok(value: &str) -> Step {
    Step::Ok(value.to_string())
}

pub fn fail(reason: &str) -> Step {
    Step::Fail(reason.to_string())
}

/// Plays back its steps in order and repeats the last one forever.
pub struct ScriptedProvider {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicU32,
    call_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, steps: Vec<Step>) -> Arc<Self> {
        Self::build(name, steps, None)
    }

    /// Appends its name to `call_log` on every invocation.
    pub fn logged(name: &str, steps: Vec<Step>, call_log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Self::build(name, steps, Some(Arc::clone(call_log)))
    }

    fn build(name: &str, steps: Vec<Step>, call_log: Option<Arc<Mutex<Vec<String>>>>) -> Arc<Self> {
        let last = steps.last().cloned().unwrap_or_else(|| fail("no script"));
        Arc::new(Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
            call_log,
        })
    }

    pub fn always_ok(name: &str) -> Arc<Self> {
        Self::new(name, vec![ok(&format!("result from {}", name))])
    }

    pub fn always_fail(name: &str) -> Arc<Self> {
        Self::new(name, vec![fail(&format!("{} is down", name))])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        match steps.pop_front() {
            Some(step) => {
                *self.last.lock().unwrap() = step.clone();
                step
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

#[async_trait]
impl<Req: Send + Sync> Provider<Req, String> for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _request: &Req) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.call_log {
            log.lock().unwrap().push(self.name.clone());
        }
        match self.next_step() {
            Step::Ok(value) => Ok(value),
            Step::Fail(reason) => Err(AdapterError::new(reason)),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

pub fn single_attempt() -> RetryPolicy {
    RetryPolicy::single_attempt(Duration::from_secs(5))
}

pub fn settings(capability: Capability, retry: RetryPolicy, cache_ttl: Duration) -> ExecutorSettings {
    ExecutorSettings::default().with_capability(capability, CapabilitySettings { retry, cache_ttl })
}

pub fn executor(settings: ExecutorSettings, health: HealthConfig) -> FallbackExecutor<String, String> {
    FallbackExecutor::new(
        Arc::new(ProviderRegistry::new()),
        Arc::new(ProviderHealthTracker::new(health)),
        Arc::new(ResultCache::new(true)),
        settings,
    )
}

/// Registers `provider` under `capability` with `priority`.
pub fn add(
    exec: &FallbackExecutor<String, String>,
    capability: Capability,
    provider: &Arc<ScriptedProvider>,
    priority: i32,
) {
    let adapter: Arc<dyn Provider<String, String>> = provider.clone();
    exec.registry()
        .register(capability, ProviderDescriptor::new(adapter).with_priority(priority))
        .unwrap();
}

pub fn attempt_names(attempts: &[shorts_orchestrator::AttemptRecord]) -> Vec<&str> {
    attempts.iter().map(|a| a.provider_name.as_str()).collect()
}
