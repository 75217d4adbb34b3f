mod common;

use common::*;
use shorts_orchestrator::health::HealthConfig;
use shorts_orchestrator::{AttemptError, Capability, CircuitState, OutcomeFailure};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CAP: Capability = Capability::Analyze;

fn request(s: &str) -> String {
    s.to_string()
}

fn default_exec() -> shorts_orchestrator::FallbackExecutor<String, String> {
    executor(settings(CAP, single_attempt(), Duration::from_secs(60)), HealthConfig::default())
}

#[tokio::test]
async fn first_success_at_position_k_stops_the_chain() {
    for k in 1..=4usize {
        let exec = default_exec();
        let providers: Vec<_> = (1..=4)
            .map(|i| {
                let name = format!("p{}", i);
                if i == k {
                    ScriptedProvider::always_ok(&name)
                } else {
                    ScriptedProvider::always_fail(&name)
                }
            })
            .collect();
        for (i, p) in providers.iter().enumerate() {
            add(&exec, CAP, p, i as i32);
        }

        let outcome = exec.execute(CAP, &request("clip")).await;
        assert!(outcome.succeeded, "k = {}", k);
        assert_eq!(outcome.provider_used.as_deref(), Some(format!("p{}", k).as_str()));
        assert_eq!(outcome.attempts.len(), k);
        assert!(outcome.attempts[..k - 1].iter().all(|a| a.error.is_some()));
        assert!(outcome.attempts[k - 1].succeeded());
        for p in &providers[k..] {
            assert_eq!(p.calls(), 0);
        }
    }
}

#[tokio::test]
async fn all_failing_lists_every_enabled_provider() {
    let exec = default_exec();
    let a = ScriptedProvider::always_fail("a");
    let b = ScriptedProvider::always_fail("b");
    let off = ScriptedProvider::always_ok("off");
    add(&exec, CAP, &a, 1);
    add(&exec, CAP, &b, 2);
    add(&exec, CAP, &off, 3);
    exec.registry().set_enabled(CAP, "off", false).unwrap();

    let outcome = exec.execute(CAP, &request("clip")).await;
    assert!(!outcome.succeeded);
    assert_eq!(outcome.failure, Some(OutcomeFailure::AllProvidersExhausted));
    assert_eq!(attempt_names(&outcome.attempts), vec!["a", "b"]);
    assert_eq!(off.calls(), 0);
    assert_eq!(
        outcome.failure_summary(),
        "all providers exhausted\n  a: a is down\n  b: b is down"
    );
}

#[tokio::test]
async fn no_providers_is_its_own_failure() {
    let exec = default_exec();
    let outcome = exec.execute(CAP, &request("clip")).await;
    assert_eq!(outcome.failure, Some(OutcomeFailure::NoProvidersConfigured));
    assert!(outcome.attempts.is_empty());

    let only = ScriptedProvider::always_ok("only");
    add(&exec, CAP, &only, 1);
    exec.registry().set_enabled(CAP, "only", false).unwrap();
    let outcome = exec.execute(CAP, &request("clip")).await;
    assert_eq!(outcome.failure, Some(OutcomeFailure::NoProvidersConfigured));
}

#[tokio::test(start_paused = true)]
async fn identical_requests_hit_the_cache_until_ttl() {
    let exec = default_exec();
    let p = ScriptedProvider::always_ok("p");
    add(&exec, CAP, &p, 1);

    let first = exec.execute(CAP, &request("clip")).await;
    assert!(first.succeeded);
    let second = exec.execute(CAP, &request("clip")).await;
    assert!(second.from_cache());
    assert_eq!(second.result, first.result);
    assert!(second.attempts.is_empty());
    assert_eq!(p.calls(), 1);

    exec.execute(CAP, &request("other clip")).await;
    assert_eq!(p.calls(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    let third = exec.execute(CAP, &request("clip")).await;
    assert_eq!(third.provider_used.as_deref(), Some("p"));
    assert_eq!(p.calls(), 3);
}

#[tokio::test]
async fn same_request_under_another_capability_is_not_shared() {
    let exec = executor(
        settings(CAP, single_attempt(), Duration::from_secs(60))
            .with_capability(Capability::Download, shorts_orchestrator::executor::CapabilitySettings {
                retry: single_attempt(),
                cache_ttl: Duration::from_secs(60),
            }),
        HealthConfig::default(),
    );
    let analyze = ScriptedProvider::always_ok("analyze");
    let download = ScriptedProvider::always_ok("download");
    add(&exec, CAP, &analyze, 1);
    add(&exec, Capability::Download, &download, 1);

    exec.execute(CAP, &request("same")).await;
    let outcome = exec.execute(Capability::Download, &request("same")).await;
    assert_eq!(outcome.provider_used.as_deref(), Some("download"));
    assert_eq!(download.calls(), 1);
}

#[tokio::test]
async fn zero_ttl_never_caches() {
    let exec = executor(settings(CAP, single_attempt(), Duration::ZERO), HealthConfig::default());
    let p = ScriptedProvider::always_ok("p");
    add(&exec, CAP, &p, 1);

    exec.execute(CAP, &request("clip")).await;
    let again = exec.execute(CAP, &request("clip")).await;
    assert!(!again.from_cache());
    assert_eq!(p.calls(), 2);
}

#[tokio::test]
async fn failures_are_not_cached() {
    let exec = default_exec();
    let p = ScriptedProvider::new("p", vec![fail("HTTP 503"), ok("fine")]);
    add(&exec, CAP, &p, 1);

    assert!(!exec.execute(CAP, &request("clip")).await.succeeded);
    let outcome = exec.execute(CAP, &request("clip")).await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.provider_used.as_deref(), Some("p"));
}

#[tokio::test(start_paused = true)]
async fn open_circuit_skips_until_cool_down_then_probes_once() {
    let health = HealthConfig { failure_threshold: 3, cool_down: Duration::from_secs(60) };
    let exec = executor(settings(CAP, single_attempt(), Duration::ZERO), health);
    let flaky = ScriptedProvider::new("flaky", vec![fail("502"), fail("502"), fail("502"), ok("back")]);
    let backup = ScriptedProvider::always_ok("backup");
    add(&exec, CAP, &flaky, 1);
    add(&exec, CAP, &backup, 2);

    for _ in 0..3 {
        let outcome = exec.execute(CAP, &request("clip")).await;
        assert_eq!(outcome.provider_used.as_deref(), Some("backup"));
    }
    assert_eq!(flaky.calls(), 3);
    let record = exec.health().record(CAP, "flaky").unwrap();
    assert_eq!(record.circuit_state, CircuitState::Open);

    // inside the cool-down: skipped without a call, still listed
    let outcome = exec.execute(CAP, &request("clip")).await;
    assert_eq!(flaky.calls(), 3);
    assert_eq!(outcome.attempts[0].provider_name, "flaky");
    assert_eq!(outcome.attempts[0].error, Some(AttemptError::CircuitOpen));
    assert_eq!(outcome.attempts[0].duration, Duration::ZERO);
    assert_eq!(outcome.attempts[0].invocations, 0);

    tokio::time::advance(Duration::from_secs(61)).await;
    let outcome = exec.execute(CAP, &request("clip")).await;
    assert_eq!(flaky.calls(), 4);
    assert_eq!(outcome.provider_used.as_deref(), Some("flaky"));
    let record = exec.health().record(CAP, "flaky").unwrap();
    assert_eq!(record.circuit_state, CircuitState::Closed);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_circuit() {
    let health = HealthConfig { failure_threshold: 2, cool_down: Duration::from_secs(10) };
    let exec = executor(settings(CAP, single_attempt(), Duration::ZERO), health);
    let down = ScriptedProvider::always_fail("down");
    add(&exec, CAP, &down, 1);

    exec.execute(CAP, &request("x")).await;
    exec.execute(CAP, &request("x")).await;
    assert_eq!(down.calls(), 2);

    tokio::time::advance(Duration::from_secs(11)).await;
    let outcome = exec.execute(CAP, &request("x")).await;
    assert_eq!(down.calls(), 3);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(exec.health().record(CAP, "down").unwrap().circuit_state, CircuitState::Open);

    let outcome = exec.execute(CAP, &request("x")).await;
    assert_eq!(down.calls(), 3);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].error, Some(AttemptError::CircuitOpen));
}

#[tokio::test]
async fn invocation_order_follows_priority_then_registration() {
    let exec = default_exec();
    let log = Arc::new(Mutex::new(Vec::new()));
    for (name, priority) in [("five", 5), ("one", 1), ("three", 3), ("one-b", 1)] {
        let p = ScriptedProvider::logged(name, vec![fail("no")], &log);
        add(&exec, CAP, &p, priority);
    }

    exec.execute(CAP, &request("clip")).await;
    assert_eq!(*log.lock().unwrap(), vec!["one", "one-b", "three", "five"]);
}

#[tokio::test]
async fn disabled_provider_disappears_and_returns_at_its_priority() {
    let exec = default_exec();
    let a = ScriptedProvider::always_fail("a");
    let b = ScriptedProvider::always_fail("b");
    let c = ScriptedProvider::always_fail("c");
    add(&exec, CAP, &a, 1);
    add(&exec, CAP, &b, 2);
    add(&exec, CAP, &c, 3);

    exec.registry().set_enabled(CAP, "b", false).unwrap();
    let outcome = exec.execute(CAP, &request("1")).await;
    assert_eq!(attempt_names(&outcome.attempts), vec!["a", "c"]);
    assert_eq!(b.calls(), 0);

    exec.registry().set_enabled(CAP, "b", true).unwrap();
    let outcome = exec.execute(CAP, &request("2")).await;
    assert_eq!(attempt_names(&outcome.attempts), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn ytdlp_failure_falls_through_to_direct_link() {
    let exec = executor(
        settings(Capability::Download, single_attempt(), Duration::from_secs(3600)),
        HealthConfig::default(),
    );
    let ytdlp = ScriptedProvider::always_fail("ytdlp");
    let direct = ScriptedProvider::always_ok("directLink");
    add(&exec, Capability::Download, &ytdlp, 1);
    add(&exec, Capability::Download, &direct, 2);

    let outcome = exec
        .execute(Capability::Download, &request("https://cdn.example.com/v.mp4"))
        .await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.provider_used.as_deref(), Some("directLink"));
    assert_eq!(attempt_names(&outcome.attempts), vec!["ytdlp", "directLink"]);
    assert_eq!(
        outcome.attempts[0].error,
        Some(AttemptError::Adapter { reason: "ytdlp is down".into() })
    );
    assert!(outcome.attempts[1].error.is_none());
}

#[tokio::test(start_paused = true)]
async fn three_timeouts_fold_into_one_attempt_entry() {
    let retry = shorts_orchestrator::RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(500),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_secs(10),
        per_attempt_timeout: Duration::from_secs(2),
    };
    let exec = executor(settings(CAP, retry, Duration::from_secs(60)), HealthConfig::default());
    let slow = ScriptedProvider::new("slow", vec![Step::Hang]);
    add(&exec, CAP, &slow, 1);

    let outcome = exec.execute(CAP, &request("clip")).await;
    assert!(!outcome.succeeded);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].invocations, 3);
    assert_eq!(outcome.attempts[0].error, Some(AttemptError::Timeout { after_ms: 2000 }));
    assert_eq!(slow.calls(), 3);
    // one failure per provider per execute, not per retry
    assert_eq!(exec.health().record(CAP, "slow").unwrap().consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn provider_retry_override_replaces_capability_default() {
    let exec = default_exec();
    let p = ScriptedProvider::new("p", vec![fail("x"), fail("x"), ok("third time")]);
    let adapter: Arc<dyn shorts_orchestrator::Provider<String, String>> = p.clone();
    let retry = shorts_orchestrator::RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        ..Default::default()
    };
    exec.registry()
        .register(
            CAP,
            shorts_orchestrator::ProviderDescriptor::new(adapter).with_retry(retry),
        )
        .unwrap();

    let outcome = exec.execute(CAP, &request("clip")).await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts[0].invocations, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executes_see_whole_registry_snapshots() {
    let health = HealthConfig { failure_threshold: u32::MAX, ..HealthConfig::default() };
    let exec = Arc::new(executor(settings(CAP, single_attempt(), Duration::from_secs(60)), health));
    let providers: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| ScriptedProvider::always_fail(n)).collect();
    for (p, priority) in providers.iter().zip([1, 2, 3, 0]) {
        add(&exec, CAP, p, priority);
    }

    // d flips between first and last, b between enabled and disabled
    let valid: Vec<Vec<&str>> = vec![
        vec!["d", "a", "b", "c"],
        vec!["d", "a", "c"],
        vec!["a", "b", "c", "d"],
        vec!["a", "c", "d"],
    ];

    let reconfigure = {
        let exec = Arc::clone(&exec);
        tokio::spawn(async move {
            for i in 0..200 {
                exec.registry().set_priority(CAP, "d", if i % 2 == 0 { 10 } else { 0 }).unwrap();
                exec.registry().set_enabled(CAP, "b", i % 3 != 0).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let workers: Vec<_> = (0..8)
        .map(|w| {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                let mut orders = Vec::new();
                for i in 0..50 {
                    let outcome = exec.execute(CAP, &format!("clip-{}-{}", w, i)).await;
                    assert_eq!(outcome.failure, Some(OutcomeFailure::AllProvidersExhausted));
                    let invocations: u32 = outcome.attempts.iter().map(|a| a.invocations).sum();
                    assert_eq!(invocations as usize, outcome.attempts.len());
                    orders.push(attempt_names(&outcome.attempts).iter().map(|n| n.to_string()).collect::<Vec<_>>());
                }
                orders
            })
        })
        .collect();

    reconfigure.await.unwrap();
    let mut runs = 0;
    for worker in workers {
        for order in worker.await.unwrap() {
            let order: Vec<&str> = order.iter().map(String::as_str).collect();
            assert!(valid.contains(&order), "unexpected attempt order {:?}", order);
            runs += 1;
        }
    }
    assert_eq!(runs, 400);

    let total_calls: u32 = providers.iter().map(|p| p.calls()).sum();
    let failures: u32 = ["a", "b", "c", "d"]
        .iter()
        .map(|n| exec.health().record(CAP, n).map_or(0, |r| r.consecutive_failures))
        .sum();
    assert_eq!(total_calls, failures);
}
