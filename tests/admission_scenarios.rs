use api_throttle::error::{Result, ThrottleError};
use api_throttle::rate_limit::{
    AdmissionService, ConsumptionEngine, CounterSnapshot, CounterStore, DenialReason, FailPolicy,
    FailPolicyConfig, InMemoryCounterStore, MockClock, Profile, ProfileRegistry,
};
use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn auth_profile() -> Profile {
    Profile {
        name: "auth".to_string(),
        max_points: 5,
        window_secs: 900,
        smoothing: false,
        block_duration_secs: Some(900),
    }
}

fn api_profile(max_points: u32) -> Profile {
    Profile {
        name: "api".to_string(),
        max_points,
        window_secs: 60,
        smoothing: false,
        block_duration_secs: None,
    }
}

fn engine(store: Arc<dyn CounterStore>, profiles: Vec<Profile>) -> Arc<ConsumptionEngine> {
    let registry = Arc::new(ProfileRegistry::new(profiles).unwrap());
    Arc::new(ConsumptionEngine::new(store, registry))
}

#[tokio::test]
async fn test_auth_profile_escalation_scenario() {
    let clock = MockClock::new();
    let store = Arc::new(InMemoryCounterStore::with_clock(Arc::new(clock.clone())));
    let engine = engine(store, vec![auth_profile()]);
    let identity = "198.51.100.23";

    for attempt in 1..=5 {
        let decision = engine.consume("auth", identity).await.unwrap();
        assert!(decision.admitted, "Attempt {} should be admitted", attempt);
    }

    let sixth = engine.consume("auth", identity).await.unwrap();
    assert!(!sixth.admitted);
    assert_eq!(sixth.reason, Some(DenialReason::Blocked));
    assert_eq!(sixth.retry_after_secs, 900);

    clock.advance(Duration::from_secs(1));
    let seventh = engine.consume("auth", identity).await.unwrap();
    assert!(!seventh.admitted);
    assert_eq!(seventh.reason, Some(DenialReason::Blocked));
    assert_eq!(seventh.retry_after_secs, 899);

    // Other identities are unaffected
    assert!(engine.consume("auth", "198.51.100.24").await.unwrap().admitted);

    clock.advance(Duration::from_secs(899));
    assert!(engine.consume("auth", identity).await.unwrap().admitted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_over_admit() {
    let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
    let engine = engine(store, vec![api_profile(10)]);

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.consume("api", "10.1.1.1").await.unwrap() })
        })
        .collect();

    let decisions = futures::future::join_all(handles).await;
    let admitted = decisions
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|decision| decision.admitted)
        .count();

    assert_eq!(admitted, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engines_sharing_a_store_share_the_quota() {
    // Two engines stand in for two service instances in front of one store.
    let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
    let first = engine(store.clone(), vec![api_profile(6)]);
    let second = engine(store, vec![api_profile(6)]);

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = if i % 2 == 0 {
            first.clone()
        } else {
            second.clone()
        };
        handles.push(tokio::spawn(async move {
            engine.consume("api", "10.2.2.2").await.unwrap().admitted
        }));
    }

    let admitted = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|joined| *joined.as_ref().unwrap())
        .count();
    assert_eq!(admitted, 6);
}

/// Store that can be switched off to simulate an outage
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryCounterStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(ThrottleError::StoreUnavailable("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<CounterSnapshot> {
        self.check()?;
        self.inner.increment_and_get(key, ttl).await
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check()?;
        self.inner.get_ttl(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

async fn outage_outcomes(policy: FailPolicy) -> Vec<bool> {
    let store = Arc::new(FlakyStore::default());
    let engine = engine(store.clone(), vec![auth_profile(), api_profile(1)]);
    let service = AdmissionService::new(
        engine,
        FailPolicyConfig {
            policy,
            retry_after_secs: 3,
        },
    );

    store.down.store(true, Ordering::SeqCst);

    let mut outcomes = Vec::new();
    for i in 0..20 {
        let profile = if i % 2 == 0 { "auth" } else { "api" };
        let decision = service.admit(profile, "203.0.113.5").await.unwrap();
        assert!(decision.degraded);
        outcomes.push(decision.admitted);
    }
    outcomes
}

/// Run an outage against a local Prometheus recorder, returning the
/// outcomes and the rendered metrics
fn observed_outage(policy: FailPolicy) -> (Vec<bool>, String) {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let outcomes =
        metrics::with_local_recorder(&recorder, || runtime.block_on(outage_outcomes(policy)));
    (outcomes, handle.render())
}

/// Sum of all series of a counter whose labels include `label`
fn counter_total(rendered: &str, name: &str, label: &str) -> u64 {
    rendered
        .lines()
        .filter(|line| line.starts_with(&format!("{}{{", name)) && line.contains(label))
        .filter_map(|line| line.rsplit(' ').next())
        .filter_map(|value| value.parse::<u64>().ok())
        .sum()
}

#[test]
fn test_fail_open_admits_all_during_outage() {
    let (outcomes, rendered) = observed_outage(FailPolicy::Open);
    assert!(outcomes.iter().all(|admitted| *admitted));

    assert_eq!(
        counter_total(&rendered, "throttle_degraded_decisions_total", "policy=\"open\""),
        20
    );
    assert_eq!(
        counter_total(&rendered, "throttle_decisions_total", "outcome=\"admitted\""),
        20
    );
}

#[test]
fn test_fail_closed_denies_all_during_outage() {
    let (outcomes, rendered) = observed_outage(FailPolicy::Closed);
    assert!(outcomes.iter().all(|admitted| !*admitted));

    assert_eq!(
        counter_total(&rendered, "throttle_degraded_decisions_total", "policy=\"closed\""),
        20
    );
    assert_eq!(
        counter_total(&rendered, "throttle_decisions_total", "outcome=\"quota_exceeded\""),
        20
    );
}

/// Store whose marker writes always fail
#[derive(Default)]
struct MarkerWriteFailsStore {
    inner: InMemoryCounterStore,
}

#[async_trait]
impl CounterStore for MarkerWriteFailsStore {
    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<CounterSnapshot> {
        self.inner.increment_and_get(key, ttl).await
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.get_ttl(key).await
    }

    async fn set_with_ttl(&self, _key: &str, _value: u64, _ttl: Duration) -> Result<()> {
        Err(ThrottleError::StoreUnavailable("write refused".to_string()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_block_write_still_denies_over_quota() {
    let engine = engine(
        Arc::new(MarkerWriteFailsStore::default()),
        vec![auth_profile()],
    );
    let service = AdmissionService::new(
        engine,
        FailPolicyConfig {
            policy: FailPolicy::Open,
            retry_after_secs: 3,
        },
    );

    let mut admitted = 0;
    for _ in 0..20 {
        let decision = service.admit("auth", "198.51.100.40").await.unwrap();
        if decision.admitted {
            admitted += 1;
        } else {
            assert_eq!(decision.reason, Some(DenialReason::Blocked));
            assert!(!decision.degraded);
        }
    }

    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn test_engine_surfaces_store_unavailable() {
    let store = Arc::new(FlakyStore::default());
    let engine = engine(store.clone(), vec![api_profile(5)]);

    assert!(engine.consume("api", "u1").await.is_ok());

    store.down.store(true, Ordering::SeqCst);
    let result = engine.consume("api", "u1").await;
    assert!(matches!(result, Err(ThrottleError::StoreUnavailable(_))));

    // Recovery picks up the existing counter
    store.down.store(false, Ordering::SeqCst);
    let decision = engine.consume("api", "u1").await.unwrap();
    assert_eq!(decision.remaining, 3);
}
