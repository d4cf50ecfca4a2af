//! Circuit breaker state machine and guard behavior end to end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use upstream_guard::infrastructure::mocks::MockClock;
use upstream_guard::{
    BreakerConfig, BreakerRegistry, BreakerState, HandlerFailure, Metrics, UpstreamFailure,
};

fn registry() -> (BreakerRegistry, Arc<MockClock>) {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let config = BreakerConfig {
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(30),
        backoff_factor: 2.0,
        max_recovery_timeout: Duration::from_secs(300),
        probe_retry_hint: Duration::from_secs(1),
    };
    (
        BreakerRegistry::new(config, clock.clone(), Metrics::new()),
        clock,
    )
}

async fn fail_n_times(registry: &BreakerRegistry, endpoint: &str, n: usize) {
    for _ in 0..n {
        let result: Result<u32, _> = registry
            .guard(endpoint, Duration::from_secs(5), async {
                Err(HandlerFailure::new("upstream down"))
            })
            .await;
        assert!(matches!(result, Err(UpstreamFailure::Failed { .. })));
    }
}

#[tokio::test]
async fn five_consecutive_failures_open_the_circuit() {
    let (registry, _clock) = registry();

    fail_n_times(&registry, "search", 5).await;
    assert_eq!(registry.endpoint("search").state(), BreakerState::Open);

    // The next call is short-circuited without invoking the handler
    let invoked = Arc::new(AtomicU32::new(0));
    let invoked_clone = Arc::clone(&invoked);
    let result: Result<u32, _> = registry
        .guard("search", Duration::from_secs(5), async move {
            invoked_clone.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;

    assert!(matches!(result, Err(UpstreamFailure::ShortCircuited { retry_after }) if retry_after > Duration::ZERO));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn successful_probe_closes_the_circuit_and_resets_failures() {
    let (registry, clock) = registry();

    fail_n_times(&registry, "search", 5).await;
    clock.advance(Duration::from_secs(30));

    // Exactly one probe is permitted and it succeeds
    let result = registry
        .guard("search", Duration::from_secs(5), async { Ok(7u32) })
        .await;
    assert_eq!(result.unwrap(), 7);

    let breaker = registry.endpoint("search");
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test]
async fn failed_probe_reopens_with_longer_recovery() {
    let (registry, clock) = registry();

    fail_n_times(&registry, "search", 5).await;
    clock.advance(Duration::from_secs(30));

    // Probe fails; the circuit reopens
    fail_n_times(&registry, "search", 1).await;
    assert_eq!(registry.endpoint("search").state(), BreakerState::Open);

    // The base 30s is no longer enough after one reopening
    clock.advance(Duration::from_secs(30));
    let result: Result<u32, _> = registry
        .guard("search", Duration::from_secs(5), async { Ok(1) })
        .await;
    assert!(matches!(result, Err(UpstreamFailure::ShortCircuited { .. })));

    // After the doubled timeout the probe is admitted and recovery works
    clock.advance(Duration::from_secs(30));
    let result = registry
        .guard("search", Duration::from_secs(5), async { Ok(1u32) })
        .await;
    assert!(result.is_ok());
    assert_eq!(registry.endpoint("search").state(), BreakerState::Closed);
}

#[tokio::test]
async fn concurrent_callers_during_half_open_share_one_probe() {
    let (registry, clock) = registry();
    let registry = Arc::new(registry);

    fail_n_times(&registry, "search", 5).await;
    clock.advance(Duration::from_secs(31));

    let invocations = Arc::new(AtomicU32::new(0));
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    // First caller claims the probe and holds it until released
    let probe_registry = Arc::clone(&registry);
    let probe_invocations = Arc::clone(&invocations);
    let probe = tokio::spawn(async move {
        probe_registry
            .guard("search", Duration::from_secs(60), async move {
                probe_invocations.fetch_add(1, Ordering::SeqCst);
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(1u32)
            })
            .await
    });

    started_rx.await.unwrap();

    // Callers arriving while the probe is in flight are short-circuited,
    // never allowed to send an independent probe
    for _ in 0..5 {
        let other_invocations = Arc::clone(&invocations);
        let result: Result<u32, _> = registry
            .guard("search", Duration::from_secs(5), async move {
                other_invocations.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await;
        assert!(matches!(result, Err(UpstreamFailure::ShortCircuited { .. })));
    }

    release_tx.send(()).unwrap();
    assert_eq!(probe.await.unwrap().unwrap(), 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 1, "exactly one probe ran");
    assert_eq!(registry.endpoint("search").state(), BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn timeouts_count_toward_the_failure_threshold() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let config = BreakerConfig {
        failure_threshold: 2,
        ..BreakerConfig::default()
    };
    let registry = BreakerRegistry::new(config, clock, Metrics::new());

    for _ in 0..2 {
        let result: Result<u32, _> = registry
            .guard("slow", Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1)
            })
            .await;
        assert!(matches!(result, Err(UpstreamFailure::Timeout { .. })));
    }

    assert_eq!(registry.endpoint("slow").state(), BreakerState::Open);
}

#[tokio::test]
async fn endpoints_fail_independently() {
    let (registry, _clock) = registry();

    fail_n_times(&registry, "failing", 5).await;
    assert_eq!(registry.endpoint("failing").state(), BreakerState::Open);

    let result = registry
        .guard("healthy", Duration::from_secs(5), async { Ok(1u32) })
        .await;
    assert!(result.is_ok());
    assert_eq!(registry.endpoint("healthy").state(), BreakerState::Closed);
}

#[tokio::test]
async fn metrics_track_short_circuits_and_failures() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let metrics = Metrics::new();
    let registry = BreakerRegistry::new(BreakerConfig::default(), clock, metrics.clone());

    fail_n_times(&registry, "search", 5).await;
    let _: Result<u32, _> = registry
        .guard("search", Duration::from_secs(5), async { Ok(1) })
        .await;

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.upstream_failures, 5);
    assert_eq!(snapshot.short_circuited, 1);
}
