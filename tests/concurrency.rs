//! Concurrency ceiling invariants under contention.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use upstream_guard::infrastructure::mocks::MockClock;
use upstream_guard::{LimitDimension, RateLimiter, TierLimits};

fn limits(max_concurrent: u32) -> TierLimits {
    TierLimits {
        requests_per_minute: 1_000_000,
        requests_per_hour: 1_000_000,
        requests_per_day: 1_000_000,
        burst_allowance: 0,
        max_concurrent,
    }
}

#[test]
fn ceiling_is_never_exceeded_and_counter_drains_to_zero() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let limiter = Arc::new(RateLimiter::new(clock));
    let limits = limits(4);

    let peak = Arc::new(AtomicU32::new(0));
    let in_flight = Arc::new(AtomicU32::new(0));
    let acquired = Arc::new(AtomicU32::new(0));
    let mut handles = vec![];

    for _ in 0..32 {
        let limiter = Arc::clone(&limiter);
        let peak = Arc::clone(&peak);
        let in_flight = Arc::clone(&in_flight);
        let acquired = Arc::clone(&acquired);
        handles.push(thread::spawn(move || {
            for _ in 0..500 {
                if let Ok(permit) = limiter.acquire("shared", &limits) {
                    acquired.fetch_add(1, Ordering::SeqCst);
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(
        peak.load(Ordering::SeqCst) <= 4,
        "in-flight count exceeded the ceiling: {}",
        peak.load(Ordering::SeqCst)
    );
    assert!(acquired.load(Ordering::SeqCst) > 0, "nothing was admitted");

    let status = limiter.status("shared", "any", &limits);
    assert_eq!(status.concurrency_active, 0, "slots must drain to zero");
}

#[test]
fn every_acquire_is_matched_by_exactly_one_release() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let limiter = Arc::new(RateLimiter::new(clock));
    let limits = limits(2);

    // Acquire to the ceiling, then release in a different order
    let p1 = limiter.acquire("alice", &limits).unwrap();
    let p2 = limiter.acquire("alice", &limits).unwrap();

    let denial = limiter.acquire("alice", &limits).unwrap_err();
    assert_eq!(denial.dimension, LimitDimension::Concurrency);

    drop(p2);
    let p3 = limiter.acquire("alice", &limits).unwrap();
    drop(p1);
    drop(p3);

    let status = limiter.status("alice", "any", &limits);
    assert_eq!(status.concurrency_active, 0);
}

#[test]
fn release_happens_even_when_the_holder_panics() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let limiter = Arc::new(RateLimiter::new(clock));
    let limits = limits(1);

    let limiter_clone = Arc::clone(&limiter);
    let result = thread::spawn(move || {
        let _permit = limiter_clone.acquire("alice", &limits).unwrap();
        panic!("simulated handler panic");
    })
    .join();
    assert!(result.is_err());

    // The unwound thread's permit was dropped; the slot is free again
    assert!(limiter.acquire("alice", &limits).is_ok());
}

#[test]
fn identities_have_independent_ceilings() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let limiter = RateLimiter::new(clock);
    let limits = limits(1);

    let _alice = limiter.acquire("alice", &limits).unwrap();
    assert!(limiter.acquire("alice", &limits).is_err());
    assert!(limiter.acquire("bob", &limits).is_ok());
}

#[tokio::test]
async fn permit_is_released_when_a_task_is_cancelled() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let limiter = Arc::new(RateLimiter::new(clock));
    let limits = limits(1);

    let limiter_clone = Arc::clone(&limiter);
    let task = tokio::spawn(async move {
        let _permit = limiter_clone.acquire("alice", &limits).unwrap();
        // Hold the permit across a suspension point forever
        std::future::pending::<()>().await;
    });

    // Let the task run far enough to acquire
    tokio::task::yield_now().await;
    assert!(limiter.acquire("alice", &limits).is_err());

    // Cancellation drops the task's stack, releasing the permit
    task.abort();
    let _ = task.await;
    assert!(limiter.acquire("alice", &limits).is_ok());
}
