//! Admission properties across the three time scopes.

use std::sync::Arc;
use std::time::{Duration, Instant};
use upstream_guard::infrastructure::mocks::MockClock;
use upstream_guard::{LimitDimension, RateLimiter, TierLimits};

fn limiter() -> (RateLimiter, Arc<MockClock>) {
    let clock = Arc::new(MockClock::new(Instant::now()));
    (RateLimiter::new(clock.clone()), clock)
}

#[test]
fn sixty_per_minute_tier_denies_the_sixty_first() {
    let (limiter, _clock) = limiter();
    let limits = TierLimits {
        requests_per_minute: 60,
        requests_per_hour: 10_000,
        requests_per_day: 100_000,
        burst_allowance: 0,
        max_concurrent: 10,
    };

    for i in 0..60 {
        limiter
            .check("alice", "basic", &limits, 1)
            .unwrap_or_else(|d| panic!("request {} unexpectedly denied: {}", i + 1, d));
    }

    let denial = limiter.check("alice", "basic", &limits, 1).unwrap_err();
    assert_eq!(denial.dimension, LimitDimension::PerMinute);
    assert!(denial.retry_after > Duration::ZERO);
}

#[test]
fn burst_allowance_admits_seventy_then_denies_with_refill_delay() {
    let (limiter, _clock) = limiter();
    let limits = TierLimits {
        requests_per_minute: 60,
        requests_per_hour: 10_000,
        requests_per_day: 100_000,
        burst_allowance: 10,
        max_concurrent: 10,
    };

    // 70 requests in rapid succession within one second are all admitted
    for i in 0..70 {
        limiter
            .check("bob", "basic", &limits, 1)
            .unwrap_or_else(|d| panic!("request {} unexpectedly denied: {}", i + 1, d));
    }

    // The 71st is denied; retry_after is the time until one token refills
    let denial = limiter.check("bob", "basic", &limits, 1).unwrap_err();
    assert_eq!(denial.dimension, LimitDimension::PerMinute);
    assert_eq!(denial.retry_after, Duration::from_secs(1));
}

#[test]
fn tokens_refill_while_time_passes() {
    let (limiter, clock) = limiter();
    let limits = TierLimits {
        requests_per_minute: 60,
        requests_per_hour: 10_000,
        requests_per_day: 100_000,
        burst_allowance: 0,
        max_concurrent: 10,
    };

    for _ in 0..60 {
        limiter.check("carol", "basic", &limits, 1).unwrap();
    }
    assert!(limiter.check("carol", "basic", &limits, 1).is_err());

    // One token per second at 60/min
    clock.advance(Duration::from_secs(5));
    for _ in 0..5 {
        limiter.check("carol", "basic", &limits, 1).unwrap();
    }
    assert!(limiter.check("carol", "basic", &limits, 1).is_err());
}

#[test]
fn hour_window_denies_and_recovers() {
    let (limiter, clock) = limiter();
    let limits = TierLimits {
        requests_per_minute: 10_000,
        requests_per_hour: 5,
        requests_per_day: 100_000,
        burst_allowance: 0,
        max_concurrent: 10,
    };

    for _ in 0..5 {
        limiter.check("dave", "basic", &limits, 1).unwrap();
    }

    let denial = limiter.check("dave", "basic", &limits, 1).unwrap_err();
    assert_eq!(denial.dimension, LimitDimension::PerHour);
    assert_eq!(denial.retry_after, Duration::from_secs(3600));

    // Once the oldest admitted request exits the trailing hour, one more
    // slot opens
    clock.advance(Duration::from_secs(3600));
    assert!(limiter.check("dave", "basic", &limits, 1).is_ok());
}

#[test]
fn day_window_is_the_last_line() {
    let (limiter, clock) = limiter();
    let limits = TierLimits {
        requests_per_minute: 10_000,
        requests_per_hour: 10_000,
        requests_per_day: 3,
        burst_allowance: 0,
        max_concurrent: 10,
    };

    for _ in 0..3 {
        limiter.check("erin", "basic", &limits, 1).unwrap();
        clock.advance(Duration::from_secs(60));
    }

    let denial = limiter.check("erin", "basic", &limits, 1).unwrap_err();
    assert_eq!(denial.dimension, LimitDimension::PerDay);
    // Oldest request entered 180s ago; it exits the day window in
    // 86400 - 180 seconds
    assert_eq!(denial.retry_after, Duration::from_secs(86_400 - 180));
}

#[test]
fn denied_requests_do_not_consume_quota() {
    let (limiter, clock) = limiter();
    let limits = TierLimits {
        requests_per_minute: 10_000,
        requests_per_hour: 2,
        requests_per_day: 100_000,
        burst_allowance: 0,
        max_concurrent: 10,
    };

    limiter.check("frank", "basic", &limits, 1).unwrap();
    limiter.check("frank", "basic", &limits, 1).unwrap();

    // Hammer the denied path; none of these may extend the window
    for _ in 0..100 {
        assert!(limiter.check("frank", "basic", &limits, 1).is_err());
    }

    clock.advance(Duration::from_secs(3600));
    assert!(limiter.check("frank", "basic", &limits, 1).is_ok());
}

#[test]
fn status_surface_reports_all_scopes() {
    let (limiter, _clock) = limiter();
    let limits = TierLimits {
        requests_per_minute: 60,
        requests_per_hour: 1_000,
        requests_per_day: 10_000,
        burst_allowance: 10,
        max_concurrent: 5,
    };

    for _ in 0..7 {
        limiter.check("grace", "basic", &limits, 1).unwrap();
    }
    let _permit = limiter.acquire("grace", &limits).unwrap();

    let status = limiter.status("grace", "basic", &limits);
    assert_eq!(status.per_minute.limit, 70);
    assert_eq!(status.per_minute.remaining, 63);
    assert_eq!(status.per_hour.limit, 1_000);
    assert_eq!(status.per_hour.remaining, 993);
    assert_eq!(status.per_day.limit, 10_000);
    assert_eq!(status.per_day.remaining, 9_993);
    assert_eq!(status.concurrency_limit, 5);
    assert_eq!(status.concurrency_active, 1);

    // The surface serializes for external status reporting
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["per_minute"]["remaining"], 63);
    assert_eq!(json["concurrency_active"], 1);
}
