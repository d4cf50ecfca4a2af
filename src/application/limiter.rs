//! Rate limiter coordination logic.
//!
//! Admits or denies a request based on per-identity, per-tier quotas across
//! three time scales plus a concurrency ceiling. Dimensions are evaluated
//! cheapest first and a request is charged only when every dimension has
//! admitted it; the first dimension to deny determines the reported
//! dimension and retry delay.
//!
//! Concurrency is modeled as scoped acquisition: [`RateLimiter::acquire`]
//! returns an RAII [`ConcurrencyPermit`] whose drop releases the slot on
//! every exit path, including panic and future cancellation.

use crate::application::ports::Clock;
use crate::domain::quota::{TokenBucket, WindowLog};
use crate::domain::tier::TierLimits;
use crate::infrastructure::storage::ShardedStorage;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Admission dimension that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitDimension {
    /// Concurrent in-flight ceiling
    Concurrency,
    /// Per-minute token bucket
    PerMinute,
    /// Trailing-hour sliding window
    PerHour,
    /// Trailing-day sliding window
    PerDay,
}

impl LimitDimension {
    /// Stable machine name for the dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitDimension::Concurrency => "concurrency",
            LimitDimension::PerMinute => "per_minute",
            LimitDimension::PerHour => "per_hour",
            LimitDimension::PerDay => "per_day",
        }
    }
}

/// A denied admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Dimension that denied the request
    pub dimension: LimitDimension,
    /// Time until a retry could be admitted
    pub retry_after: Duration,
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rate limit exceeded on {} dimension, retry after {:.1}s",
            self.dimension.as_str(),
            self.retry_after.as_secs_f64()
        )
    }
}

/// Configuration for rate limiter housekeeping.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Quota state for identities idle longer than this is reclaimed
    pub idle_expiry: Duration,
    /// Retry hint reported on concurrency denials, which have no
    /// computable horizon
    pub concurrency_retry_hint: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            idle_expiry: Duration::from_secs(900),
            concurrency_retry_hint: Duration::from_secs(1),
        }
    }
}

/// Per-identity counter of in-flight requests.
///
/// Acquisition uses a compare-and-swap loop so the counter never exceeds
/// the ceiling, not even transiently under contention.
#[derive(Debug, Default)]
pub struct ConcurrencySlot {
    active: AtomicU32,
}

impl ConcurrencySlot {
    /// Number of requests currently in flight.
    pub fn active(&self) -> u32 {
        self.active.load(Ordering::Acquire)
    }

    fn try_acquire(self: &Arc<Self>, ceiling: u32) -> Option<ConcurrencyPermit> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= ceiling {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ConcurrencyPermit {
                        slot: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// RAII guard for an acquired concurrency slot.
///
/// Dropping the permit releases the slot. Exactly one release happens per
/// successful acquire, regardless of how the wrapped operation exits.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    slot: Arc<ConcurrencySlot>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.slot.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-scope slice of the rate-limit status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScopeStatus {
    /// Configured ceiling for the scope
    pub limit: u32,
    /// Requests still admissible right now
    pub remaining: u32,
    /// Seconds until the scope has fully reset
    pub reset_after_secs: u64,
}

/// Snapshot of one identity's standing across every admission dimension.
///
/// Consumed by an external status-reporting collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Per-minute token bucket scope
    pub per_minute: ScopeStatus,
    /// Trailing-hour window scope
    pub per_hour: ScopeStatus,
    /// Trailing-day window scope
    pub per_day: ScopeStatus,
    /// Concurrency ceiling
    pub concurrency_limit: u32,
    /// Requests currently in flight
    pub concurrency_active: u32,
}

/// Key for per-(identity, tier) quota state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuotaKey {
    identity: String,
    tier: String,
}

/// Mutable quota counters for one (identity, tier) pair.
#[derive(Debug)]
struct QuotaState {
    bucket: TokenBucket,
    hour: WindowLog,
    day: WindowLog,
    last_seen: Instant,
}

impl QuotaState {
    fn new(limits: &TierLimits, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(limits.bucket_capacity(), limits.refill_per_second(), now),
            hour: WindowLog::new(limits.requests_per_hour, HOUR),
            day: WindowLog::new(limits.requests_per_day, DAY),
            last_seen: now,
        }
    }

    /// Evaluate all three time scopes and commit only on full admission.
    fn admit(&mut self, cost: u32, now: Instant) -> Result<(), Denial> {
        self.last_seen = now;
        self.bucket.refill(now);
        self.hour.expire(now);
        self.day.expire(now);

        if let Err(retry_after) = self.bucket.evaluate(cost) {
            return Err(Denial {
                dimension: LimitDimension::PerMinute,
                retry_after,
            });
        }
        if let Err(retry_after) = self.hour.evaluate(cost, now) {
            return Err(Denial {
                dimension: LimitDimension::PerHour,
                retry_after,
            });
        }
        if let Err(retry_after) = self.day.evaluate(cost, now) {
            return Err(Denial {
                dimension: LimitDimension::PerDay,
                retry_after,
            });
        }

        self.bucket.commit(cost);
        self.hour.commit(now, cost);
        self.day.commit(now, cost);
        Ok(())
    }
}

/// Admission control across three time scales plus a concurrency ceiling.
///
/// State is created lazily per (identity, tier) on first reference and
/// reclaimed by [`RateLimiter::evict_idle`]. All quota mutation happens
/// inside the sharded storage's per-entry critical section, so no update
/// is lost under arbitrary interleaving and denied requests consume
/// nothing.
#[derive(Debug)]
pub struct RateLimiter {
    quotas: ShardedStorage<QuotaKey, QuotaState>,
    slots: ShardedStorage<String, Arc<ConcurrencySlot>>,
    clock: Arc<dyn Clock>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    /// Create a rate limiter with default housekeeping configuration.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, RateLimiterConfig::default())
    }

    /// Create a rate limiter with custom housekeeping configuration.
    pub fn with_config(clock: Arc<dyn Clock>, config: RateLimiterConfig) -> Self {
        Self {
            quotas: ShardedStorage::new(),
            slots: ShardedStorage::new(),
            clock,
            config,
        }
    }

    /// Acquire a concurrency slot for an identity.
    ///
    /// Denied when the identity already has `max_concurrent` requests in
    /// flight. The returned permit releases the slot when dropped.
    pub fn acquire(
        &self,
        identity: &str,
        limits: &TierLimits,
    ) -> Result<ConcurrencyPermit, Denial> {
        let slot = self.slots.with_entry_mut(
            identity.to_string(),
            || Arc::new(ConcurrencySlot::default()),
            |slot| Arc::clone(slot),
        );

        slot.try_acquire(limits.max_concurrent).ok_or(Denial {
            dimension: LimitDimension::Concurrency,
            retry_after: self.config.concurrency_retry_hint,
        })
    }

    /// Check the three time-scope quotas for a request of `cost`.
    ///
    /// All scopes must admit; the first to deny determines the reported
    /// dimension and retry delay, and nothing is consumed on denial.
    pub fn check(
        &self,
        identity: &str,
        tier: &str,
        limits: &TierLimits,
        cost: u32,
    ) -> Result<(), Denial> {
        let now = self.clock.now();
        let key = QuotaKey {
            identity: identity.to_string(),
            tier: tier.to_string(),
        };

        self.quotas
            .with_entry_mut(key, || QuotaState::new(limits, now), |state| {
                state.admit(cost, now)
            })
    }

    /// Snapshot one identity's standing across every dimension.
    pub fn status(&self, identity: &str, tier: &str, limits: &TierLimits) -> RateLimitStatus {
        let now = self.clock.now();
        let key = QuotaKey {
            identity: identity.to_string(),
            tier: tier.to_string(),
        };

        let (per_minute, per_hour, per_day) = self.quotas.with_entry_mut(
            key,
            || QuotaState::new(limits, now),
            |state| {
                state.bucket.refill(now);
                state.hour.expire(now);
                state.day.expire(now);

                let per_minute = ScopeStatus {
                    limit: limits.bucket_capacity(),
                    remaining: state.bucket.available().floor() as u32,
                    reset_after_secs: state.bucket.time_to_full().as_secs(),
                };
                let per_hour = ScopeStatus {
                    limit: limits.requests_per_hour,
                    remaining: state.hour.remaining(),
                    reset_after_secs: state.hour.retry_after(now).as_secs(),
                };
                let per_day = ScopeStatus {
                    limit: limits.requests_per_day,
                    remaining: state.day.remaining(),
                    reset_after_secs: state.day.retry_after(now).as_secs(),
                };
                (per_minute, per_hour, per_day)
            },
        );

        let concurrency_active = self
            .slots
            .with_entry(&identity.to_string(), |slot| slot.active())
            .unwrap_or(0);

        RateLimitStatus {
            per_minute,
            per_hour,
            per_day,
            concurrency_limit: limits.max_concurrent,
            concurrency_active,
        }
    }

    /// Reclaim quota state for identities idle longer than the configured
    /// expiry, and concurrency slots with no in-flight requests and no
    /// outstanding permits.
    pub fn evict_idle(&self) {
        let now = self.clock.now();
        let idle_expiry = self.config.idle_expiry;

        self.quotas
            .retain(|_, state| now.saturating_duration_since(state.last_seen) < idle_expiry);
        self.slots
            .retain(|_, slot| slot.active() > 0 || Arc::strong_count(slot) > 1);
    }

    /// Number of (identity, tier) pairs currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.quotas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;

    fn limits() -> TierLimits {
        TierLimits {
            requests_per_minute: 60,
            requests_per_hour: 1_000,
            requests_per_day: 10_000,
            burst_allowance: 0,
            max_concurrent: 3,
        }
    }

    fn limiter_with_clock() -> (RateLimiter, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(Instant::now()));
        (RateLimiter::new(clock.clone()), clock)
    }

    #[test]
    fn test_sixty_allowed_sixty_first_denied() {
        let (limiter, _clock) = limiter_with_clock();
        let limits = limits();

        // 60 rapid requests within the same window all pass
        for _ in 0..60 {
            limiter.check("alice", "basic", &limits, 1).unwrap();
        }

        // The 61st is denied by the per-minute dimension with a positive
        // retry delay (one token at 1 token/sec)
        let denial = limiter.check("alice", "basic", &limits, 1).unwrap_err();
        assert_eq!(denial.dimension, LimitDimension::PerMinute);
        assert!(denial.retry_after > Duration::ZERO);
        assert_eq!(denial.retry_after, Duration::from_secs(1));
    }

    #[test]
    fn test_burst_then_denial_with_refill_retry() {
        let (limiter, _clock) = limiter_with_clock();
        let limits = TierLimits {
            requests_per_minute: 60,
            requests_per_hour: 1_000,
            requests_per_day: 10_000,
            burst_allowance: 10,
            max_concurrent: 10,
        };

        // 70 rapid requests consume the full burst capacity
        for i in 0..70 {
            limiter
                .check("bob", "basic", &limits, 1)
                .unwrap_or_else(|d| panic!("request {} denied: {}", i, d));
        }

        // The 71st is denied with retry_after equal to one token's refill
        let denial = limiter.check("bob", "basic", &limits, 1).unwrap_err();
        assert_eq!(denial.dimension, LimitDimension::PerMinute);
        assert_eq!(denial.retry_after, Duration::from_secs(1));
    }

    #[test]
    fn test_denied_requests_consume_nothing() {
        let (limiter, clock) = limiter_with_clock();
        let limits = TierLimits {
            requests_per_minute: 60,
            requests_per_hour: 2,
            requests_per_day: 10_000,
            burst_allowance: 0,
            max_concurrent: 10,
        };

        limiter.check("carol", "basic", &limits, 1).unwrap();
        limiter.check("carol", "basic", &limits, 1).unwrap();

        // Repeated denials must not extend the hour window
        for _ in 0..5 {
            let denial = limiter.check("carol", "basic", &limits, 1).unwrap_err();
            assert_eq!(denial.dimension, LimitDimension::PerHour);
        }

        // Once the two admitted requests leave the window, admission resumes
        clock.advance(Duration::from_secs(3601));
        assert!(limiter.check("carol", "basic", &limits, 1).is_ok());
    }

    #[test]
    fn test_hour_window_recovers() {
        let (limiter, clock) = limiter_with_clock();
        let limits = TierLimits {
            requests_per_minute: 1_000,
            requests_per_hour: 3,
            requests_per_day: 10_000,
            burst_allowance: 0,
            max_concurrent: 10,
        };

        for _ in 0..3 {
            limiter.check("dave", "basic", &limits, 1).unwrap();
        }
        let denial = limiter.check("dave", "basic", &limits, 1).unwrap_err();
        assert_eq!(denial.dimension, LimitDimension::PerHour);
        assert_eq!(denial.retry_after, Duration::from_secs(3600));

        clock.advance(Duration::from_secs(3600));
        assert!(limiter.check("dave", "basic", &limits, 1).is_ok());
    }

    #[test]
    fn test_day_window_denies() {
        let (limiter, _clock) = limiter_with_clock();
        let limits = TierLimits {
            requests_per_minute: 1_000,
            requests_per_hour: 1_000,
            requests_per_day: 2,
            burst_allowance: 0,
            max_concurrent: 10,
        };

        limiter.check("erin", "basic", &limits, 1).unwrap();
        limiter.check("erin", "basic", &limits, 1).unwrap();
        let denial = limiter.check("erin", "basic", &limits, 1).unwrap_err();
        assert_eq!(denial.dimension, LimitDimension::PerDay);
    }

    #[test]
    fn test_cost_weighted_admission() {
        let (limiter, _clock) = limiter_with_clock();
        let limits = TierLimits {
            requests_per_minute: 10,
            requests_per_hour: 1_000,
            requests_per_day: 10_000,
            burst_allowance: 0,
            max_concurrent: 10,
        };

        limiter.check("frank", "basic", &limits, 8).unwrap();
        let denial = limiter.check("frank", "basic", &limits, 8).unwrap_err();
        assert_eq!(denial.dimension, LimitDimension::PerMinute);
        assert!(limiter.check("frank", "basic", &limits, 2).is_ok());
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _clock) = limiter_with_clock();
        let limits = TierLimits {
            requests_per_minute: 1,
            requests_per_hour: 1_000,
            requests_per_day: 10_000,
            burst_allowance: 0,
            max_concurrent: 10,
        };

        limiter.check("alice", "basic", &limits, 1).unwrap();
        assert!(limiter.check("alice", "basic", &limits, 1).is_err());
        assert!(limiter.check("bob", "basic", &limits, 1).is_ok());
    }

    #[test]
    fn test_concurrency_ceiling() {
        let (limiter, _clock) = limiter_with_clock();
        let limits = limits();

        let p1 = limiter.acquire("alice", &limits).unwrap();
        let _p2 = limiter.acquire("alice", &limits).unwrap();
        let _p3 = limiter.acquire("alice", &limits).unwrap();

        let denial = limiter.acquire("alice", &limits).unwrap_err();
        assert_eq!(denial.dimension, LimitDimension::Concurrency);

        // Releasing one slot re-admits
        drop(p1);
        assert!(limiter.acquire("alice", &limits).is_ok());
    }

    #[test]
    fn test_permit_released_on_panic() {
        let (limiter, _clock) = limiter_with_clock();
        let limits = limits();
        let limiter = Arc::new(limiter);

        let limiter_clone = Arc::clone(&limiter);
        let result = std::thread::spawn(move || {
            let _permit = limiter_clone.acquire("alice", &limits).unwrap();
            panic!("handler blew up");
        })
        .join();
        assert!(result.is_err());

        // The permit dropped during unwinding, so all slots are free
        let status = limiter.status("alice", "basic", &limits);
        assert_eq!(status.concurrency_active, 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_ceiling() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::thread;

        let (limiter, _clock) = limiter_with_clock();
        let limiter = Arc::new(limiter);
        let limits = TierLimits {
            requests_per_minute: 10_000,
            requests_per_hour: 100_000,
            requests_per_day: 1_000_000,
            burst_allowance: 0,
            max_concurrent: 4,
        };

        let peak = Arc::new(AtomicU32::new(0));
        let in_flight = Arc::new(AtomicU32::new(0));
        let mut handles = vec![];

        for _ in 0..16 {
            let limiter = Arc::clone(&limiter);
            let peak = Arc::clone(&peak);
            let in_flight = Arc::clone(&in_flight);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    if let Ok(permit) = limiter.acquire("shared", &limits) {
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

        assert!(peak.load(Ordering::SeqCst) <= 4);
        let status = limiter.status("shared", "basic", &limits);
        assert_eq!(status.concurrency_active, 0);
    }

    #[test]
    fn test_status_snapshot() {
        let (limiter, _clock) = limiter_with_clock();
        let limits = limits();

        limiter.check("alice", "basic", &limits, 10).unwrap();
        let _permit = limiter.acquire("alice", &limits).unwrap();

        let status = limiter.status("alice", "basic", &limits);
        assert_eq!(status.per_minute.limit, 60);
        assert_eq!(status.per_minute.remaining, 50);
        assert!(status.per_minute.reset_after_secs > 0);
        assert_eq!(status.per_hour.remaining, 990);
        assert_eq!(status.per_day.remaining, 9_990);
        assert_eq!(status.concurrency_limit, 3);
        assert_eq!(status.concurrency_active, 1);
    }

    #[test]
    fn test_evict_idle_reclaims_state() {
        let (limiter, clock) = limiter_with_clock();
        let limits = limits();

        limiter.check("alice", "basic", &limits, 1).unwrap();
        assert_eq!(limiter.tracked_identities(), 1);

        clock.advance(Duration::from_secs(901));
        limiter.evict_idle();
        assert_eq!(limiter.tracked_identities(), 0);
    }

    #[test]
    fn test_evict_idle_keeps_active_slots() {
        let (limiter, clock) = limiter_with_clock();
        let limits = limits();

        let _permit = limiter.acquire("alice", &limits).unwrap();
        clock.advance(Duration::from_secs(3600));
        limiter.evict_idle();

        // The slot survives while a permit is outstanding
        let status = limiter.status("alice", "basic", &limits);
        assert_eq!(status.concurrency_active, 1);
    }
}
