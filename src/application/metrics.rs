//! Observability metrics for the admission pipeline.
//!
//! Provides counters about admission decisions, cache effectiveness, and
//! upstream health for monitoring and debugging.

use crate::application::limiter::LimitDimension;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking pipeline statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Cloning is cheap and clones share the same underlying counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Requests that passed every admission dimension
    requests_admitted: AtomicU64,
    /// Denials by the concurrency ceiling
    denied_concurrency: AtomicU64,
    /// Denials by the per-minute token bucket
    denied_per_minute: AtomicU64,
    /// Denials by the trailing-hour window
    denied_per_hour: AtomicU64,
    /// Denials by the trailing-day window
    denied_per_day: AtomicU64,
    /// Cache hits served from the local tier
    cache_hits_local: AtomicU64,
    /// Cache hits served from the distributed tier
    cache_hits_distributed: AtomicU64,
    /// Cacheable lookups that missed both tiers
    cache_misses: AtomicU64,
    /// Calls rejected by an open circuit breaker
    short_circuited: AtomicU64,
    /// Handler invocations that returned a failure
    upstream_failures: AtomicU64,
    /// Handler invocations that exceeded the upstream timeout
    upstream_timeouts: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self, dimension: LimitDimension) {
        let counter = match dimension {
            LimitDimension::Concurrency => &self.inner.denied_concurrency,
            LimitDimension::PerMinute => &self.inner.denied_per_minute,
            LimitDimension::PerHour => &self.inner.denied_per_hour,
            LimitDimension::PerDay => &self.inner.denied_per_day,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit_local(&self) {
        self.inner.cache_hits_local.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit_distributed(&self) {
        self.inner
            .cache_hits_distributed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_short_circuited(&self) {
        self.inner.short_circuited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upstream_failure(&self) {
        self.inner.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upstream_timeout(&self) {
        self.inner.upstream_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests that passed every admission dimension.
    pub fn requests_admitted(&self) -> u64 {
        self.inner.requests_admitted.load(Ordering::Relaxed)
    }

    /// Total denials across all dimensions.
    pub fn requests_denied(&self) -> u64 {
        self.inner.denied_concurrency.load(Ordering::Relaxed)
            + self.inner.denied_per_minute.load(Ordering::Relaxed)
            + self.inner.denied_per_hour.load(Ordering::Relaxed)
            + self.inner.denied_per_day.load(Ordering::Relaxed)
    }

    /// Cache hits across both tiers.
    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits_local.load(Ordering::Relaxed)
            + self.inner.cache_hits_distributed.load(Ordering::Relaxed)
    }

    /// Calls rejected by an open circuit breaker.
    pub fn short_circuited(&self) -> u64 {
        self.inner.short_circuited.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_admitted: self.inner.requests_admitted.load(Ordering::Relaxed),
            denied_concurrency: self.inner.denied_concurrency.load(Ordering::Relaxed),
            denied_per_minute: self.inner.denied_per_minute.load(Ordering::Relaxed),
            denied_per_hour: self.inner.denied_per_hour.load(Ordering::Relaxed),
            denied_per_day: self.inner.denied_per_day.load(Ordering::Relaxed),
            cache_hits_local: self.inner.cache_hits_local.load(Ordering::Relaxed),
            cache_hits_distributed: self.inner.cache_hits_distributed.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            short_circuited: self.inner.short_circuited.load(Ordering::Relaxed),
            upstream_failures: self.inner.upstream_failures.load(Ordering::Relaxed),
            upstream_timeouts: self.inner.upstream_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    ///
    /// Useful for testing or when starting a new monitoring period.
    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.requests_admitted,
            &inner.denied_concurrency,
            &inner.denied_per_minute,
            &inner.denied_per_hour,
            &inner.denied_per_day,
            &inner.cache_hits_local,
            &inner.cache_hits_distributed,
            &inner.cache_misses,
            &inner.short_circuited,
            &inner.upstream_failures,
            &inner.upstream_timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Requests that passed every admission dimension
    pub requests_admitted: u64,
    /// Denials by the concurrency ceiling
    pub denied_concurrency: u64,
    /// Denials by the per-minute token bucket
    pub denied_per_minute: u64,
    /// Denials by the trailing-hour window
    pub denied_per_hour: u64,
    /// Denials by the trailing-day window
    pub denied_per_day: u64,
    /// Cache hits served from the local tier
    pub cache_hits_local: u64,
    /// Cache hits served from the distributed tier
    pub cache_hits_distributed: u64,
    /// Cacheable lookups that missed both tiers
    pub cache_misses: u64,
    /// Calls rejected by an open circuit breaker
    pub short_circuited: u64,
    /// Handler invocations that returned a failure
    pub upstream_failures: u64,
    /// Handler invocations that exceeded the upstream timeout
    pub upstream_timeouts: u64,
}

impl MetricsSnapshot {
    /// Total denials across all dimensions.
    pub fn total_denied(&self) -> u64 {
        self.denied_concurrency
            + self.denied_per_minute
            + self.denied_per_hour
            + self.denied_per_day
    }

    /// Ratio of denied requests to total admission decisions.
    /// Returns 0.0 if no requests have been processed.
    pub fn denial_rate(&self) -> f64 {
        let total = self.requests_admitted.saturating_add(self.total_denied());
        if total == 0 {
            0.0
        } else {
            self.total_denied() as f64 / total as f64
        }
    }

    /// Ratio of cache hits to total cacheable lookups.
    /// Returns 0.0 if no cacheable lookups have happened.
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits_local + self.cache_hits_distributed;
        let total = hits.saturating_add(self.cache_misses);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
