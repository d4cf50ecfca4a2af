//! Circuit breaker for upstream fail-fast isolation.
//!
//! Tracks upstream health per logical endpoint and short-circuits calls
//! while the upstream is deemed unhealthy, bounding the blast radius of an
//! outage. While Open, the wrapped operation is never invoked; after the
//! recovery timeout elapses, exactly one probe request is let through to
//! test recovery.

use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, HandlerFailure};
use crate::infrastructure::storage::ShardedStorage;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, calls pass through
    Closed = 0,
    /// Short-circuiting, calls fail fast
    Open = 1,
    /// Testing recovery with a single probe
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(value: u8) -> Self {
        match value {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl BreakerState {
    /// Stable state name for the status surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Base duration to wait before attempting recovery
    pub recovery_timeout: Duration,
    /// Multiplier applied to the recovery timeout per reopening
    pub backoff_factor: f64,
    /// Ceiling for the backed-off recovery timeout
    pub max_recovery_timeout: Duration,
    /// Retry hint reported while another caller holds the probe
    pub probe_retry_hint: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
            probe_retry_hint: Duration::from_secs(1),
        }
    }
}

/// Outcome of asking the breaker to admit a call.
#[derive(Debug)]
pub enum Admission {
    /// Circuit is closed; proceed normally
    Pass,
    /// Circuit is half-open and this caller won the single probe
    Probe(ProbeToken),
    /// Circuit is open or the probe is taken; fail fast
    Rejected {
        /// Time until the next admission attempt could succeed
        retry_after: Duration,
    },
}

/// Exclusive claim on the half-open probe.
///
/// Dropping the token releases the probe flag, so a cancelled or panicking
/// probe never wedges the breaker in a probe-less HalfOpen state.
#[derive(Debug)]
pub struct ProbeToken {
    breaker: Arc<EndpointBreaker>,
}

impl Drop for ProbeToken {
    fn drop(&mut self) {
        self.breaker.probe_in_flight.store(false, Ordering::Release);
    }
}

/// Health tracking for a single upstream endpoint.
///
/// State changes happen only through compare-and-swap transitions on an
/// atomic state byte; the probe flag is the one piece of state with a
/// strict mutual-exclusion guarantee.
#[derive(Debug)]
pub struct EndpointBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_nanos: AtomicU64,
    reopen_count: AtomicU32,
    probe_in_flight: AtomicBool,
    config: BreakerConfig,
    /// Reference epoch for timestamp storage
    epoch: Instant,
}

impl EndpointBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig, epoch: Instant) -> Self {
        Self {
            state: AtomicU8::new(BreakerState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at_nanos: AtomicU64::new(0),
            reopen_count: AtomicU32::new(0),
            probe_in_flight: AtomicBool::new(false),
            config,
            epoch,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::Acquire))
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Decide whether a call may proceed at `now`.
    pub fn admit(self: &Arc<Self>, now: Instant) -> Admission {
        match self.state() {
            BreakerState::Closed => Admission::Pass,
            BreakerState::Open => {
                let elapsed = now.saturating_duration_since(self.opened_at());
                let required = self.current_recovery_timeout();

                if elapsed < required {
                    return Admission::Rejected {
                        retry_after: required - elapsed,
                    };
                }

                // Recovery timeout elapsed; move to HalfOpen. Either this
                // CAS wins or another caller already transitioned.
                let _ = self.state.compare_exchange(
                    BreakerState::Open as u8,
                    BreakerState::HalfOpen as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                self.claim_probe()
            }
            BreakerState::HalfOpen => self.claim_probe(),
        }
    }

    fn claim_probe(self: &Arc<Self>) -> Admission {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Admission::Probe(ProbeToken {
                breaker: Arc::clone(self),
            })
        } else {
            Admission::Rejected {
                retry_after: self.config.probe_retry_hint,
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.reopen_count.store(0, Ordering::Release);
                self.state
                    .store(BreakerState::Closed as u8, Ordering::Release);
                tracing::debug!("circuit closed after successful probe");
            }
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call at `now`.
    pub fn record_failure(&self, now: Instant) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        match self.state() {
            BreakerState::HalfOpen => {
                // Probe failed; reopen with a longer recovery timeout
                self.set_opened_at(now);
                self.reopen_count.fetch_add(1, Ordering::Relaxed);
                self.state
                    .store(BreakerState::Open as u8, Ordering::Release);
                tracing::warn!(
                    reopen_count = self.reopen_count.load(Ordering::Relaxed),
                    "circuit reopened after failed probe"
                );
            }
            BreakerState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.set_opened_at(now);
                    self.state
                        .store(BreakerState::Open as u8, Ordering::Release);
                    tracing::warn!(
                        consecutive_failures = failures,
                        "circuit opened after consecutive failures"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Reset to the closed state.
    pub fn reset(&self) {
        self.state
            .store(BreakerState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.reopen_count.store(0, Ordering::Release);
    }

    /// Recovery timeout with exponential backoff applied for repeated
    /// reopenings, capped at the configured maximum.
    fn current_recovery_timeout(&self) -> Duration {
        let reopens = self.reopen_count.load(Ordering::Relaxed);
        let scaled = self.config.recovery_timeout.as_secs_f64()
            * self.config.backoff_factor.powi(reopens as i32);
        Duration::from_secs_f64(scaled).min(self.config.max_recovery_timeout)
    }

    fn opened_at(&self) -> Instant {
        let nanos = self.opened_at_nanos.load(Ordering::Acquire);
        self.epoch + Duration::from_nanos(nanos)
    }

    fn set_opened_at(&self, now: Instant) {
        let nanos = now
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX);
        self.opened_at_nanos.store(nanos, Ordering::Release);
    }
}

/// Failure surfaced by a guarded upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// The breaker is open; the handler was never invoked
    ShortCircuited {
        /// Time until the breaker will admit another attempt
        retry_after: Duration,
    },
    /// The handler exceeded the bounded upstream timeout
    Timeout {
        /// The timeout that was applied
        limit: Duration,
    },
    /// The handler reported an upstream failure
    Failed {
        /// Failure description from the handler
        message: String,
    },
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamFailure::ShortCircuited { retry_after } => write!(
                f,
                "upstream short-circuited, retry after {:.1}s",
                retry_after.as_secs_f64()
            ),
            UpstreamFailure::Timeout { limit } => {
                write!(f, "upstream call exceeded {:.1}s timeout", limit.as_secs_f64())
            }
            UpstreamFailure::Failed { message } => write!(f, "upstream call failed: {}", message),
        }
    }
}

impl std::error::Error for UpstreamFailure {}

/// Per-endpoint breakers, created lazily on first reference.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: ShardedStorage<String, Arc<EndpointBreaker>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    epoch: Instant,
}

impl BreakerRegistry {
    /// Create a registry applying `config` to every endpoint.
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>, metrics: Metrics) -> Self {
        let epoch = clock.now();
        Self {
            breakers: ShardedStorage::new(),
            config,
            clock,
            metrics,
            epoch,
        }
    }

    /// Get or create the breaker for an endpoint.
    pub fn endpoint(&self, name: &str) -> Arc<EndpointBreaker> {
        let config = self.config.clone();
        let epoch = self.epoch;
        self.breakers.with_entry_mut(
            name.to_string(),
            || Arc::new(EndpointBreaker::new(config, epoch)),
            |breaker| Arc::clone(breaker),
        )
    }

    /// Run `operation` under the endpoint's breaker with a bounded timeout.
    ///
    /// While Open the operation is never polled; the call returns
    /// immediately as [`UpstreamFailure::ShortCircuited`]. Timeouts and
    /// handler failures count against the breaker; the probe claim is
    /// released on every exit path.
    pub async fn guard<T, F>(
        &self,
        endpoint: &str,
        upstream_timeout: Duration,
        operation: F,
    ) -> Result<T, UpstreamFailure>
    where
        F: Future<Output = Result<T, HandlerFailure>>,
    {
        let breaker = self.endpoint(endpoint);

        let _probe = match breaker.admit(self.clock.now()) {
            Admission::Pass => None,
            Admission::Probe(token) => Some(token),
            Admission::Rejected { retry_after } => {
                self.metrics.record_short_circuited();
                tracing::debug!(endpoint, "call short-circuited by open breaker");
                return Err(UpstreamFailure::ShortCircuited { retry_after });
            }
        };

        match tokio::time::timeout(upstream_timeout, operation).await {
            Ok(Ok(value)) => {
                breaker.record_success();
                Ok(value)
            }
            Ok(Err(failure)) => {
                breaker.record_failure(self.clock.now());
                self.metrics.record_upstream_failure();
                tracing::warn!(endpoint, error = %failure, "upstream call failed");
                Err(UpstreamFailure::Failed {
                    message: failure.message,
                })
            }
            Err(_) => {
                breaker.record_failure(self.clock.now());
                self.metrics.record_upstream_timeout();
                tracing::warn!(
                    endpoint,
                    timeout_secs = upstream_timeout.as_secs_f64(),
                    "upstream call timed out"
                );
                Err(UpstreamFailure::Timeout {
                    limit: upstream_timeout,
                })
            }
        }
    }

    /// Current state of every tracked endpoint.
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let mut states = Vec::new();
        self.breakers
            .for_each(|name, breaker| states.push((name.clone(), breaker.state())));
        states
    }

    /// Reset a single endpoint's breaker to Closed.
    pub fn reset(&self, endpoint: &str) {
        if let Some(breaker) = self.breakers.with_entry(&endpoint.to_string(), Arc::clone) {
            breaker.reset();
        }
    }
}
