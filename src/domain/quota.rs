//! Quota accounting algorithms.
//!
//! Pure state machines for the three admission dimensions: a lazily refilled
//! token bucket for the per-minute scope and weighted sliding window logs for
//! the hour and day scopes. No clock reads happen here; callers pass the
//! current instant in, which keeps the logic deterministic under test.
//!
//! Each algorithm separates *evaluation* from *commit* so a request is only
//! charged once every dimension has admitted it. A denied request must not
//! consume quota in any dimension.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Token bucket with continuous refill computed lazily from elapsed time.
///
/// Capacity bounds the burst; the refill rate bounds the sustained rate.
/// There is no background ticking: the level is brought forward on each
/// evaluation from the elapsed time since the last refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_per_second: f64, now: Instant) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_second,
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    /// Bring the token level forward to `now`.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// Tokens currently available (as of the last refill).
    pub fn available(&self) -> f64 {
        self.tokens
    }

    /// Check whether `cost` tokens are available.
    ///
    /// Returns `Ok(())` when the request could be admitted, or the time until
    /// enough tokens accumulate. Does not consume anything; call
    /// [`TokenBucket::commit`] once every dimension has admitted the request.
    pub fn evaluate(&self, cost: u32) -> Result<(), Duration> {
        let cost = f64::from(cost);
        if self.tokens >= cost {
            Ok(())
        } else {
            let shortfall = cost - self.tokens;
            Err(Duration::from_secs_f64(shortfall / self.refill_per_second))
        }
    }

    /// Consume `cost` tokens. Call only after [`TokenBucket::evaluate`]
    /// admitted the same cost at the same instant.
    pub fn commit(&mut self, cost: u32) {
        self.tokens -= f64::from(cost);
    }

    /// Time until the bucket is full again, rounded up to whole seconds.
    pub fn time_to_full(&self) -> Duration {
        let missing = self.capacity - self.tokens;
        if missing <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs((missing / self.refill_per_second).ceil() as u64)
        }
    }
}

/// Sliding window log counting admitted requests within a trailing interval.
///
/// Each admitted request is recorded with its cost so a single expensive
/// request can consume more than one unit of the window's limit. The window
/// is inclusive of `now` and exclusive of `now - window`: an entry exits the
/// window once `now - timestamp >= window`.
#[derive(Debug, Clone)]
pub struct WindowLog {
    window: Duration,
    limit: u32,
    entries: VecDeque<(Instant, u32)>,
    in_window: u32,
}

impl WindowLog {
    /// Create an empty log for a `window`-long trailing interval.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            window,
            limit,
            entries: VecDeque::new(),
            in_window: 0,
        }
    }

    /// Drop entries that have exited the trailing window.
    pub fn expire(&mut self, now: Instant) {
        while let Some(&(oldest, cost)) = self.entries.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.entries.pop_front();
                self.in_window -= cost;
            } else {
                break;
            }
        }
    }

    /// Weighted count of requests currently inside the window.
    pub fn count(&self) -> u32 {
        self.in_window
    }

    /// Check whether a request of `cost` fits under the limit.
    ///
    /// Returns `Ok(())` when it fits, or the time until the oldest in-window
    /// entry exits. Call [`WindowLog::expire`] first; does not record
    /// anything.
    pub fn evaluate(&self, cost: u32, now: Instant) -> Result<(), Duration> {
        if self.in_window.saturating_add(cost) <= self.limit {
            Ok(())
        } else {
            Err(self.retry_after(now))
        }
    }

    /// Record an admitted request.
    pub fn commit(&mut self, now: Instant, cost: u32) {
        self.entries.push_back((now, cost));
        self.in_window += cost;
    }

    /// Time until the oldest in-window entry exits the window.
    pub fn retry_after(&self, now: Instant) -> Duration {
        match self.entries.front() {
            Some(&(oldest, _)) => (oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Remaining capacity under the limit.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.in_window)
    }
}
