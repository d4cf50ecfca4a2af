//! Bounded local cache tier.
//!
//! A capacity-limited in-process map with TTL expiry and least-recently-used
//! eviction. This is the first tier checked on every cacheable lookup; the
//! shared distributed tier sits behind it.

use crate::domain::key::KeySelector;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A single cached entry.
#[derive(Debug)]
struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
    /// Nanoseconds since the cache epoch, updated on access for LRU
    last_access_nanos: AtomicU64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

/// Capacity-limited local cache with LRU eviction.
///
/// Reads are lock-free in the common case; eviction scans for the entry
/// with the oldest access time, which is acceptable at local-tier
/// capacities. An expired entry is never returned and is dropped on read.
#[derive(Debug)]
pub struct LocalCache {
    map: DashMap<String, CacheEntry, RandomState>,
    capacity: usize,
    epoch: Instant,
}

impl LocalCache {
    /// Create a cache bounded to `capacity` entries.
    pub fn new(capacity: usize, epoch: Instant) -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
            capacity,
            epoch,
        }
    }

    /// Look up a key, refreshing its access time on a hit.
    pub fn get(&self, key: &str, now: Instant) -> Option<serde_json::Value> {
        let mut expired = false;

        if let Some(entry) = self.map.get(key) {
            if entry.is_expired(now) {
                expired = true;
            } else {
                entry
                    .last_access_nanos
                    .store(self.nanos_since_epoch(now), Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }

        if expired {
            // Guard dropped above; safe to remove. Re-check expiry in case
            // a concurrent writer replaced the entry.
            self.map.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }

    /// Remaining TTL for a live entry.
    pub fn remaining_ttl(&self, key: &str, now: Instant) -> Option<Duration> {
        self.map.get(key).and_then(|entry| {
            let elapsed = now.saturating_duration_since(entry.inserted_at);
            entry.ttl.checked_sub(elapsed).filter(|d| !d.is_zero())
        })
    }

    /// Insert or replace an entry, evicting the least recently used entry
    /// if the cache is at capacity.
    pub fn insert(&self, key: String, value: serde_json::Value, ttl: Duration, now: Instant) {
        if !self.map.contains_key(&key) && self.map.len() >= self.capacity {
            self.evict_one(now);
        }

        let entry = CacheEntry {
            value,
            inserted_at: now,
            ttl,
            last_access_nanos: AtomicU64::new(self.nanos_since_epoch(now)),
        };
        self.map.insert(key, entry);
    }

    /// Remove entries matching a selector. Returns the number removed.
    pub fn remove_matching(&self, selector: &KeySelector) -> usize {
        let before = self.map.len();
        self.map.retain(|key, _| !selector.matches(key));
        before.saturating_sub(self.map.len())
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self, now: Instant) {
        self.map.retain(|_, entry| !entry.is_expired(now));
    }

    /// Number of entries currently held (including not-yet-purged expired
    /// ones).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.map.clear();
    }

    fn nanos_since_epoch(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    /// Make room for one insertion: expired entries first, then the least
    /// recently used survivor.
    fn evict_one(&self, now: Instant) {
        self.purge_expired(now);
        if self.map.len() < self.capacity {
            return;
        }

        let victim = self
            .map
            .iter()
            .min_by_key(|entry| entry.last_access_nanos.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.map.remove(&key);
        }
    }
}
