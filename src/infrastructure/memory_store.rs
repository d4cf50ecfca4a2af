//! In-process shared store adapter.
//!
//! Implements the [`SharedStore`] port over a sharded in-memory map with
//! per-key TTL semantics. Used for single-node deployments and tests; the
//! Redis adapter (feature `redis-store`) provides the multi-node backend
//! with the same contract.

use crate::application::ports::{Clock, SharedStore, StoreError, StoredValue};
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Record {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Shared store backed by an in-process map.
///
/// Expiry is evaluated lazily against the injected clock, which makes TTL
/// behavior fully deterministic under a mock clock.
#[derive(Debug)]
pub struct MemoryStore {
    map: DashMap<String, Record, RandomState>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
            clock,
        }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.map
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str, now: Instant) -> Option<Record> {
        let mut expired = false;
        let record = self.map.get(key).and_then(|entry| {
            if entry.value().is_expired(now) {
                expired = true;
                None
            } else {
                Some(entry.value().clone())
            }
        });
        if expired {
            self.map.remove_if(key, |_, record| record.is_expired(now));
        }
        record
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let now = self.clock.now();
        Ok(self.live(key, now).map(|record| StoredValue {
            bytes: record.bytes,
            remaining_ttl: record.expires_at.map(|at| at.saturating_duration_since(now)),
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.map.insert(
            key.to_string(),
            Record {
                bytes: value,
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut entry = self.map.entry(key.to_string()).or_insert(Record {
            bytes: b"0".to_vec(),
            expires_at: None,
        });

        if entry.is_expired(now) {
            entry.bytes = b"0".to_vec();
            entry.expires_at = None;
        }

        let current: i64 = std::str::from_utf8(&entry.bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::Corrupt(format!("key '{}' is not an integer", key)))?;

        let next = current + delta;
        entry.bytes = next.to_string().into_bytes();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        if let Some(mut entry) = self.map.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.map.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let before = self.map.len();
        self.map.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.map.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
