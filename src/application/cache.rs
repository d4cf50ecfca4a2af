//! Two-tier read-through/write-through cache.
//!
//! Lookups check the bounded local tier first, then the shared distributed
//! tier; a distributed hit repopulates the local tier with the remaining
//! TTL. Writes go to both tiers with the same TTL. Invalidation purges the
//! local tier synchronously before issuing the distributed delete, so a
//! reader racing an invalidation can see a transient miss but never a
//! resurrected stale value from this process's local tier.
//!
//! Store failures are deliberately non-fatal: the distributed tier degrades
//! to a miss and the failure is logged, bounding staleness by TTL rather
//! than failing reads.

use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, SharedStore, StoreError, StoredValue};
use crate::domain::key::{CacheKey, KeySelector};
use crate::infrastructure::local_cache::LocalCache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the cache manager.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry capacity of the local tier
    pub local_capacity: usize,
    /// Bounded timeout for every distributed store call
    pub store_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_capacity: 1024,
            store_timeout: Duration::from_secs(2),
        }
    }
}

/// Result of a tiered lookup, distinguishing which tier served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Served from the local tier
    LocalHit(serde_json::Value),
    /// Served from the distributed tier (local tier repopulated)
    DistributedHit(serde_json::Value),
    /// Absent from both tiers
    Miss,
}

impl CacheLookup {
    /// Extract the value, if any tier hit.
    pub fn into_value(self) -> Option<serde_json::Value> {
        match self {
            CacheLookup::LocalHit(value) | CacheLookup::DistributedHit(value) => Some(value),
            CacheLookup::Miss => None,
        }
    }

    /// Whether any tier hit.
    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheLookup::Miss)
    }
}

/// Two-tier cache over a bounded local map and the shared store.
#[derive(Debug)]
pub struct CacheManager {
    local: LocalCache,
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    config: CacheConfig,
}

impl CacheManager {
    /// Create a cache manager over the given store.
    pub fn new(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: CacheConfig,
    ) -> Self {
        let epoch = clock.now();
        Self {
            local: LocalCache::new(config.local_capacity, epoch),
            store,
            clock,
            metrics,
            config,
        }
    }

    /// Look up a key across both tiers.
    pub async fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let rendered = key.render();
        let now = self.clock.now();

        if let Some(value) = self.local.get(&rendered, now) {
            self.metrics.record_cache_hit_local();
            return CacheLookup::LocalHit(value);
        }

        match self.bounded(self.store.get(&rendered)).await {
            Ok(Some(StoredValue {
                bytes,
                remaining_ttl,
            })) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => {
                    // Carry the remaining distributed TTL into the local
                    // tier so both tiers expire together
                    if let Some(ttl) = remaining_ttl.filter(|ttl| !ttl.is_zero()) {
                        self.local.insert(rendered, value.clone(), ttl, now);
                    }
                    self.metrics.record_cache_hit_distributed();
                    CacheLookup::DistributedHit(value)
                }
                Err(error) => {
                    tracing::warn!(key = %rendered, %error, "discarding undecodable cache value");
                    self.metrics.record_cache_miss();
                    CacheLookup::Miss
                }
            },
            Ok(None) => {
                self.metrics.record_cache_miss();
                CacheLookup::Miss
            }
            Err(error) => {
                tracing::warn!(key = %rendered, %error, "distributed cache read failed, treating as miss");
                self.metrics.record_cache_miss();
                CacheLookup::Miss
            }
        }
    }

    /// Convenience wrapper returning just the value.
    pub async fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        self.lookup(key).await.into_value()
    }

    /// Write a value to both tiers with the same TTL.
    pub async fn set(&self, key: &CacheKey, value: serde_json::Value, ttl: Duration) {
        let rendered = key.render();
        let now = self.clock.now();

        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(key = %rendered, %error, "cache value not serializable, skipping");
                return;
            }
        };

        self.local.insert(rendered.clone(), value, ttl, now);

        if let Err(error) = self.bounded(self.store.set(&rendered, bytes, ttl)).await {
            tracing::warn!(key = %rendered, %error, "distributed cache write failed");
        }
    }

    /// Remove matching entries from both tiers.
    ///
    /// The local tier is purged before the distributed delete is issued.
    /// Call only after the authoritative mutation has been durably applied
    /// upstream. Returns a store error if the distributed delete failed;
    /// local removal has happened regardless.
    pub async fn invalidate(&self, selector: &KeySelector) -> Result<(), StoreError> {
        let local_removed = self.local.remove_matching(selector);
        tracing::debug!(?selector, local_removed, "cache invalidation");

        let result = match selector {
            KeySelector::Exact(key) => self.bounded(self.store.delete(&key.render())).await,
            KeySelector::Namespace(_) => self
                .bounded(self.store.delete_prefix(&selector.store_prefix()))
                .await
                .map(|_| ()),
        };

        if let Err(ref error) = result {
            tracing::warn!(?selector, %error, "distributed cache invalidation failed");
        }
        result
    }

    /// Drop expired entries from the local tier.
    pub fn purge_expired(&self) {
        self.local.purge_expired(self.clock.now());
    }

    /// Number of entries in the local tier.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Clear the local tier (distributed tier untouched).
    pub fn clear_local(&self) {
        self.local.clear();
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }
}
