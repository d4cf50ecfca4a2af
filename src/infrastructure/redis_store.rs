//! Redis-backed shared store adapter.
//!
//! Implements the [`SharedStore`] port over Redis, allowing the distributed
//! cache tier and distributed counters to be shared across multiple
//! application instances.
//!
//! ## Architecture
//!
//! - Keys: caller-provided strings with a configurable instance prefix
//! - Values: raw bytes (the cache manager stores JSON)
//! - TTL: native Redis expiry, reported back via `PTTL`
//! - Connection pooling via `redis::aio::ConnectionManager`
//!
//! Prefix deletion uses `SCAN`/`DEL` batches rather than `KEYS`, so
//! invalidating a namespace never blocks the Redis server on large
//! keyspaces.

use crate::application::ports::{SharedStore, StoreError, StoredValue};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix applied to every key (default: "upstream-guard:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "upstream-guard:".to_string(),
        }
    }
}

/// Redis-backed shared store for multi-node deployments.
pub struct RedisStore {
    connection: Arc<RwLock<ConnectionManager>>,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
            config,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
        }
    }
}

fn map_err(error: RedisError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.write().await;

        let bytes: Option<Vec<u8>> = conn.get(&key).await.map_err(map_err)?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        // PTTL: -1 = no expiry, -2 = gone between the two commands
        let ttl_millis: i64 = redis::cmd("PTTL")
            .arg(&key)
            .query_async(&mut *conn)
            .await
            .map_err(map_err)?;

        let remaining_ttl = if ttl_millis >= 0 {
            Some(Duration::from_millis(ttl_millis as u64))
        } else {
            None
        };

        Ok(Some(StoredValue {
            bytes,
            remaining_ttl,
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.write().await;

        redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(map_err)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.write().await;
        conn.incr(&key, delta).await.map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.write().await;
        conn.pexpire::<_, bool>(&key, ttl.as_millis().max(1) as i64)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.write().await;
        conn.del::<_, ()>(&key).await.map_err(map_err)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let pattern = format!("{}{}*", self.config.key_prefix, prefix);
        let mut conn = self.connection.write().await;
        let mut removed = 0u64;
        let mut cursor = 0u64;

        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await
                .map_err(map_err)?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await.map_err(map_err)?;
                removed += deleted;
            }

            if new_cursor == 0 {
                break;
            }
            cursor = new_cursor;
        }

        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map(|_| ())
            .map_err(map_err)
    }
}
