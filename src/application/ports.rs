//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the
//! application layer needs. Infrastructure adapters implement these ports.
//! Calls into [`SharedStore`] and [`Handler`] are the only suspension points
//! in the crate; everything else is synchronous in-process state.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Port for obtaining current time.
///
/// Infrastructure provides concrete implementations (`SystemClock`,
/// `MockClock`). Keeping time behind a port makes every time-based decision
/// in the crate deterministic under test.
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Error returned by [`SharedStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or rejected the operation
    Unavailable(String),
    /// The operation did not complete within its bounded timeout
    Timeout,
    /// The stored value could not be interpreted
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "shared store unavailable: {}", reason),
            StoreError::Timeout => write!(f, "shared store operation timed out"),
            StoreError::Corrupt(reason) => write!(f, "shared store value corrupt: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

/// A value read from the shared store along with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// Raw value bytes
    pub bytes: Vec<u8>,
    /// Remaining time-to-live, if the key carries one
    pub remaining_ttl: Option<Duration>,
}

/// Port for the shared atomic counter / key-value store.
///
/// Backs the distributed cache tier and distributed counters. The store is
/// assumed to provide per-key TTL semantics; adapters exist for Redis
/// (feature `redis-store`) and an in-process map (`MemoryStore`).
#[async_trait]
pub trait SharedStore: Send + Sync + Debug {
    /// Read a key with its remaining TTL.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    /// Write a key with a TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically add `delta` to an integer key, creating it at zero.
    /// Returns the value after the increment.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Set or refresh the TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a single key.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key under a prefix. Returns the number removed, where
    /// the backend can report it.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Liveness check used at startup; failure aborts initialization.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Failure reported by an operation handler.
///
/// Handlers surface upstream failures through this type; the pipeline
/// classifies them and feeds the circuit breaker. Argument-shape problems
/// are the validation stage's job and never reach a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Human-readable failure description
    pub message: String,
}

impl HandlerFailure {
    /// Build a failure from any displayable reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerFailure {}

/// Port for per-operation domain handlers (the upstream client seam).
///
/// A handler performs the actual domain work (search, fetch, ...) against
/// the upstream service. It may fail or hang; the pipeline bounds it with a
/// timeout and wraps it in the circuit breaker.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the operation and produce its result value.
    async fn invoke(&self, args: &serde_json::Value)
        -> Result<serde_json::Value, HandlerFailure>;
}

/// A resolved caller identity with its subscription tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable caller identifier (rate-limit scope)
    pub id: String,
    /// Subscription tier name (tier table key)
    pub tier: String,
}

/// Error returned when identity resolution fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The credential is unknown or invalid
    UnknownCredential,
    /// The identity exists but carries no usable tier
    MissingTier(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::UnknownCredential => write!(f, "credential not recognized"),
            ResolveError::MissingTier(id) => {
                write!(f, "identity '{}' has no subscription tier", id)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Port for the identity/authentication subsystem.
#[async_trait]
pub trait IdentityResolver: Send + Sync + Debug {
    /// Resolve a credential into an identity and tier.
    async fn resolve(&self, credential: &str) -> Result<Identity, ResolveError>;
}
