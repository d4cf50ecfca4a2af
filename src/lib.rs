//! # upstream-guard
//!
//! Admission control and resilience middleware for tool gateways.
//!
//! This crate mediates every call from a tool-invocation layer to a
//! rate-limited, occasionally-failing upstream service. Three engines are
//! composed by an ordered middleware pipeline:
//!
//! - **Rate limiter**: per-identity, per-tier quotas across three time
//!   scales (token bucket for the minute scope, sliding window logs for
//!   hour and day) plus a concurrency ceiling with RAII slot release.
//! - **Circuit breaker**: per-endpoint fail-fast with a single half-open
//!   probe and exponential backoff on repeated reopenings.
//! - **Two-tier cache**: bounded local LRU tier in front of a shared
//!   distributed tier, with TTL expiry and exact or namespace-prefix
//!   invalidation.
//!
//! Failures at any stage are classified and translated into a stable
//! external error envelope carrying a machine code, retryability, and a
//! retry delay when one is known.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use upstream_guard::{
//!     OperationRequest, OperationSpec, ServiceContext, StaticResolver, TierLimits, TierTable,
//! };
//! # use upstream_guard::infrastructure::mocks::ScriptedUpstream;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tiers = TierTable::builder()
//!     .with_tier(
//!         "basic",
//!         TierLimits {
//!             requests_per_minute: 60,
//!             requests_per_hour: 1_000,
//!             requests_per_day: 10_000,
//!             burst_allowance: 10,
//!             max_concurrent: 5,
//!         },
//!     )
//!     .build()?;
//!
//! let resolver = StaticResolver::new().with_identity("api-key-1", "alice", "basic");
//! # let search_handler = Arc::new(ScriptedUpstream::new());
//!
//! let context = ServiceContext::builder()
//!     .with_tiers(tiers)
//!     .with_resolver(Arc::new(resolver))
//!     .register_operation(OperationSpec::cached_read(
//!         "search",
//!         "upstream/search",
//!         "search",
//!         Duration::from_secs(300),
//!         search_handler,
//!     ))
//!     .initialize()
//!     .await?;
//!
//! let pipeline = context.pipeline();
//! let outcome = pipeline
//!     .execute(
//!         OperationRequest::new("search", "api-key-1")
//!             .with_args(serde_json::json!({"q": "rust"})),
//!     )
//!     .await;
//!
//! match outcome {
//!     Ok(success) => println!("value: {}", success.value),
//!     Err(envelope) => println!("denied: {} ({})", envelope.error, envelope.message),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate follows hexagonal layering:
//!
//! - [`domain`] holds pure logic: tier limits, quota algorithms, cache
//!   keys. No I/O, no clock reads.
//! - [`application`] orchestrates the engines and defines the ports
//!   ([`Clock`], [`SharedStore`], [`Handler`], [`IdentityResolver`]) that
//!   external collaborators implement.
//! - [`infrastructure`] provides adapters: the system clock, sharded
//!   in-process storage, the local cache tier, the in-memory shared store,
//!   a Redis store behind the `redis-store` feature, and test mocks.
//!
//! Calls into the shared store and the upstream handler are the only
//! suspension points; both carry bounded timeouts. No lock is held across
//! a suspension point, and the concurrency slot acquired for a request is
//! released exactly once on every exit path, including cancellation.
//!
//! ## Determinism under test
//!
//! Every time-based behavior reads the [`Clock`] port. Tests drive a
//! `MockClock` to cover token refill, window expiry, cache TTLs, and
//! breaker recovery without sleeping.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    key::{CacheKey, KeySelector},
    quota::{TokenBucket, WindowLog},
    tier::{TierLimits, TierTable, TierTableBuilder, TierTableError},
};

pub use application::{
    cache::{CacheConfig, CacheLookup, CacheManager},
    circuit_breaker::{
        Admission, BreakerConfig, BreakerRegistry, BreakerState, EndpointBreaker, UpstreamFailure,
    },
    context::{
        ContextBuilder, EndpointStatus, GuardConfig, GuardStatus, InitError, ServiceContext,
    },
    errors::{ErrorEnvelope, ErrorTranslator, GuardError},
    limiter::{
        ConcurrencyPermit, Denial, LimitDimension, RateLimitStatus, RateLimiter,
        RateLimiterConfig, ScopeStatus,
    },
    metrics::{Metrics, MetricsSnapshot},
    pipeline::{
        CacheStatus, OperationMode, OperationOutcome, OperationRegistry, OperationRequest,
        OperationSpec, Pipeline,
    },
    ports::{
        Clock, Handler, HandlerFailure, Identity, IdentityResolver, ResolveError, SharedStore,
        StoreError, StoredValue,
    },
};

pub use infrastructure::{
    clock::SystemClock, local_cache::LocalCache, memory_store::MemoryStore,
    resolver::StaticResolver, storage::ShardedStorage,
};

#[cfg(feature = "redis-store")]
pub use infrastructure::redis_store::{RedisStore, RedisStoreConfig};
