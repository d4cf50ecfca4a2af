//! Service context: explicit construction and wiring of the engines.
//!
//! The context is built once at process start with defined initialization
//! and passed into every pipeline stage, replacing ambient global state.
//! Fatal conditions (no tier configuration, shared store unreachable)
//! abort initialization rather than silently degrading to an unlimited
//! mode.

use crate::application::circuit_breaker::{BreakerConfig, BreakerRegistry};
use crate::application::cache::{CacheConfig, CacheManager};
use crate::application::errors::GuardError;
use crate::application::limiter::{RateLimitStatus, RateLimiter, RateLimiterConfig};
use crate::application::metrics::{Metrics, MetricsSnapshot};
use crate::application::pipeline::{OperationRegistry, OperationSpec, Pipeline};
use crate::application::ports::{Clock, IdentityResolver, SharedStore, StoreError};
use crate::domain::tier::TierTable;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::memory_store::MemoryStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration for the guard.
///
/// Defaults are configurable starting points, not tuned values.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Bounded timeout applied to every handler invocation
    pub upstream_timeout: Duration,
    /// Circuit breaker thresholds
    pub breaker: BreakerConfig,
    /// Rate limiter housekeeping
    pub limiter: RateLimiterConfig,
    /// Cache tiers and store timeout
    pub cache: CacheConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(10),
            breaker: BreakerConfig::default(),
            limiter: RateLimiterConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Error returned when context initialization fails.
#[derive(Debug)]
pub enum InitError {
    /// No tier table was provided
    MissingTierTable,
    /// No identity resolver was provided
    MissingResolver,
    /// No operations were registered
    NoOperations,
    /// Two operations were registered under the same name
    DuplicateOperation(String),
    /// The shared store did not answer the startup liveness check
    StoreUnreachable(StoreError),
}

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitError::MissingTierTable => {
                write!(f, "a validated tier table is required")
            }
            InitError::MissingResolver => {
                write!(f, "an identity resolver is required")
            }
            InitError::NoOperations => {
                write!(f, "at least one operation must be registered")
            }
            InitError::DuplicateOperation(name) => {
                write!(f, "operation '{}' registered twice", name)
            }
            InitError::StoreUnreachable(error) => {
                write!(f, "shared store unreachable at startup: {}", error)
            }
        }
    }
}

impl std::error::Error for InitError {}

/// Builder for a [`ServiceContext`].
pub struct ContextBuilder {
    tiers: Option<TierTable>,
    resolver: Option<Arc<dyn IdentityResolver>>,
    store: Option<Arc<dyn SharedStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: GuardConfig,
    operations: Vec<OperationSpec>,
}

impl ContextBuilder {
    fn new() -> Self {
        Self {
            tiers: None,
            resolver: None,
            store: None,
            clock: None,
            config: GuardConfig::default(),
            operations: Vec::new(),
        }
    }

    /// Set the validated tier table. Required.
    pub fn with_tiers(mut self, tiers: TierTable) -> Self {
        self.tiers = Some(tiers);
        self
    }

    /// Set the identity resolver. Required.
    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the shared store. Defaults to an in-process [`MemoryStore`].
    pub fn with_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the clock. Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the guard configuration. Defaults are illustrative starting
    /// points, not tuned values.
    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an operation.
    pub fn register_operation(mut self, spec: OperationSpec) -> Self {
        self.operations.push(spec);
        self
    }

    /// Validate the wiring, check store liveness, and construct the
    /// context.
    ///
    /// # Errors
    /// Fails fast on missing tier table or resolver, an empty or
    /// duplicated operation set, or an unreachable shared store.
    pub async fn initialize(self) -> Result<ServiceContext, InitError> {
        let tiers = self.tiers.ok_or(InitError::MissingTierTable)?;
        let resolver = self.resolver.ok_or(InitError::MissingResolver)?;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        if self.operations.is_empty() {
            return Err(InitError::NoOperations);
        }
        let mut operations = HashMap::with_capacity(self.operations.len());
        for spec in self.operations {
            let name = spec.name.clone();
            if operations.insert(name.clone(), spec).is_some() {
                return Err(InitError::DuplicateOperation(name));
            }
        }

        let store: Arc<dyn SharedStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new(clock.clone())),
        };
        store.ping().await.map_err(InitError::StoreUnreachable)?;

        let metrics = Metrics::new();
        let limiter = RateLimiter::with_config(clock.clone(), self.config.limiter.clone());
        let breakers = BreakerRegistry::new(
            self.config.breaker.clone(),
            clock.clone(),
            metrics.clone(),
        );
        let cache = CacheManager::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
            self.config.cache.clone(),
        );

        tracing::debug!(
            tiers = tiers.len(),
            operations = operations.len(),
            "service context initialized"
        );

        Ok(ServiceContext {
            inner: Arc::new(ContextInner {
                tiers,
                operations: OperationRegistry::new(operations),
                resolver,
                limiter,
                breakers,
                cache,
                metrics,
                clock,
                config: self.config,
            }),
        })
    }
}

#[derive(Debug)]
struct ContextInner {
    tiers: TierTable,
    operations: OperationRegistry,
    resolver: Arc<dyn IdentityResolver>,
    limiter: RateLimiter,
    breakers: BreakerRegistry,
    cache: CacheManager,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
    config: GuardConfig,
}

/// Shared, cheaply clonable handle to the wired engines.
///
/// Constructed once at process start via [`ServiceContext::builder`] and
/// passed into every pipeline stage.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    inner: Arc<ContextInner>,
}

impl ServiceContext {
    /// Start building a context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Build a pipeline over this context.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.clone())
    }

    /// The tier table.
    pub fn tiers(&self) -> &TierTable {
        &self.inner.tiers
    }

    /// The operation registry.
    pub fn operations(&self) -> &OperationRegistry {
        &self.inner.operations
    }

    /// The identity resolver.
    pub fn resolver(&self) -> &Arc<dyn IdentityResolver> {
        &self.inner.resolver
    }

    /// The rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// The circuit breaker registry.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.inner.breakers
    }

    /// The two-tier cache.
    pub fn cache(&self) -> &CacheManager {
        &self.inner.cache
    }

    /// The shared metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// The clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// The guard configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.inner.config
    }

    /// Per-identity rate-limit standing for the status surface.
    pub async fn rate_limit_status(
        &self,
        credential: &str,
    ) -> Result<RateLimitStatus, GuardError> {
        let identity = self
            .inner
            .resolver
            .resolve(credential)
            .await
            .map_err(GuardError::from)?;
        let limits = self.inner.tiers.get(&identity.tier).ok_or_else(|| {
            GuardError::Auth(format!("tier '{}' is not configured", identity.tier))
        })?;

        Ok(self
            .inner
            .limiter
            .status(&identity.id, &identity.tier, limits))
    }

    /// Aggregate health snapshot for monitoring.
    pub fn guard_status(&self) -> GuardStatus {
        GuardStatus {
            breakers: self
                .inner
                .breakers
                .states()
                .into_iter()
                .map(|(endpoint, state)| EndpointStatus {
                    endpoint,
                    state: state.as_str().to_string(),
                })
                .collect(),
            metrics: self.inner.metrics.snapshot(),
            tracked_identities: self.inner.limiter.tracked_identities(),
            local_cache_entries: self.inner.cache.local_len(),
        }
    }

    /// Housekeeping pass: reclaim idle admission state and expired local
    /// cache entries. Intended to be called periodically by the host.
    pub fn maintain(&self) {
        self.inner.limiter.evict_idle();
        self.inner.cache.purge_expired();
    }

    /// Defined shutdown: drop local state. Distributed state is left to
    /// its TTLs.
    pub fn shutdown(&self) {
        self.inner.cache.clear_local();
        tracing::debug!("service context shut down");
    }
}

/// Per-endpoint breaker state for the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    /// Logical endpoint name
    pub endpoint: String,
    /// Breaker state name
    pub state: String,
}

/// Aggregate health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardStatus {
    /// Breaker state per tracked endpoint
    pub breakers: Vec<EndpointStatus>,
    /// Counter snapshot
    pub metrics: MetricsSnapshot,
    /// (identity, tier) pairs with live quota state
    pub tracked_identities: usize,
    /// Entries in the local cache tier
    pub local_cache_entries: usize,
}
