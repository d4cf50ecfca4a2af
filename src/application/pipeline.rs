//! Ordered middleware pipeline.
//!
//! Composes validation, identity resolution, concurrency admission, rate
//! limiting, cache lookup, the circuit-breaker guard, cache population, and
//! error translation into one short-circuiting execution chain wrapping
//! each operation handler.
//!
//! Stages run as an explicit ordered sequence in [`Pipeline::execute`];
//! each stage either proceeds or aborts with a classified [`GuardError`].
//! The concurrency permit is an RAII guard acquired before the fallible
//! stages and dropped when the chain exits, so its release is unconditional
//! and happens exactly once no matter which stage aborted.

use crate::application::context::ServiceContext;
use crate::application::errors::{ErrorEnvelope, ErrorTranslator, GuardError};
use crate::application::ports::{Handler, Identity};
use crate::domain::key::{CacheKey, KeySelector};
use crate::domain::tier::TierLimits;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// An incoming operation request.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Registered operation name
    pub operation: String,
    /// Caller credential, resolved to an identity and tier
    pub credential: String,
    /// Operation arguments (object or null)
    pub args: serde_json::Value,
    /// Admission cost in quota units
    pub cost: u32,
    /// Caller-supplied correlation id; generated when absent
    pub request_id: Option<String>,
}

impl OperationRequest {
    /// Build a request with null arguments and cost 1.
    pub fn new(operation: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            credential: credential.into(),
            args: serde_json::Value::Null,
            cost: 1,
            request_id: None,
        }
    }

    /// Set the operation arguments.
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    /// Set the admission cost.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Set an explicit correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// How an operation interacts with the cache.
#[derive(Debug, Clone)]
pub enum OperationMode {
    /// Read-only, never cached
    Read,
    /// Read-only with read-through caching under a namespace
    CachedRead {
        /// TTL applied to populated entries
        ttl: Duration,
        /// Cache namespace for this operation's entries
        namespace: String,
    },
    /// Mutating; listed namespaces are invalidated after the handler
    /// succeeds
    Mutate {
        /// Namespaces whose cached entries this mutation stales
        invalidates: Vec<String>,
    },
}

/// A registered operation: name, upstream endpoint, cache behavior, and
/// the handler performing the domain work.
#[derive(Clone)]
pub struct OperationSpec {
    /// Operation name as addressed by requests
    pub name: String,
    /// Logical upstream endpoint, the circuit breaker scope
    pub endpoint: String,
    /// Cache interaction mode
    pub mode: OperationMode,
    /// The handler performing the domain work
    pub handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationSpec")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl OperationSpec {
    /// An uncached read-only operation.
    pub fn read(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            mode: OperationMode::Read,
            handler,
        }
    }

    /// A cacheable read-only operation.
    pub fn cached_read(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        namespace: impl Into<String>,
        ttl: Duration,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            mode: OperationMode::CachedRead {
                ttl,
                namespace: namespace.into(),
            },
            handler,
        }
    }

    /// A mutating operation that stales the given cache namespaces.
    pub fn mutate(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        invalidates: Vec<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            mode: OperationMode::Mutate { invalidates },
            handler,
        }
    }
}

/// Immutable operation table built at startup.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, OperationSpec>,
}

impl OperationRegistry {
    pub(crate) fn new(operations: HashMap<String, OperationSpec>) -> Self {
        Self { operations }
    }

    /// Look up an operation by name.
    pub fn get(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.get(name)
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether no operations are registered.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Which tier, if any, served a cacheable lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from the local tier without invoking the handler
    LocalHit,
    /// Served from the distributed tier without invoking the handler
    DistributedHit,
    /// Cacheable but absent; the handler ran and repopulated
    Miss,
    /// Operation is not cacheable
    Bypass,
}

/// Successful pipeline result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    /// Correlation id for this request
    pub request_id: String,
    /// Handler or cache value
    pub value: serde_json::Value,
    /// Cache disposition of this request
    pub cache: CacheStatus,
}

/// The ordered execution chain wrapping every operation handler.
#[derive(Debug, Clone)]
pub struct Pipeline {
    context: ServiceContext,
}

impl Pipeline {
    pub(crate) fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// Execute a request through the full stage chain.
    ///
    /// Any stage failure is classified, translated into the stable error
    /// envelope, and returned as `Err`; the concurrency slot is released
    /// exactly once on every path.
    pub async fn execute(
        &self,
        request: OperationRequest,
    ) -> Result<OperationOutcome, ErrorEnvelope> {
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.run(&request, &request_id).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                tracing::debug!(
                    request_id = %request_id,
                    operation = %request.operation,
                    error = %error,
                    "pipeline aborted"
                );
                Err(ErrorTranslator::translate(&error, &request_id))
            }
        }
    }

    async fn run(
        &self,
        request: &OperationRequest,
        request_id: &str,
    ) -> Result<OperationOutcome, GuardError> {
        let ctx = &self.context;

        // Stage: validate request shape
        let spec = self.validate(request)?;

        // Stage: resolve identity and tier
        let (identity, limits) = self.resolve(request).await?;

        // Stage: concurrency admission. The permit is held for the rest of
        // the chain and released on drop, whatever happens below.
        let _permit = match ctx.limiter().acquire(&identity.id, limits) {
            Ok(permit) => permit,
            Err(denial) => {
                ctx.metrics().record_denied(denial.dimension);
                return Err(denial.into());
            }
        };

        // Stage: rate-limit admission across the three time scopes
        if let Err(denial) = ctx
            .limiter()
            .check(&identity.id, &identity.tier, limits, request.cost)
        {
            ctx.metrics().record_denied(denial.dimension);
            return Err(denial.into());
        }
        ctx.metrics().record_admitted();

        // Stage: cache lookup, cacheable reads only
        let cache_key = match &spec.mode {
            OperationMode::CachedRead { namespace, .. } => {
                Some(CacheKey::from_args(namespace, &request.args))
            }
            _ => None,
        };

        if let Some(key) = &cache_key {
            use crate::application::cache::CacheLookup;
            match ctx.cache().lookup(key).await {
                CacheLookup::LocalHit(value) => {
                    return Ok(OperationOutcome {
                        request_id: request_id.to_string(),
                        value,
                        cache: CacheStatus::LocalHit,
                    });
                }
                CacheLookup::DistributedHit(value) => {
                    return Ok(OperationOutcome {
                        request_id: request_id.to_string(),
                        value,
                        cache: CacheStatus::DistributedHit,
                    });
                }
                CacheLookup::Miss => {}
            }
        }

        // Stage: circuit-breaker guard around the handler, with the bounded
        // upstream timeout
        let value = ctx
            .breakers()
            .guard(
                &spec.endpoint,
                ctx.config().upstream_timeout,
                spec.handler.invoke(&request.args),
            )
            .await?;

        // Stage: cache population / invalidation, only after the handler
        // (the authoritative mutation) has completed
        match &spec.mode {
            OperationMode::CachedRead { ttl, .. } => {
                if let Some(key) = &cache_key {
                    ctx.cache().set(key, value.clone(), *ttl).await;
                }
            }
            OperationMode::Mutate { invalidates } => {
                for namespace in invalidates {
                    // Failure already logged by the cache; the mutation
                    // itself succeeded, so the response is still a success
                    let _ = ctx
                        .cache()
                        .invalidate(&KeySelector::Namespace(namespace.clone()))
                        .await;
                }
            }
            OperationMode::Read => {}
        }

        Ok(OperationOutcome {
            request_id: request_id.to_string(),
            value,
            cache: if cache_key.is_some() {
                CacheStatus::Miss
            } else {
                CacheStatus::Bypass
            },
        })
    }

    /// Validate request shape and resolve the operation spec.
    fn validate<'a>(&'a self, request: &OperationRequest) -> Result<&'a OperationSpec, GuardError> {
        if request.operation.is_empty() {
            return Err(GuardError::Validation("operation name is empty".into()));
        }
        if request.cost == 0 {
            return Err(GuardError::Validation("cost must be at least 1".into()));
        }
        if !(request.args.is_object() || request.args.is_null()) {
            return Err(GuardError::Validation(
                "arguments must be an object or null".into(),
            ));
        }

        self.context
            .operations()
            .get(&request.operation)
            .ok_or_else(|| {
                GuardError::Validation(format!("unknown operation '{}'", request.operation))
            })
    }

    /// Resolve the caller's identity and tier limits.
    async fn resolve(
        &self,
        request: &OperationRequest,
    ) -> Result<(Identity, &TierLimits), GuardError> {
        let identity = self
            .context
            .resolver()
            .resolve(&request.credential)
            .await
            .map_err(GuardError::from)?;

        let limits = self.context.tiers().get(&identity.tier).ok_or_else(|| {
            GuardError::Auth(format!("tier '{}' is not configured", identity.tier))
        })?;

        Ok((identity, limits))
    }
}
