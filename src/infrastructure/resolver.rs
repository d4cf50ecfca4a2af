//! Static identity resolver.
//!
//! A table-backed [`IdentityResolver`] for single-node deployments, demos,
//! and tests. Production deployments typically adapt their identity
//! subsystem behind the same port.

use crate::application::ports::{Identity, IdentityResolver, ResolveError};
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;

/// Identity resolver backed by a static credential table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    identities: DashMap<String, Identity, RandomState>,
}

impl StaticResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self {
            identities: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Register a credential mapping to an identity and tier.
    pub fn with_identity(
        self,
        credential: impl Into<String>,
        id: impl Into<String>,
        tier: impl Into<String>,
    ) -> Self {
        self.identities.insert(
            credential.into(),
            Identity {
                id: id.into(),
                tier: tier.into(),
            },
        );
        self
    }

    /// Number of registered credentials.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether no credentials are registered.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, credential: &str) -> Result<Identity, ResolveError> {
        self.identities
            .get(credential)
            .map(|entry| entry.value().clone())
            .ok_or(ResolveError::UnknownCredential)
    }
}
