//! Cache key convention.
//!
//! Keys follow the `{namespace}:{identifier}` convention. The namespace
//! groups entries produced by one operation family so a mutation can
//! invalidate them as a unit; the identifier distinguishes entries within
//! the namespace and is usually a hash of the operation arguments.

use ahash::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

// Fixed seeds so identifiers are stable across processes sharing a
// distributed tier.
const KEY_SEEDS: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0xf39c_c060_5ced_c834,
    0x1082_276b_f3a2_7251,
    0xb492_b66f_be98_f273,
);

/// A cache key in `{namespace}:{identifier}` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    identifier: String,
}

impl CacheKey {
    /// Build a key from an explicit namespace and identifier.
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }

    /// Build a key whose identifier is a stable hash of canonical operation
    /// arguments.
    ///
    /// `serde_json::Value` objects serialize with sorted keys, so two
    /// argument maps with the same contents produce the same identifier
    /// regardless of construction order.
    pub fn from_args(namespace: &str, args: &serde_json::Value) -> Self {
        let canonical = args.to_string();
        let mut hasher =
            RandomState::with_seeds(KEY_SEEDS.0, KEY_SEEDS.1, KEY_SEEDS.2, KEY_SEEDS.3)
                .build_hasher();
        canonical.hash(&mut hasher);

        Self {
            namespace: namespace.to_string(),
            identifier: format!("{:016x}", hasher.finish()),
        }
    }

    /// The namespace component.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The identifier component.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Render the full `{namespace}:{identifier}` string.
    pub fn render(&self) -> String {
        format!("{}:{}", self.namespace, self.identifier)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identifier)
    }
}

/// Selector for cache invalidation: an exact key or a whole namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    /// Invalidate a single entry
    Exact(CacheKey),
    /// Invalidate every entry under a namespace prefix
    Namespace(String),
}

impl KeySelector {
    /// Check whether a rendered key matches this selector.
    pub fn matches(&self, rendered: &str) -> bool {
        match self {
            KeySelector::Exact(key) => rendered == key.render(),
            KeySelector::Namespace(namespace) => rendered
                .strip_prefix(namespace.as_str())
                .is_some_and(|rest| rest.starts_with(':')),
        }
    }

    /// The store-level prefix this selector covers.
    pub fn store_prefix(&self) -> String {
        match self {
            KeySelector::Exact(key) => key.render(),
            KeySelector::Namespace(namespace) => format!("{}:", namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_convention() {
        let key = CacheKey::new("search", "abc123");
        assert_eq!(key.render(), "search:abc123");
        assert_eq!(key.to_string(), "search:abc123");
    }

    #[test]
    fn test_from_args_stable() {
        let a = CacheKey::from_args("search", &json!({"q": "rust", "page": 1}));
        let b = CacheKey::from_args("search", &json!({"page": 1, "q": "rust"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_args_distinguishes_arguments() {
        let a = CacheKey::from_args("search", &json!({"q": "rust"}));
        let b = CacheKey::from_args("search", &json!({"q": "go"}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_args_distinguishes_namespaces() {
        let args = json!({"id": 7});
        let a = CacheKey::from_args("fetch", &args);
        let b = CacheKey::from_args("search", &args);
        assert_ne!(a.render(), b.render());
        assert_eq!(a.identifier(), b.identifier());
    }

    #[test]
    fn test_exact_selector() {
        let key = CacheKey::new("search", "abc");
        let selector = KeySelector::Exact(key.clone());

        assert!(selector.matches("search:abc"));
        assert!(!selector.matches("search:abcd"));
        assert!(!selector.matches("fetch:abc"));
    }

    #[test]
    fn test_namespace_selector() {
        let selector = KeySelector::Namespace("search".to_string());

        assert!(selector.matches("search:abc"));
        assert!(selector.matches("search:def"));
        assert!(!selector.matches("searches:abc"));
        assert!(!selector.matches("fetch:abc"));
    }

    #[test]
    fn test_store_prefix() {
        let exact = KeySelector::Exact(CacheKey::new("search", "abc"));
        assert_eq!(exact.store_prefix(), "search:abc");

        let ns = KeySelector::Namespace("search".to_string());
        assert_eq!(ns.store_prefix(), "search:");
    }
}
