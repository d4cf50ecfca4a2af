//! Tier configuration for admission control.
//!
//! A tier is a named class of caller with an associated set of quota limits.
//! The tier table is loaded once at startup, validated, and never mutated at
//! runtime.

use serde::Deserialize;
use std::collections::HashMap;

/// Quota limits for a single tier.
///
/// All limits are enforced per identity. `burst_allowance` extends the
/// per-minute token bucket capacity without raising its refill rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierLimits {
    /// Sustained request rate per minute (token bucket refill)
    pub requests_per_minute: u32,
    /// Trailing-hour ceiling (sliding window log)
    pub requests_per_hour: u32,
    /// Trailing-day ceiling (sliding window log)
    pub requests_per_day: u32,
    /// Extra bucket capacity on top of `requests_per_minute`
    #[serde(default)]
    pub burst_allowance: u32,
    /// Maximum concurrent in-flight requests
    pub max_concurrent: u32,
}

impl TierLimits {
    /// Token bucket capacity: sustained rate plus burst headroom.
    pub fn bucket_capacity(&self) -> u32 {
        self.requests_per_minute.saturating_add(self.burst_allowance)
    }

    /// Token bucket refill rate in tokens per second.
    pub fn refill_per_second(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }
}

/// Error returned when tier table validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierTableError {
    /// The table contains no tiers
    Empty,
    /// A tier has a zero limit in a field that must be positive
    ZeroLimit {
        /// Name of the offending tier
        tier: String,
        /// Name of the offending field
        field: &'static str,
    },
}

impl std::fmt::Display for TierTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierTableError::Empty => {
                write!(f, "tier table must contain at least one tier")
            }
            TierTableError::ZeroLimit { tier, field } => {
                write!(f, "tier '{}': {} must be greater than 0", tier, field)
            }
        }
    }
}

impl std::error::Error for TierTableError {}

/// Immutable table mapping tier name to its limits.
///
/// Constructed once at startup via [`TierTable::new`] or
/// [`TierTable::builder`]; lookups after that are read-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "HashMap<String, TierLimits>")]
pub struct TierTable {
    tiers: HashMap<String, TierLimits>,
}

impl TierTable {
    /// Validate and build a tier table from a name → limits map.
    ///
    /// # Errors
    /// Returns `TierTableError::Empty` for an empty map, or
    /// `TierTableError::ZeroLimit` if any tier has a zero
    /// `requests_per_minute`, `requests_per_hour`, `requests_per_day`, or
    /// `max_concurrent`. A zero `burst_allowance` is valid.
    pub fn new(tiers: HashMap<String, TierLimits>) -> Result<Self, TierTableError> {
        if tiers.is_empty() {
            return Err(TierTableError::Empty);
        }

        for (name, limits) in &tiers {
            let zero_field = if limits.requests_per_minute == 0 {
                Some("requests_per_minute")
            } else if limits.requests_per_hour == 0 {
                Some("requests_per_hour")
            } else if limits.requests_per_day == 0 {
                Some("requests_per_day")
            } else if limits.max_concurrent == 0 {
                Some("max_concurrent")
            } else {
                None
            };

            if let Some(field) = zero_field {
                return Err(TierTableError::ZeroLimit {
                    tier: name.clone(),
                    field,
                });
            }
        }

        Ok(Self { tiers })
    }

    /// Start building a tier table incrementally.
    pub fn builder() -> TierTableBuilder {
        TierTableBuilder {
            tiers: HashMap::new(),
        }
    }

    /// Look up the limits for a tier by name.
    pub fn get(&self, name: &str) -> Option<&TierLimits> {
        self.tiers.get(name)
    }

    /// Check whether a tier is configured.
    pub fn contains(&self, name: &str) -> bool {
        self.tiers.contains_key(name)
    }

    /// Number of configured tiers.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Whether the table is empty (never true for a validated table).
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Iterate over configured tier names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tiers.keys().map(String::as_str)
    }
}

impl TryFrom<HashMap<String, TierLimits>> for TierTable {
    type Error = TierTableError;

    fn try_from(tiers: HashMap<String, TierLimits>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

/// Incremental builder for a [`TierTable`].
#[derive(Debug, Default)]
pub struct TierTableBuilder {
    tiers: HashMap<String, TierLimits>,
}

impl TierTableBuilder {
    /// Add or replace a tier.
    pub fn with_tier(mut self, name: impl Into<String>, limits: TierLimits) -> Self {
        self.tiers.insert(name.into(), limits);
        self
    }

    /// Validate and build the table.
    ///
    /// # Errors
    /// Same validation as [`TierTable::new`].
    pub fn build(self) -> Result<TierTable, TierTableError> {
        TierTable::new(self.tiers)
    }
}
