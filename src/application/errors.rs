//! Error classification and the external error envelope.
//!
//! Every pipeline stage classifies its own failures into exactly one
//! [`GuardError`] kind before handing control to the translator; nothing is
//! swallowed. The [`ErrorTranslator`] maps the internal classification to
//! the stable envelope returned to callers.

use crate::application::circuit_breaker::UpstreamFailure;
use crate::application::limiter::{Denial, LimitDimension};
use crate::application::ports::ResolveError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Internal failure classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Malformed request; non-retryable
    Validation(String),
    /// Identity or tier cannot be resolved; non-retryable
    Auth(String),
    /// One of the admission dimensions denied; retryable after the delay
    RateLimit {
        /// Dimension that denied the request
        dimension: LimitDimension,
        /// Time until a retry could be admitted
        retry_after: Duration,
    },
    /// Circuit open, handler timeout, or handler failure; retryable after
    /// backoff
    Upstream(UpstreamFailure),
    /// Unexpected failure in a stage itself; retryable
    Internal(String),
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::Validation(message) => write!(f, "invalid request: {}", message),
            GuardError::Auth(message) => write!(f, "authentication failed: {}", message),
            GuardError::RateLimit {
                dimension,
                retry_after,
            } => write!(
                f,
                "rate limit exceeded ({}), retry after {:.1}s",
                dimension.as_str(),
                retry_after.as_secs_f64()
            ),
            GuardError::Upstream(failure) => write!(f, "{}", failure),
            GuardError::Internal(message) => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for GuardError {}

impl From<Denial> for GuardError {
    fn from(denial: Denial) -> Self {
        GuardError::RateLimit {
            dimension: denial.dimension,
            retry_after: denial.retry_after,
        }
    }
}

impl From<UpstreamFailure> for GuardError {
    fn from(failure: UpstreamFailure) -> Self {
        GuardError::Upstream(failure)
    }
}

impl From<ResolveError> for GuardError {
    fn from(error: ResolveError) -> Self {
        GuardError::Auth(error.to_string())
    }
}

impl GuardError {
    /// Stable machine code for the envelope's `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::Validation(_) => "validation_error",
            GuardError::Auth(_) => "auth_error",
            GuardError::RateLimit { .. } => "rate_limit_exceeded",
            GuardError::Upstream(_) => "upstream_unavailable",
            GuardError::Internal(_) => "internal_error",
        }
    }

    /// Coarse category for monitoring and routing.
    pub fn category(&self) -> &'static str {
        match self {
            GuardError::Validation(_) => "validation",
            GuardError::Auth(_) => "auth",
            GuardError::RateLimit { .. } => "rate_limit",
            GuardError::Upstream(_) => "availability",
            GuardError::Internal(_) => "internal",
        }
    }

    /// Severity for alerting.
    pub fn severity(&self) -> &'static str {
        match self {
            GuardError::Validation(_) | GuardError::Auth(_) | GuardError::RateLimit { .. } => {
                "warning"
            }
            GuardError::Upstream(_) => "error",
            GuardError::Internal(_) => "critical",
        }
    }

    /// Whether the caller may retry the identical request.
    pub fn retryable(&self) -> bool {
        !matches!(self, GuardError::Validation(_) | GuardError::Auth(_))
    }

    /// Retry delay, present for rate-limit and circuit-related failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::RateLimit { retry_after, .. } => Some(*retry_after),
            GuardError::Upstream(UpstreamFailure::ShortCircuited { retry_after }) => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Actionable hints for the caller.
    pub fn recovery_hints(&self) -> Vec<String> {
        let hints: &[&str] = match self {
            GuardError::Validation(_) => {
                &["check the request arguments against the operation's expected shape"]
            }
            GuardError::Auth(_) => &[
                "verify the credential is valid",
                "confirm the subscription tier is configured",
            ],
            GuardError::RateLimit { .. } => &[
                "reduce request rate",
                "retry after the indicated delay",
                "upgrade the subscription tier for higher limits",
            ],
            GuardError::Upstream(_) => &[
                "retry with exponential backoff",
                "check upstream service status",
            ],
            GuardError::Internal(_) => &[
                "retry the request",
                "contact support if the failure persists",
            ],
        };
        hints.iter().map(|h| h.to_string()).collect()
    }
}

/// Standardized error envelope returned to the caller on any denial or
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    /// Stable machine code
    pub error: String,
    /// Human-readable description
    pub message: String,
    /// When the failure was classified
    pub timestamp: DateTime<Utc>,
    /// Request correlation id
    pub request_id: String,
    /// Coarse category for monitoring
    pub error_category: String,
    /// Severity for alerting
    pub severity: String,
    /// Whether the identical request may be retried
    pub retryable: bool,
    /// Retry delay in seconds, present when retryable and rate/circuit
    /// related
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Actionable hints for the caller
    pub recovery_hints: Vec<String>,
}

/// Maps internal failure classifications to the stable external envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslator;

impl ErrorTranslator {
    /// Translate a classified error into the external envelope.
    pub fn translate(error: &GuardError, request_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            error: error.code().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            error_category: error.category().to_string(),
            severity: error.severity().to_string(),
            retryable: error.retryable(),
            retry_after: error
                .retry_after()
                .map(|d| d.as_secs_f64().ceil().max(1.0) as u64),
            recovery_hints: error.recovery_hints(),
        }
    }
}
