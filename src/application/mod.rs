//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the engines and manages runtime behavior:
//! - Rate limiter (admission across three time scopes plus concurrency)
//! - Circuit breaker registry (per-endpoint fail-fast)
//! - Cache manager (two-tier read/write-through)
//! - Pipeline (the ordered stage chain wrapping each handler)
//! - Error classification and translation
//! - Service context (explicit wiring, built once at startup)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod cache;
pub mod circuit_breaker;
pub mod context;
pub mod errors;
pub mod limiter;
pub mod metrics;
pub mod pipeline;
pub mod ports;
