//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters, enabling
//! controlled testing of admission logic: a clock whose time only moves
//! when told to, and an upstream handler that fails in a scripted pattern.

pub mod clock;
pub mod upstream;

pub use clock::MockClock;
pub use upstream::{ScriptedCall, ScriptedUpstream};
