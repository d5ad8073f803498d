//! Core domain model types for nightflow.
//!
//! This module contains the fundamental types used throughout the orchestrator:
//! - Attempt outcomes, run statuses and per-node states
//! - The immutable task attempt record
//! - Run identifiers

mod attempt;
mod ids;
mod status;

pub use attempt::TaskAttempt;
pub use ids::RunId;
pub use status::{AttemptOutcome, NodeState, RunStatus};
