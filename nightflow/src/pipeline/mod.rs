//! Pipeline definition and execution.
//!
//! This module provides:
//! - Task nodes and validated pipeline definitions
//! - The dependency graph resolver
//! - The retry policy engine
//! - The run controller and the run record it produces

mod builder;
mod controller;
mod dag;
mod failure_tolerance;
mod retry;
mod run;
mod spec;


pub use builder::PipelineBuilder;
pub use controller::{ControllerConfig, PipelineRunController};
pub use dag::DependencyGraph;
pub use failure_tolerance::FailureMode;
pub use retry::{decide, RetryDecision, RetryPolicy};
pub use run::PipelineRun;
pub use spec::{PipelineDefinition, TaskNode, TriggerSchedule};
