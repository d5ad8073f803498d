//! # Nightflow
//!
//! Orchestration core for nightly data pipelines.
//!
//! Nightflow turns cron-like triggers into pipeline runs and drives each run
//! to completion:
//!
//! - **Task graphs**: tasks declare predecessors; cycles and unknown
//!   dependencies are rejected when the pipeline is built
//! - **Retries**: per-task attempt budgets and fixed delays, with transient
//!   and permanent failures classified apart
//! - **Failure isolation**: a permanently failed task skips its dependents
//!   and the run ends `Failed`
//! - **Scheduling**: each pipeline fires on its own schedule, never more than
//!   one run at a time, with no backfill of missed occurrences
//! - **Cancellation**: runs can be stopped between attempts or mid-attempt
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nightflow::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), NightflowError> {
//! let extract = FnTask::new("extract", |_ctx: &TaskContext| Ok("3 rows".to_string()));
//! let load = FnTask::new("load", |_ctx: &TaskContext| Ok("loaded".to_string()));
//!
//! let pipeline = PipelineBuilder::new("nightly-load")
//!     .schedule("0 0 * * *")
//!     .task(TaskNode::new("extract", Arc::new(extract)))
//!     .task(
//!         TaskNode::new("load", Arc::new(load))
//!             .after("extract")
//!             .with_retry_policy(RetryPolicy::with_retries(3, Duration::from_secs(60))),
//!     )
//!     .build()?;
//!
//! let controller = PipelineRunController::new(TaskExecutor::new());
//! let run = controller.run(&pipeline).await;
//! assert_eq!(run.status(), RunStatus::Succeeded);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod pipelines;
pub mod scheduler;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::collaborators::{ApiSource, LoadMode, ObjectStore, Record, WarehouseLoader};
    pub use crate::config::NightflowConfig;
    pub use crate::core::{AttemptOutcome, NodeState, RunId, RunStatus, TaskAttempt};
    pub use crate::errors::{DefinitionError, NightflowError, TaskError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{AsyncFnTask, FnTask, TaskContext, TaskExecutor, TaskWork};
    pub use crate::pipeline::{
        ControllerConfig, FailureMode, PipelineBuilder, PipelineDefinition, PipelineRun,
        PipelineRunController, RetryPolicy, TaskNode,
    };
    pub use crate::scheduler::{CronSchedule, Scheduler, SchedulerConfig};
    pub use crate::utils::Timestamp;
}
