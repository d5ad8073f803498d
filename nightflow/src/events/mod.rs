//! Event sink system for observability.
//!
//! The run controller and the scheduler report orchestration milestones
//! (`run.started`, `task.attempt.finished`, `schedule.skipped`, ...) through an
//! [`EventSink`]. The default sink forwards them to `tracing`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
