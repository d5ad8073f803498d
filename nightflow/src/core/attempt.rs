//! The immutable record of one task attempt.

use super::AttemptOutcome;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};

/// One execution try of a task node.
///
/// Created by the executor, appended to the run's attempt log and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttempt {
    /// The task name.
    pub task: String,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// When the attempt started.
    pub started_at: Timestamp,
    /// When the attempt ended.
    pub finished_at: Timestamp,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Captured stdout or return value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error message and captured error output, for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskAttempt {
    /// Creates a successful attempt record.
    #[must_use]
    pub fn success(
        task: impl Into<String>,
        attempt: u32,
        started_at: Timestamp,
        finished_at: Timestamp,
        output: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            attempt,
            started_at,
            finished_at,
            outcome: AttemptOutcome::Success,
            output: Some(output.into()),
            error: None,
        }
    }

    /// Creates a non-successful attempt record.
    #[must_use]
    pub fn unsuccessful(
        task: impl Into<String>,
        attempt: u32,
        started_at: Timestamp,
        finished_at: Timestamp,
        outcome: AttemptOutcome,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            attempt,
            started_at,
            finished_at,
            outcome,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Returns how long the attempt ran.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Returns true if the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}
