//! Attempt outcome, run status and node state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a single task attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The work completed successfully.
    Success,
    /// A transient collaborator or tool failure; may be retried.
    RetryableFailure,
    /// A contract violation; never retried.
    FatalFailure,
    /// The attempt exceeded its timeout; retried like a retryable failure.
    TimedOut,
    /// The attempt was interrupted by run cancellation.
    Cancelled,
}

impl AttemptOutcome {
    /// Returns true if the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the retry policy may re-invoke after this outcome.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableFailure | Self::TimedOut)
    }

    /// Returns true if the attempt failed (cancellation is not a failure).
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RetryableFailure | Self::FatalFailure | Self::TimedOut)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RetryableFailure => write!(f, "retryable_failure"),
            Self::FatalFailure => write!(f, "fatal_failure"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The status of a pipeline run.
///
/// `Pending -> Running -> {Succeeded | Failed | Cancelled}`. Terminal states
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet dispatched.
    #[default]
    Pending,
    /// Dispatched to the controller.
    Running,
    /// Every node succeeded.
    Succeeded,
    /// At least one node failed permanently.
    Failed,
    /// Cancelled by external request.
    Cancelled,
}

impl RunStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The state of one task node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not yet attempted.
    #[default]
    Pending,
    /// An attempt is in flight.
    Running,
    /// The last attempt failed and a retry is scheduled.
    WaitingRetry,
    /// An attempt succeeded.
    Succeeded,
    /// Retries are exhausted or the failure was fatal.
    Failed,
    /// Never attempted because an upstream node or the run stopped.
    Skipped,
    /// Interrupted by run cancellation.
    Cancelled,
}

impl NodeState {
    /// Returns true if the node will not change state again in this run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::WaitingRetry => write!(f, "waiting_retry"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
