//! One execution instance of a pipeline.

use super::PipelineDefinition;
use crate::core::{NodeState, RunId, RunStatus, TaskAttempt};
use crate::utils::{now_utc, Timestamp};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// A pipeline run: status, per-node state and the append-only attempt log.
///
/// Created `Pending` by the scheduler and owned by the run controller until
/// it is terminal.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    run_id: RunId,
    pipeline: String,
    status: RunStatus,
    created_at: Timestamp,
    started_at: Option<Timestamp>,
    finished_at: Option<Timestamp>,
    attempts: Vec<TaskAttempt>,
    node_order: Vec<String>,
    node_states: HashMap<String, NodeState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancel_reason: Option<String>,
}

impl PipelineRun {
    /// Creates a pending run of `definition` with a fresh identifier.
    #[must_use]
    pub fn new(definition: &PipelineDefinition) -> Self {
        Self::with_id(RunId::new(), definition)
    }

    /// Creates a pending run with a given identifier.
    #[must_use]
    pub fn with_id(run_id: RunId, definition: &PipelineDefinition) -> Self {
        let node_order: Vec<String> = definition.nodes().iter().map(|n| n.name.clone()).collect();
        let node_states = node_order
            .iter()
            .map(|name| (name.clone(), NodeState::Pending))
            .collect();
        Self {
            run_id,
            pipeline: definition.name().to_string(),
            status: RunStatus::Pending,
            created_at: now_utc(),
            started_at: None,
            finished_at: None,
            attempts: Vec::new(),
            node_order,
            node_states,
            cancel_reason: None,
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns the run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns true once the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns when the run was created.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns when the run was dispatched.
    #[must_use]
    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    /// Returns when the last attempt of the run ended.
    #[must_use]
    pub fn finished_at(&self) -> Option<Timestamp> {
        self.finished_at
    }

    /// Returns the attempt log in append order.
    #[must_use]
    pub fn attempts(&self) -> &[TaskAttempt] {
        &self.attempts
    }

    /// Returns the attempts of one task in attempt order.
    #[must_use]
    pub fn attempts_for(&self, task: &str) -> Vec<&TaskAttempt> {
        self.attempts.iter().filter(|a| a.task == task).collect()
    }

    /// Returns the state of one node.
    #[must_use]
    pub fn node_state(&self, task: &str) -> Option<NodeState> {
        self.node_states.get(task).copied()
    }

    /// Returns every node state in declared order.
    #[must_use]
    pub fn node_states(&self) -> Vec<(&str, NodeState)> {
        self.node_order
            .iter()
            .map(|name| {
                (
                    name.as_str(),
                    self.node_states.get(name).copied().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Returns the names of nodes currently in `state`, in declared order.
    #[must_use]
    pub fn nodes_in(&self, state: NodeState) -> Vec<&str> {
        self.node_states()
            .into_iter()
            .filter(|(_, s)| *s == state)
            .map(|(name, _)| name)
            .collect()
    }

    /// Returns the reason the run was cancelled, if it was.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// Returns the attempt that failed the run.
    ///
    /// This is the last attempt of a permanently failed node: a fatal
    /// failure, or the retryable failure that exhausted the policy.
    #[must_use]
    pub fn failure(&self) -> Option<&TaskAttempt> {
        self.attempts.iter().rev().find(|a| {
            a.outcome.is_failure() && self.node_state(&a.task) == Some(NodeState::Failed)
        })
    }

    /// Applies a status transition; illegal transitions are ignored.
    ///
    /// Returns true if the status changed.
    pub(crate) fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            if self.status != next {
                warn!(
                    run_id = %self.run_id,
                    from = %self.status,
                    to = %next,
                    "Ignoring illegal run status transition"
                );
            }
            return false;
        }
        if next == RunStatus::Running {
            self.started_at = Some(now_utc());
        }
        self.status = next;
        true
    }

    pub(crate) fn record(&mut self, attempt: TaskAttempt) {
        self.attempts.push(attempt);
    }

    pub(crate) fn set_node_state(&mut self, task: &str, state: NodeState) {
        if let Some(current) = self.node_states.get_mut(task) {
            *current = state;
        }
    }

    pub(crate) fn mark_finished(&mut self, cancel_reason: Option<String>) {
        self.finished_at = Some(now_utc());
        if self.status == RunStatus::Cancelled {
            self.cancel_reason = cancel_reason;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AttemptOutcome;
    use crate::executor::FnTask;
    use crate::pipeline::{PipelineBuilder, TaskNode};
    use std::sync::Arc;

    fn definition() -> PipelineDefinition {
        let work = Arc::new(FnTask::new("noop", |_| Ok(String::new())));
        PipelineBuilder::new("ingestion")
            .task(TaskNode::new("a", work.clone()))
            .task(TaskNode::new("b", work).after("a"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = PipelineRun::new(&definition());
        assert_eq!(run.status(), RunStatus::Pending);
        assert!(run.started_at().is_none());
        assert_eq!(
            run.node_states(),
            vec![("a", NodeState::Pending), ("b", NodeState::Pending)]
        );
    }

    #[test]
    fn test_terminal_status_is_absorbing() {
        let mut run = PipelineRun::new(&definition());
        assert!(run.transition(RunStatus::Running));
        assert!(run.started_at().is_some());
        assert!(run.transition(RunStatus::Failed));
        assert!(!run.transition(RunStatus::Succeeded));
        assert!(!run.transition(RunStatus::Running));
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[test]
    fn test_failure_returns_last_attempt_of_failed_node() {
        let mut run = PipelineRun::new(&definition());
        let now = now_utc();
        run.record(TaskAttempt::success("a", 1, now, now, "ok"));
        run.record(TaskAttempt::unsuccessful("b", 1, now, now, AttemptOutcome::RetryableFailure, "first"));
        run.record(TaskAttempt::unsuccessful("b", 2, now, now, AttemptOutcome::RetryableFailure, "second"));
        run.set_node_state("a", NodeState::Succeeded);

        assert!(run.failure().is_none());

        run.set_node_state("b", NodeState::Failed);
        let failure = run.failure().unwrap();
        assert_eq!(failure.attempt, 2);
        assert_eq!(failure.error.as_deref(), Some("second"));
        assert_eq!(run.attempts_for("b").len(), 2);
        assert_eq!(run.nodes_in(NodeState::Failed), vec!["b"]);
    }

    #[test]
    fn test_unknown_node_state_is_ignored() {
        let mut run = PipelineRun::new(&definition());
        run.set_node_state("ghost", NodeState::Failed);
        assert_eq!(run.node_state("ghost"), None);
    }
}
