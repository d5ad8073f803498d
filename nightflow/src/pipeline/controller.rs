//! Pipeline run controller.
//!
//! Drives one [`PipelineRun`] through its dependency graph. Each node moves
//! through explicit states (`Pending -> Running -> WaitingRetry -> Running
//! ... -> Succeeded | Failed | Cancelled`, or `Skipped` if never started);
//! retries are timer events in the same loop, not nested calls.

use super::{decide, FailureMode, PipelineDefinition, PipelineRun, RetryDecision};
use crate::cancellation::CancellationToken;
use crate::core::{AttemptOutcome, NodeState, RunStatus, TaskAttempt};
use crate::events::{EventSink, NoOpEventSink};
use crate::executor::{TaskContext, TaskExecutor};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Controller limits and failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Attempts allowed to execute at the same time within one run.
    pub max_concurrent_tasks: usize,
    /// What happens to not-yet-started nodes after a permanent failure.
    pub failure_mode: FailureMode,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            failure_mode: FailureMode::FailFast,
        }
    }
}

/// Executes pipeline runs.
#[derive(Clone)]
pub struct PipelineRunController {
    executor: TaskExecutor,
    config: ControllerConfig,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineRunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunController")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for PipelineRunController {
    fn default() -> Self {
        Self::new(TaskExecutor::default())
    }
}

impl PipelineRunController {
    /// Creates a controller around an executor.
    #[must_use]
    pub fn new(executor: TaskExecutor) -> Self {
        Self {
            executor,
            config: ControllerConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the controller configuration.
    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the sink receiving run and task events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Creates and executes a fresh run of `definition`.
    pub async fn run(&self, definition: &PipelineDefinition) -> PipelineRun {
        self.execute(definition, PipelineRun::new(definition), &CancellationToken::new())
            .await
    }

    /// Executes `run` to a terminal status and returns it.
    ///
    /// A run that is already terminal is returned unchanged. A run whose
    /// token is cancelled before dispatch goes straight to `Cancelled`.
    pub async fn execute(
        &self,
        definition: &PipelineDefinition,
        run: PipelineRun,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        if run.is_terminal() {
            return run;
        }
        let span = info_span!(
            "pipeline_run",
            pipeline = %definition.name(),
            run_id = %run.run_id(),
        );
        RunDriver::new(self, definition, run, cancel)
            .drive()
            .instrument(span)
            .await
    }
}

enum NodeEvent {
    Finished(TaskAttempt),
    RetryDue(String),
    RetryAborted(String),
}

/// Mutable state of one run while it is being driven.
struct RunDriver<'a> {
    controller: &'a PipelineRunController,
    definition: &'a PipelineDefinition,
    cancel: &'a CancellationToken,
    run: PipelineRun,
    succeeded: HashSet<String>,
    attempted: HashSet<String>,
    attempt_counts: HashMap<String, u32>,
    due_retries: VecDeque<String>,
    in_flight: FuturesUnordered<BoxFuture<'a, NodeEvent>>,
    executing: usize,
    failed: bool,
}

impl<'a> RunDriver<'a> {
    fn new(
        controller: &'a PipelineRunController,
        definition: &'a PipelineDefinition,
        run: PipelineRun,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            controller,
            definition,
            cancel,
            run,
            succeeded: HashSet::new(),
            attempted: HashSet::new(),
            attempt_counts: HashMap::new(),
            due_retries: VecDeque::new(),
            in_flight: FuturesUnordered::new(),
            executing: 0,
            failed: false,
        }
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.controller.event_sink.try_emit(event_type, Some(data));
    }

    async fn drive(mut self) -> PipelineRun {
        if self.cancel.is_cancelled() {
            self.run.transition(RunStatus::Cancelled);
            return self.finish();
        }

        self.run.transition(RunStatus::Running);
        info!(tasks = self.definition.nodes().len(), "Run started");
        self.emit(
            "run.started",
            json!({
                "pipeline": self.definition.name(),
                "run_id": self.run.run_id(),
                "tasks": self.definition.nodes().len(),
            }),
        );

        loop {
            self.launch_ready();
            match self.in_flight.next().await {
                Some(event) => self.handle(event),
                None => break,
            }
        }

        self.finish()
    }

    fn capacity_left(&self) -> bool {
        self.executing < self.controller.config.max_concurrent_tasks.max(1)
    }

    fn launch_ready(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }

        while self.capacity_left() {
            let Some(task) = self.due_retries.pop_front() else {
                break;
            };
            self.launch(&task);
        }

        if self.failed && !self.controller.config.failure_mode.launches_after_failure() {
            return;
        }

        let definition: &'a PipelineDefinition = self.definition;
        for task in definition.graph().ready(&self.succeeded, &self.attempted) {
            if !self.capacity_left() {
                break;
            }
            self.attempted.insert(task.to_string());
            self.launch(task);
        }
    }

    fn launch(&mut self, task: &str) {
        let definition: &'a PipelineDefinition = self.definition;
        let cancel: &'a CancellationToken = self.cancel;
        let executor: &'a TaskExecutor = &self.controller.executor;
        let Some(node) = definition.node(task) else {
            return;
        };

        let attempt = {
            let count = self.attempt_counts.entry(task.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.executing += 1;
        self.run.set_node_state(task, NodeState::Running);
        self.emit(
            "task.attempt.started",
            json!({ "task": task, "attempt": attempt }),
        );

        let ctx = TaskContext::new(definition.name(), self.run.run_id(), task, attempt);
        self.in_flight.push(
            async move { NodeEvent::Finished(executor.execute(node, ctx, cancel).await) }.boxed(),
        );
    }

    fn handle(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Finished(attempt) => self.on_attempt_finished(attempt),
            NodeEvent::RetryDue(task) => {
                if self.cancel.is_cancelled() {
                    self.mark_cancelled(&task);
                } else {
                    self.due_retries.push_back(task);
                }
            }
            NodeEvent::RetryAborted(task) => self.mark_cancelled(&task),
        }
    }

    fn on_attempt_finished(&mut self, attempt: TaskAttempt) {
        self.executing = self.executing.saturating_sub(1);
        let task = attempt.task.clone();
        let number = attempt.attempt;
        let outcome = attempt.outcome;

        info!(
            task = %task,
            attempt = number,
            outcome = %outcome,
            duration_ms = attempt.duration().num_milliseconds(),
            "Attempt finished"
        );
        self.emit(
            "task.attempt.finished",
            json!({
                "task": task,
                "attempt": number,
                "outcome": outcome,
                "duration_ms": attempt.duration().num_milliseconds(),
            }),
        );
        let error = attempt.error.clone();
        self.run.record(attempt);

        match outcome {
            AttemptOutcome::Success => {
                self.run.set_node_state(&task, NodeState::Succeeded);
                self.succeeded.insert(task);
            }
            AttemptOutcome::Cancelled => self.mark_cancelled(&task),
            AttemptOutcome::RetryableFailure
            | AttemptOutcome::FatalFailure
            | AttemptOutcome::TimedOut => {
                let policy = self
                    .definition
                    .node(&task)
                    .map(|n| n.retry_policy)
                    .unwrap_or_default();
                match decide(number, outcome, &policy) {
                    RetryDecision::Retry { .. } if self.cancel.is_cancelled() => {
                        self.mark_cancelled(&task);
                    }
                    RetryDecision::Retry { after } => self.schedule_retry(task, number, after),
                    RetryDecision::GiveUp => self.mark_failed(&task, number, outcome, error),
                }
            }
        }
    }

    fn schedule_retry(&mut self, task: String, attempt: u32, after: std::time::Duration) {
        info!(
            task = %task,
            attempt,
            retry_in_secs = after.as_secs_f64(),
            "Retry scheduled"
        );
        self.emit(
            "task.retry_scheduled",
            json!({
                "task": task,
                "next_attempt": attempt + 1,
                "after_ms": u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            }),
        );
        self.run.set_node_state(&task, NodeState::WaitingRetry);

        let cancel: &'a CancellationToken = self.cancel;
        self.in_flight.push(
            async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => NodeEvent::RetryAborted(task),
                    () = tokio::time::sleep(after) => NodeEvent::RetryDue(task),
                }
            }
            .boxed(),
        );
    }

    fn mark_failed(&mut self, task: &str, attempt: u32, outcome: AttemptOutcome, error: Option<String>) {
        warn!(
            task = %task,
            attempts = attempt,
            outcome = %outcome,
            error = error.as_deref().unwrap_or(""),
            "Task failed permanently"
        );
        self.emit(
            "task.failed",
            json!({
                "task": task,
                "attempts": attempt,
                "outcome": outcome,
                "error": error,
            }),
        );
        self.run.set_node_state(task, NodeState::Failed);
        self.failed = true;
        // Failed is terminal; in-flight attempts still drain into the log.
        self.run.transition(RunStatus::Failed);
    }

    fn mark_cancelled(&mut self, task: &str) {
        self.run.set_node_state(task, NodeState::Cancelled);
        self.emit(
            "task.cancelled",
            json!({ "task": task, "reason": self.cancel.reason() }),
        );
    }

    fn finish(mut self) -> PipelineRun {
        let skip_reason = if self.cancel.is_cancelled() {
            "run cancelled"
        } else {
            "upstream failed"
        };
        let never_started: Vec<String> = self
            .run
            .nodes_in(NodeState::Pending)
            .into_iter()
            .map(str::to_string)
            .collect();
        for task in never_started {
            self.run.set_node_state(&task, NodeState::Skipped);
            self.emit("task.skipped", json!({ "task": task, "reason": skip_reason }));
        }
        for task in std::mem::take(&mut self.due_retries) {
            self.mark_cancelled(&task);
        }

        let all_succeeded = self.succeeded.len() == self.definition.nodes().len();
        let status = if self.run.status() == RunStatus::Failed {
            RunStatus::Failed
        } else if all_succeeded {
            RunStatus::Succeeded
        } else if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        };
        self.run.transition(status);
        self.run.mark_finished(self.cancel.reason());

        let status = self.run.status();
        if status == RunStatus::Succeeded {
            info!(attempts = self.run.attempts().len(), "Run succeeded");
        } else {
            warn!(
                status = %status,
                attempts = self.run.attempts().len(),
                failed_task = ?self.run.failure().map(|a| a.task.as_str()),
                "Run did not succeed"
            );
        }
        self.emit(
            "run.completed",
            json!({
                "pipeline": self.definition.name(),
                "run_id": self.run.run_id(),
                "status": status,
                "attempts": self.run.attempts().len(),
            }),
        );
        self.run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TaskError;
    use crate::events::CollectingEventSink;
    use crate::executor::{AsyncFnTask, FnTask, TaskWork};
    use crate::pipeline::{PipelineBuilder, RetryPolicy, TaskNode};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ok(label: &str) -> Arc<dyn TaskWork> {
        let label = label.to_string();
        Arc::new(FnTask::new(label.clone(), move |_| Ok(label.clone())))
    }

    fn fatal() -> Arc<dyn TaskWork> {
        Arc::new(FnTask::new("fatal", |_| Err(TaskError::contract("bad invocation"))))
    }

    fn outcomes(run: &PipelineRun) -> Vec<(String, u32, AttemptOutcome)> {
        run.attempts()
            .iter()
            .map(|a| (a.task.clone(), a.attempt, a.outcome))
            .collect()
    }

    #[tokio::test]
    async fn test_linear_pipeline_succeeds() {
        let def = PipelineBuilder::new("p")
            .task(TaskNode::new("a", ok("a")))
            .task(TaskNode::new("b", ok("b")).after("a"))
            .task(TaskNode::new("c", ok("c")).after("b"))
            .build()
            .unwrap();

        let run = PipelineRunController::default().run(&def).await;

        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(
            outcomes(&run),
            vec![
                ("a".to_string(), 1, AttemptOutcome::Success),
                ("b".to_string(), 1, AttemptOutcome::Success),
                ("c".to_string(), 1, AttemptOutcome::Success),
            ]
        );
        assert!(run.finished_at().is_some());
    }

    #[tokio::test]
    async fn test_fail_fast_skips_downstream() {
        let def = PipelineBuilder::new("p")
            .task(TaskNode::new("a", fatal()).with_retry_policy(RetryPolicy::new(5, Duration::from_secs(1))))
            .task(TaskNode::new("b", ok("b")).after("a"))
            .build()
            .unwrap();

        let run = PipelineRunController::default().run(&def).await;

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.attempts().len(), 1);
        assert_eq!(run.node_state("b"), Some(NodeState::Skipped));
        assert_eq!(run.failure().map(|a| a.task.as_str()), Some("a"));
    }

    #[tokio::test]
    async fn test_continue_independent_runs_unrelated_branch() {
        let def = PipelineBuilder::new("p")
            .task(TaskNode::new("broken", fatal()))
            .task(TaskNode::new("after_broken", ok("x")).after("broken"))
            .task(TaskNode::new("healthy", ok("y")))
            .task(TaskNode::new("after_healthy", ok("z")).after("healthy"))
            .build()
            .unwrap();

        let controller = PipelineRunController::default().with_config(ControllerConfig {
            max_concurrent_tasks: 1,
            failure_mode: FailureMode::ContinueIndependent,
        });
        let run = controller.run(&def).await;

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(
            run.node_states(),
            vec![
                ("broken", NodeState::Failed),
                ("after_broken", NodeState::Skipped),
                ("healthy", NodeState::Succeeded),
                ("after_healthy", NodeState::Succeeded),
            ]
        );
    }

    #[tokio::test]
    async fn test_fail_fast_does_not_start_unrelated_pending_branch() {
        let def = PipelineBuilder::new("p")
            .task(TaskNode::new("broken", fatal()))
            .task(TaskNode::new("healthy", ok("y")))
            .build()
            .unwrap();

        let controller = PipelineRunController::default().with_config(ControllerConfig {
            max_concurrent_tasks: 1,
            failure_mode: FailureMode::FailFast,
        });
        let run = controller.run(&def).await;

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.node_state("healthy"), Some(NodeState::Skipped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_in_waits_for_all_predecessors() {
        let joined_early = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let slow = {
            let finished = Arc::clone(&finished);
            Arc::new(AsyncFnTask::new("slow", move |_ctx: TaskContext| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok("slow".to_string())
                }
            }))
        };
        let fast = {
            let finished = Arc::clone(&finished);
            Arc::new(FnTask::new("fast", move |_| {
                finished.fetch_add(1, Ordering::SeqCst);
                Ok("fast".to_string())
            }))
        };
        let join = {
            let finished = Arc::clone(&finished);
            let joined_early = Arc::clone(&joined_early);
            Arc::new(FnTask::new("join", move |_| {
                if finished.load(Ordering::SeqCst) < 2 {
                    joined_early.fetch_add(1, Ordering::SeqCst);
                }
                Ok("joined".to_string())
            }))
        };

        let def = PipelineBuilder::new("fan")
            .task(TaskNode::new("slow", slow))
            .task(TaskNode::new("fast", fast))
            .task(TaskNode::new("join", join).after_all(["slow", "fast"]))
            .build()
            .unwrap();

        let run = PipelineRunController::default().run(&def).await;

        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(joined_early.load(Ordering::SeqCst), 0);
        assert_eq!(run.attempts().last().map(|a| a.task.as_str()), Some("join"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_wait() {
        let def = PipelineBuilder::new("p")
            .task(
                TaskNode::new(
                    "flaky",
                    Arc::new(FnTask::new("flaky", |_| Err(TaskError::collaborator("503")))),
                )
                .with_retry_policy(RetryPolicy::with_retries(3, Duration::from_secs(60))),
            )
            .task(TaskNode::new("next", ok("next")).after("flaky"))
            .build()
            .unwrap();

        let cancel = Arc::new(CancellationToken::new());
        let canceller = {
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(90)).await;
                cancel.cancel("operator");
            })
        };

        let run = PipelineRunController::default()
            .execute(&def, PipelineRun::new(&def), &cancel)
            .await;
        canceller.await.unwrap();

        assert_eq!(run.status(), RunStatus::Cancelled);
        // Attempt 1 at t=0, attempt 2 at t=60, cancel at t=90 while waiting.
        assert_eq!(run.attempts_for("flaky").len(), 2);
        assert_eq!(run.node_state("flaky"), Some(NodeState::Cancelled));
        assert_eq!(run.node_state("next"), Some(NodeState::Skipped));
        assert_eq!(run.cancel_reason(), Some("operator"));
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let def = PipelineBuilder::new("p")
            .task(TaskNode::new("a", ok("a")))
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel("shutdown");

        let run = PipelineRunController::default()
            .execute(&def, PipelineRun::new(&def), &cancel)
            .await;

        assert_eq!(run.status(), RunStatus::Cancelled);
        assert!(run.attempts().is_empty());
        assert_eq!(run.node_state("a"), Some(NodeState::Skipped));
    }

    #[tokio::test]
    async fn test_emits_lifecycle_events() {
        let sink = Arc::new(CollectingEventSink::new());
        let def = PipelineBuilder::new("p")
            .task(TaskNode::new("a", fatal()))
            .task(TaskNode::new("b", ok("b")).after("a"))
            .build()
            .unwrap();

        PipelineRunController::default()
            .with_event_sink(sink.clone())
            .run(&def)
            .await;

        assert_eq!(
            sink.event_types(),
            vec![
                "run.started",
                "task.attempt.started",
                "task.attempt.finished",
                "task.failed",
                "task.skipped",
                "run.completed",
            ]
        );
        let (_, completed) = sink.events().pop().unwrap();
        assert_eq!(completed.unwrap()["status"], "failed");
    }

    #[tokio::test]
    async fn test_terminal_run_is_returned_unchanged() {
        let def = PipelineBuilder::new("p")
            .task(TaskNode::new("a", ok("a")))
            .build()
            .unwrap();
        let first = PipelineRunController::default().run(&def).await;
        let again = PipelineRunController::default()
            .execute(&def, first.clone(), &CancellationToken::new())
            .await;

        assert_eq!(again.attempts().len(), 1);
        assert_eq!(again.status(), RunStatus::Succeeded);
    }
}
