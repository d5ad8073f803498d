//! Task executor.
//!
//! Runs one attempt of a task node's bound work, bounded by a timeout and the
//! run's cancellation token, and classifies the result into an
//! [`AttemptOutcome`]. Panics inside work are contained and reported as fatal.

mod phase;
mod work;

pub use phase::{CommandPhaseRunner, ExitResult, Phase, PhaseRunner, TransformationTask};
pub use work::{AsyncFnTask, FnTask, TaskContext, TaskWork};

#[cfg(test)]
pub use phase::MockPhaseRunner;

use crate::cancellation::CancellationToken;
use crate::core::{AttemptOutcome, TaskAttempt};
use crate::errors::TaskError;
use crate::pipeline::{RetryPolicy, TaskNode};
use crate::utils::now_utc;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};

/// Classifies a work error under a node's retry policy.
///
/// Collaborator failures are retryable unless the policy opts out; contract
/// violations are always fatal.
#[must_use]
pub fn classify(error: &TaskError, policy: &RetryPolicy) -> AttemptOutcome {
    match error {
        TaskError::Collaborator { .. } if policy.retry_collaborator_failures => {
            AttemptOutcome::RetryableFailure
        }
        _ => AttemptOutcome::FatalFailure,
    }
}

enum Completion {
    Finished(Result<String, TaskError>),
    Panicked(String),
    TimedOut(Duration),
    Cancelled(Option<String>),
}

/// Executes single attempts of task nodes.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutor {
    default_timeout: Option<Duration>,
}

impl TaskExecutor {
    /// Creates an executor with no default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout applied to nodes that do not declare their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Returns the default per-attempt timeout.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Runs one attempt of `node` and returns its record.
    ///
    /// Never fails: every way an attempt can end is expressed in the
    /// returned [`TaskAttempt`].
    pub async fn execute(
        &self,
        node: &TaskNode,
        ctx: TaskContext,
        cancel: &CancellationToken,
    ) -> TaskAttempt {
        let started_at = now_utc();
        let attempt = ctx.attempt;
        let limit = node.timeout.or(self.default_timeout);

        debug!(
            pipeline = %ctx.pipeline,
            run_id = %ctx.run_id,
            task = %node.name,
            attempt,
            timeout = ?limit,
            "Starting attempt"
        );

        let invocation = async {
            match AssertUnwindSafe(node.work.run(&ctx)).catch_unwind().await {
                Ok(result) => Completion::Finished(result),
                Err(panic) => Completion::Panicked(panic_message(panic.as_ref())),
            }
        };

        let completion = tokio::select! {
            biased;
            () = cancel.cancelled() => Completion::Cancelled(cancel.reason()),
            completion = bounded(limit, invocation) => completion,
        };
        let finished_at = now_utc();

        match completion {
            Completion::Finished(Ok(output)) => {
                TaskAttempt::success(&node.name, attempt, started_at, finished_at, output)
            }
            Completion::Finished(Err(error)) => {
                let outcome = classify(&error, &node.retry_policy);
                let message = match error.detail() {
                    Some(detail) => format!("{error}\n{detail}"),
                    None => error.to_string(),
                };
                TaskAttempt::unsuccessful(&node.name, attempt, started_at, finished_at, outcome, message)
            }
            Completion::Panicked(message) => {
                warn!(task = %node.name, attempt, panic = %message, "Task work panicked");
                TaskAttempt::unsuccessful(
                    &node.name,
                    attempt,
                    started_at,
                    finished_at,
                    AttemptOutcome::FatalFailure,
                    format!("task panicked: {message}"),
                )
            }
            Completion::TimedOut(limit) => TaskAttempt::unsuccessful(
                &node.name,
                attempt,
                started_at,
                finished_at,
                AttemptOutcome::TimedOut,
                format!("timed out after {}s", limit.as_secs_f64()),
            ),
            Completion::Cancelled(reason) => TaskAttempt::unsuccessful(
                &node.name,
                attempt,
                started_at,
                finished_at,
                AttemptOutcome::Cancelled,
                format!("cancelled: {}", reason.unwrap_or_else(|| "no reason given".to_string())),
            ),
        }
    }
}

async fn bounded<F>(limit: Option<Duration>, invocation: F) -> Completion
where
    F: Future<Output = Completion>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, invocation)
            .await
            .unwrap_or(Completion::TimedOut(limit)),
        None => invocation.await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunId;
    use std::sync::Arc;

    fn ctx(task: &str, attempt: u32) -> TaskContext {
        TaskContext::new("ingestion", RunId::new(), task, attempt)
    }

    fn node(name: &str, work: Arc<dyn TaskWork>) -> TaskNode {
        TaskNode::new(name, work).with_retry_policy(RetryPolicy::new(3, Duration::from_secs(60)))
    }

    #[test]
    fn test_classify() {
        let retrying = RetryPolicy::new(3, Duration::from_secs(60));
        let strict = retrying.without_collaborator_retries();

        assert_eq!(
            classify(&TaskError::collaborator("503"), &retrying),
            AttemptOutcome::RetryableFailure
        );
        assert_eq!(
            classify(&TaskError::collaborator("503"), &strict),
            AttemptOutcome::FatalFailure
        );
        assert_eq!(
            classify(&TaskError::contract("bad selector"), &retrying),
            AttemptOutcome::FatalFailure
        );
    }

    #[tokio::test]
    async fn test_success_captures_output() {
        let work = Arc::new(FnTask::new("ok", |_| Ok("42 rows".to_string())));
        let attempt = TaskExecutor::new()
            .execute(&node("load", work), ctx("load", 1), &CancellationToken::new())
            .await;

        assert_eq!(attempt.outcome, AttemptOutcome::Success);
        assert_eq!(attempt.output.as_deref(), Some("42 rows"));
        assert_eq!(attempt.attempt, 1);
        assert!(attempt.finished_at >= attempt.started_at);
    }

    #[tokio::test]
    async fn test_collaborator_failure_keeps_detail() {
        let work = Arc::new(FnTask::new("fail", |_| {
            Err(TaskError::collaborator("upstream 503").with_detail("Service Unavailable"))
        }));
        let attempt = TaskExecutor::new()
            .execute(&node("fetch", work), ctx("fetch", 2), &CancellationToken::new())
            .await;

        assert_eq!(attempt.outcome, AttemptOutcome::RetryableFailure);
        assert_eq!(attempt.attempt, 2);
        assert_eq!(attempt.error.as_deref(), Some("upstream 503\nService Unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_timed_out_outcome() {
        let work = Arc::new(AsyncFnTask::new("slow", |_ctx: TaskContext| async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(String::new())
        }));
        let slow = node("slow", work).with_timeout(Duration::from_secs(30));

        let attempt = TaskExecutor::new()
            .execute(&slow, ctx("slow", 1), &CancellationToken::new())
            .await;

        assert_eq!(attempt.outcome, AttemptOutcome::TimedOut);
        assert!(attempt.error.unwrap().contains("timed out after 30s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies() {
        let work = Arc::new(AsyncFnTask::new("slow", |_ctx: TaskContext| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(String::new())
        }));
        let executor = TaskExecutor::new().with_default_timeout(Duration::from_secs(1));

        let attempt = executor
            .execute(&node("slow", work), ctx("slow", 1), &CancellationToken::new())
            .await;
        assert_eq!(attempt.outcome, AttemptOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_panic_is_fatal() {
        let work = Arc::new(FnTask::new("boom", |_| -> Result<String, TaskError> {
            panic!("index out of bounds")
        }));
        let attempt = TaskExecutor::new()
            .execute(&node("boom", work), ctx("boom", 1), &CancellationToken::new())
            .await;

        assert_eq!(attempt.outcome, AttemptOutcome::FatalFailure);
        assert!(attempt.error.unwrap().contains("index out of bounds"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_attempt() {
        let work = Arc::new(AsyncFnTask::new("slow", |_ctx: TaskContext| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }));
        let slow = node("slow", work);
        let cancel = Arc::new(CancellationToken::new());

        let canceller = {
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                cancel.cancel("operator request");
            })
        };

        let attempt = TaskExecutor::new().execute(&slow, ctx("slow", 1), &cancel).await;
        canceller.await.unwrap();

        assert_eq!(attempt.outcome, AttemptOutcome::Cancelled);
        assert_eq!(attempt.error.as_deref(), Some("cancelled: operator request"));
    }
}
