//! The unit of work bound to a task node.

use crate::core::RunId;
use crate::errors::TaskError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;

/// What an attempt knows about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    /// The pipeline name.
    pub pipeline: String,
    /// The run this attempt belongs to.
    pub run_id: RunId,
    /// The task name.
    pub task: String,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

impl TaskContext {
    /// Creates a context for one attempt.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, run_id: RunId, task: impl Into<String>, attempt: u32) -> Self {
        Self {
            pipeline: pipeline.into(),
            run_id,
            task: task.into(),
            attempt,
        }
    }
}

/// Work invoked by the task executor.
///
/// Implementations delegate to an external collaborator (API, object store,
/// warehouse, transformation tool) and return the captured output.
/// Re-invocation after a retryable failure must be safe.
#[async_trait]
pub trait TaskWork: Send + Sync + Debug {
    /// Performs one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Collaborator`] for transient failures and
    /// [`TaskError::Contract`] for failures that can never succeed.
    async fn run(&self, ctx: &TaskContext) -> Result<String, TaskError>;
}

/// A synchronous closure used as task work.
pub struct FnTask<F>
where
    F: Fn(&TaskContext) -> Result<String, TaskError> + Send + Sync,
{
    label: String,
    func: F,
}

impl<F> FnTask<F>
where
    F: Fn(&TaskContext) -> Result<String, TaskError> + Send + Sync,
{
    /// Creates closure-backed work.
    pub fn new(label: impl Into<String>, func: F) -> Self {
        Self {
            label: label.into(),
            func,
        }
    }
}

impl<F> Debug for FnTask<F>
where
    F: Fn(&TaskContext) -> Result<String, TaskError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask").field("label", &self.label).finish()
    }
}

#[async_trait]
impl<F> TaskWork for FnTask<F>
where
    F: Fn(&TaskContext) -> Result<String, TaskError> + Send + Sync,
{
    async fn run(&self, ctx: &TaskContext) -> Result<String, TaskError> {
        (self.func)(ctx)
    }
}

/// An async closure used as task work.
pub struct AsyncFnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, TaskError>> + Send,
{
    label: String,
    func: F,
}

impl<F, Fut> AsyncFnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, TaskError>> + Send,
{
    /// Creates async closure-backed work.
    pub fn new(label: impl Into<String>, func: F) -> Self {
        Self {
            label: label.into(),
            func,
        }
    }
}

impl<F, Fut> Debug for AsyncFnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, TaskError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnTask").field("label", &self.label).finish()
    }
}

#[async_trait]
impl<F, Fut> TaskWork for AsyncFnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, TaskError>> + Send,
{
    async fn run(&self, ctx: &TaskContext) -> Result<String, TaskError> {
        (self.func)(ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_task_sees_attempt_number() {
        let work = FnTask::new("flaky", |ctx| {
            if ctx.attempt < 2 {
                Err(TaskError::collaborator("not yet"))
            } else {
                Ok(format!("ok on {}", ctx.attempt))
            }
        });

        let first = TaskContext::new("p", RunId::new(), "t", 1);
        let second = TaskContext { attempt: 2, ..first.clone() };

        assert!(work.run(&first).await.is_err());
        assert_eq!(work.run(&second).await.unwrap(), "ok on 2");
    }

    #[tokio::test]
    async fn test_async_fn_task() {
        let work = AsyncFnTask::new("echo", |ctx: TaskContext| async move { Ok(ctx.task) });
        let ctx = TaskContext::new("p", RunId::new(), "load", 1);

        assert_eq!(work.run(&ctx).await.unwrap(), "load");
        assert!(format!("{work:?}").contains("echo"));
    }
}
