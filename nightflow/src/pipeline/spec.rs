//! Pipeline and task node definitions.

use super::{DependencyGraph, RetryPolicy};
use crate::executor::TaskWork;
use crate::scheduler::CronSchedule;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// The trigger of a pipeline: a cron-like expression in a timezone.
pub type TriggerSchedule = CronSchedule;

/// A unit of work with a retry policy and predecessor tasks.
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// The task name, unique within its pipeline.
    pub name: String,
    /// Names of tasks that must succeed first, in declared order.
    pub predecessors: Vec<String>,
    /// Retry policy applied by the run controller.
    pub retry_policy: RetryPolicy,
    /// Per-attempt timeout; falls back to the executor default.
    pub timeout: Option<Duration>,
    /// The bound work.
    pub work: Arc<dyn TaskWork>,
}

impl TaskNode {
    /// Creates a node with no predecessors and a single-attempt policy.
    #[must_use]
    pub fn new(name: impl Into<String>, work: Arc<dyn TaskWork>) -> Self {
        Self {
            name: name.into(),
            predecessors: Vec::new(),
            retry_policy: RetryPolicy::no_retry(),
            timeout: None,
            work,
        }
    }

    /// Adds a predecessor.
    #[must_use]
    pub fn after(mut self, predecessor: impl Into<String>) -> Self {
        let predecessor = predecessor.into();
        if !self.predecessors.contains(&predecessor) {
            self.predecessors.push(predecessor);
        }
        self
    }

    /// Adds several predecessors.
    #[must_use]
    pub fn after_all(self, predecessors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        predecessors.into_iter().fold(self, Self::after)
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A validated, immutable pipeline.
///
/// Only [`PipelineBuilder::build`](super::PipelineBuilder::build) creates
/// definitions, so the task graph is always acyclic and fully resolved.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    description: Option<String>,
    nodes: Vec<TaskNode>,
    schedule: Option<TriggerSchedule>,
    tags: BTreeSet<String>,
    graph: DependencyGraph,
}

impl PipelineDefinition {
    pub(super) fn from_parts(
        name: String,
        description: Option<String>,
        nodes: Vec<TaskNode>,
        schedule: Option<TriggerSchedule>,
        tags: BTreeSet<String>,
        graph: DependencyGraph,
    ) -> Self {
        Self {
            name,
            description,
            nodes,
            schedule,
            tags,
            graph,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the task nodes in declared order.
    #[must_use]
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Looks up a task node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Returns the trigger schedule, if the pipeline is scheduled.
    #[must_use]
    pub fn schedule(&self) -> Option<&TriggerSchedule> {
        self.schedule.as_ref()
    }

    /// Returns the observability tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns true if the pipeline carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Returns the resolved dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FnTask;

    #[test]
    fn test_task_node_builder() {
        let node = TaskNode::new("dbt_run_staging", Arc::new(FnTask::new("run", |_| Ok(String::new()))))
            .after("dbt_test_staging")
            .after("dbt_test_staging")
            .with_retry_policy(RetryPolicy::with_retries(1, Duration::from_secs(120)))
            .with_timeout(Duration::from_secs(900));

        assert_eq!(node.predecessors, vec!["dbt_test_staging"]);
        assert_eq!(node.retry_policy.max_attempts, 2);
        assert_eq!(node.timeout, Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_after_all_keeps_order() {
        let node = TaskNode::new("join", Arc::new(FnTask::new("join", |_| Ok(String::new()))))
            .after_all(["left", "right", "left"]);
        assert_eq!(node.predecessors, vec!["left", "right"]);
    }
}
