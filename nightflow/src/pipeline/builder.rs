//! Pipeline builder with load-time validation.

use super::{DependencyGraph, PipelineDefinition, TaskNode};
use crate::errors::DefinitionError;
use crate::scheduler::CronSchedule;
use std::collections::BTreeSet;

/// Task names are non-empty and limited to `[A-Za-z0-9_.-]`.
fn is_valid_task_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Builder for validated pipeline definitions.
///
/// Nothing is checked until [`PipelineBuilder::build`], which runs every
/// structural validation and reports the first problem found.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    description: Option<String>,
    nodes: Vec<TaskNode>,
    schedule: Option<String>,
    timezone: Option<String>,
    tags: BTreeSet<String>,
}

impl PipelineBuilder {
    /// Creates a builder for the pipeline `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            schedule: None,
            timezone: None,
            tags: BTreeSet::new(),
        }
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a task node; declaration order is the tie-break order.
    #[must_use]
    pub fn task(mut self, node: TaskNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Sets the five-field cron expression.
    #[must_use]
    pub fn schedule(mut self, expression: impl Into<String>) -> Self {
        self.schedule = Some(expression.into());
        self
    }

    /// Sets the IANA timezone the schedule is evaluated in (default UTC).
    #[must_use]
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Adds an observability tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds several observability tags.
    #[must_use]
    pub fn tags(self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        tags.into_iter().fold(self, Self::tag)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of declared tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.nodes.len()
    }

    /// Validates and builds the definition.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] for an empty name or pipeline, invalid
    /// task names, unusable retry policies, structural graph problems and
    /// unparsable schedules.
    pub fn build(self) -> Result<PipelineDefinition, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if self.nodes.is_empty() {
            return Err(DefinitionError::EmptyPipeline { pipeline: self.name });
        }

        for node in &self.nodes {
            if !is_valid_task_name(&node.name) {
                return Err(DefinitionError::InvalidName {
                    pipeline: self.name,
                    task: node.name.clone(),
                });
            }
            if let Err(reason) = node.retry_policy.validate() {
                return Err(DefinitionError::InvalidPolicy {
                    pipeline: self.name,
                    task: node.name.clone(),
                    reason,
                });
            }
        }

        let edges: Vec<(String, Vec<String>)> = self
            .nodes
            .iter()
            .map(|n| (n.name.clone(), n.predecessors.clone()))
            .collect();
        let graph = DependencyGraph::build(self.name.clone(), &edges)?;

        let schedule = match self.schedule.as_deref() {
            Some(expression) => {
                let parsed = CronSchedule::parse(expression).and_then(|schedule| {
                    match self.timezone.as_deref() {
                        Some(tz) => Ok(schedule.with_timezone(CronSchedule::parse_timezone(tz)?)),
                        None => Ok(schedule),
                    }
                });
                Some(parsed.map_err(|source| DefinitionError::InvalidSchedule {
                    pipeline: self.name.clone(),
                    source,
                })?)
            }
            None => None,
        };

        Ok(PipelineDefinition::from_parts(
            self.name,
            self.description,
            self.nodes,
            schedule,
            self.tags,
            graph,
        ))
    }
}
