//! Error types for the nightflow orchestrator.
//!
//! Definition problems are caught once, when pipelines are loaded, and abort
//! startup. Task-level failures are never errors at this level: they are
//! classified into [`AttemptOutcome`](crate::core::AttemptOutcome) values and
//! kept in the run's attempt log.

use thiserror::Error;

/// The main error type for nightflow operations.
#[derive(Debug, Error)]
pub enum NightflowError {
    /// A pipeline definition failed load-time validation.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A pipeline with this name is already registered.
    #[error("Pipeline '{0}' is already registered")]
    DuplicatePipeline(String),

    /// No pipeline with this name is registered.
    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    /// The global tracing subscriber could not be installed.
    #[error("Failed to initialise tracing: {0}")]
    Observability(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A cron-like trigger expression could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid schedule '{expression}': {reason}")]
pub struct ScheduleError {
    /// The rejected expression.
    pub expression: String,
    /// Why it was rejected.
    pub reason: String,
}

impl ScheduleError {
    /// Creates a new schedule error.
    #[must_use]
    pub fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// A malformed pipeline definition, detected before any run starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// The pipeline name is empty or whitespace-only.
    #[error("Pipeline name cannot be empty or whitespace-only")]
    EmptyName,

    /// The pipeline declares no tasks.
    #[error("Pipeline '{pipeline}' has no tasks")]
    EmptyPipeline {
        /// The pipeline name.
        pipeline: String,
    },

    /// A task name contains characters outside `[A-Za-z0-9_.-]`.
    #[error("Pipeline '{pipeline}' has an invalid task name '{task}'")]
    InvalidName {
        /// The pipeline name.
        pipeline: String,
        /// The offending task name.
        task: String,
    },

    /// Two tasks share a name.
    #[error("Pipeline '{pipeline}' declares task '{task}' more than once")]
    DuplicateTask {
        /// The pipeline name.
        pipeline: String,
        /// The duplicated task name.
        task: String,
    },

    /// A task lists itself as a predecessor.
    #[error("Task '{task}' in pipeline '{pipeline}' cannot depend on itself")]
    SelfDependency {
        /// The pipeline name.
        pipeline: String,
        /// The task name.
        task: String,
    },

    /// A predecessor does not resolve to a task of the same pipeline.
    #[error("Task '{task}' in pipeline '{pipeline}' depends on unknown task '{dependency}'")]
    MissingDependency {
        /// The pipeline name.
        pipeline: String,
        /// The task declaring the dependency.
        task: String,
        /// The unresolved predecessor.
        dependency: String,
    },

    /// The task graph contains a cycle.
    #[error("Cycle detected in pipeline '{pipeline}': {}", .path.join(" -> "))]
    Cycle {
        /// The pipeline name.
        pipeline: String,
        /// The tasks forming the cycle, first task repeated at the end.
        path: Vec<String>,
    },

    /// The trigger schedule is not a valid cron-like expression.
    #[error("Pipeline '{pipeline}' has an invalid schedule: {source}")]
    InvalidSchedule {
        /// The pipeline name.
        pipeline: String,
        /// The parse failure.
        #[source]
        source: ScheduleError,
    },

    /// A task's retry policy is unusable.
    #[error("Task '{task}' in pipeline '{pipeline}' has an invalid retry policy: {reason}")]
    InvalidPolicy {
        /// The pipeline name.
        pipeline: String,
        /// The task name.
        task: String,
        /// Why the policy was rejected.
        reason: String,
    },
}

impl DefinitionError {
    /// Returns a stable code identifying the kind of definition error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyName => "DEF-EMPTY-NAME",
            Self::EmptyPipeline { .. } => "DEF-EMPTY",
            Self::InvalidName { .. } => "DEF-INVALID-NAME",
            Self::DuplicateTask { .. } => "DEF-DUPLICATE",
            Self::SelfDependency { .. } => "DEF-SELF-DEP",
            Self::MissingDependency { .. } => "DEF-MISSING-DEP",
            Self::Cycle { .. } => "DEF-CYCLE",
            Self::InvalidSchedule { .. } => "DEF-SCHEDULE",
            Self::InvalidPolicy { .. } => "DEF-POLICY",
        }
    }

    /// Returns a hint for fixing the definition, if one applies.
    #[must_use]
    pub fn fix_hint(&self) -> Option<&'static str> {
        match self {
            Self::Cycle { .. } => {
                Some("Remove one of the predecessor edges in the cycle to break it.")
            }
            Self::MissingDependency { .. } => Some(
                "Ensure every predecessor names a task of the same pipeline. Check for typos.",
            ),
            Self::EmptyPipeline { .. } => Some("Add at least one task before building."),
            Self::InvalidSchedule { .. } => Some(
                "Use five fields: minute hour day-of-month month day-of-week, e.g. '0 2 * * *'.",
            ),
            _ => None,
        }
    }
}

/// Failure reported by a task's bound work.
///
/// The executor turns this into an attempt outcome: collaborator failures are
/// retryable when the node's policy allows it, contract violations never are.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// An external collaborator (API, object store, warehouse, tool) failed.
    #[error("{message}")]
    Collaborator {
        /// Short description of the failure.
        message: String,
        /// Captured output (stderr, response body) if any.
        detail: Option<String>,
    },

    /// The work was invoked in a way that can never succeed.
    #[error("Contract violation: {0}")]
    Contract(String),
}

impl TaskError {
    /// Creates a collaborator failure.
    #[must_use]
    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::Collaborator {
            message: message.into(),
            detail: None,
        }
    }

    /// Creates a contract violation.
    #[must_use]
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// Attaches captured output to a collaborator failure.
    #[must_use]
    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        match self {
            Self::Collaborator { message, .. } => Self::Collaborator {
                message,
                detail: Some(detail.into()),
            },
            other => other,
        }
    }

    /// Returns the captured output, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Collaborator { detail, .. } => detail.as_deref(),
            Self::Contract(_) => None,
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        /// The file path.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the config schema.
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        /// The file path.
        path: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// An environment value could not be interpreted.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue {
        /// The variable name.
        key: String,
        /// The rejected value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_message() {
        let err = DefinitionError::Cycle {
            pipeline: "p".to_string(),
            path: vec!["a".into(), "b".into(), "c".into(), "a".into()],
        };

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.code(), "DEF-CYCLE");
        assert!(err.fix_hint().is_some());
    }

    #[test]
    fn test_schedule_error_is_source() {
        let err = DefinitionError::InvalidSchedule {
            pipeline: "nightly".to_string(),
            source: ScheduleError::new("0 0 *", "expected 5 fields"),
        };

        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source,
            Some("Invalid schedule '0 0 *': expected 5 fields".to_string())
        );
    }

    #[test]
    fn test_task_error_detail() {
        let err = TaskError::collaborator("dbt test exited with 1").with_detail("1 of 4 FAIL");
        assert_eq!(err.detail(), Some("1 of 4 FAIL"));
        assert_eq!(err.to_string(), "dbt test exited with 1");

        let contract = TaskError::contract("unknown selector").with_detail("ignored");
        assert_eq!(contract.detail(), None);
    }

    #[test]
    fn test_definition_error_into_nightflow_error() {
        let err: NightflowError = DefinitionError::EmptyName.into();
        assert!(matches!(err, NightflowError::Definition(DefinitionError::EmptyName)));
    }
}
