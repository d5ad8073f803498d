//! Invocation of the external transformation tool.
//!
//! The executor never spawns processes itself: [`TransformationTask`] talks to
//! a [`PhaseRunner`], and [`CommandPhaseRunner`] is the subprocess-backed
//! implementation.

use super::{TaskContext, TaskWork};
use crate::errors::TaskError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// A sub-phase of the transformation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Connection and project check; takes no selector.
    Debug,
    /// Data tests over a model selection.
    Test,
    /// Model materialization over a model selection.
    Run,
}

impl Phase {
    /// Returns the tool sub-command.
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Test => "test",
            Self::Run => "run",
        }
    }

    /// Builds the argument list for this phase.
    ///
    /// # Errors
    ///
    /// Returns a contract error if `test`/`run` has no selector, or `debug`
    /// is given one.
    pub fn args(&self, selector: Option<&str>) -> Result<Vec<String>, TaskError> {
        match (self, selector) {
            (Self::Debug, None) => Ok(vec![self.command().to_string()]),
            (Self::Debug, Some(sel)) => Err(TaskError::contract(format!(
                "phase 'debug' does not take a selector (got '{sel}')"
            ))),
            (_, Some(sel)) if !sel.trim().is_empty() => Ok(vec![
                self.command().to_string(),
                "--select".to_string(),
                sel.to_string(),
            ]),
            _ => Err(TaskError::contract(format!(
                "phase '{}' requires a selector",
                self.command()
            ))),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Exit status and captured streams of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitResult {
    /// Process exit code; `-1` if terminated by a signal.
    pub code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExitResult {
    /// Returns true for exit code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Returns both streams, stdout first, for failure details.
    #[must_use]
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Narrow interface to the transformation tool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    /// Runs one phase with an optional model selector.
    ///
    /// # Errors
    ///
    /// Returns an error only if the tool could not be invoked at all; a
    /// non-zero exit is reported through [`ExitResult::code`].
    async fn run_phase(&self, phase: Phase, selector: Option<String>) -> Result<ExitResult, TaskError>;
}

/// Runs the tool as a subprocess.
#[derive(Debug, Clone)]
pub struct CommandPhaseRunner {
    binary: PathBuf,
    project_dir: Option<PathBuf>,
    profiles_dir: Option<PathBuf>,
}

impl CommandPhaseRunner {
    /// Creates a runner for `binary`, resolved through `PATH` if relative.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            project_dir: None,
            profiles_dir: None,
        }
    }

    /// Sets the working directory of the tool.
    #[must_use]
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Passes `--profiles-dir <dir>` to every phase.
    #[must_use]
    pub fn with_profiles_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profiles_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl PhaseRunner for CommandPhaseRunner {
    async fn run_phase(&self, phase: Phase, selector: Option<String>) -> Result<ExitResult, TaskError> {
        let args = phase.args(selector.as_deref())?;

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.profiles_dir {
            command.arg("--profiles-dir").arg(dir);
        }
        if let Some(dir) = &self.project_dir {
            command.current_dir(dir);
        }

        debug!(binary = %self.binary.display(), args = ?args, "Invoking transformation tool");
        let output = command.output().await.map_err(|e| {
            TaskError::collaborator(format!(
                "failed to start '{}': {e}",
                self.binary.display()
            ))
        })?;

        Ok(ExitResult {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Task work bound to one phase of the transformation tool.
///
/// Exit code 0 yields the captured stdout; any other exit code is a
/// collaborator failure carrying the captured output.
#[derive(Clone)]
pub struct TransformationTask {
    runner: Arc<dyn PhaseRunner>,
    phase: Phase,
    selector: Option<String>,
}

impl TransformationTask {
    /// Creates work for `phase` with no selector.
    #[must_use]
    pub fn new(runner: Arc<dyn PhaseRunner>, phase: Phase) -> Self {
        Self {
            runner,
            phase,
            selector: None,
        }
    }

    /// Creates work for `phase` restricted to `selector`.
    #[must_use]
    pub fn selecting(runner: Arc<dyn PhaseRunner>, phase: Phase, selector: impl Into<String>) -> Self {
        Self {
            runner,
            phase,
            selector: Some(selector.into()),
        }
    }

    /// Returns the phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the model selector, if any.
    #[must_use]
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }
}

impl fmt::Debug for TransformationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationTask")
            .field("phase", &self.phase)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskWork for TransformationTask {
    async fn run(&self, _ctx: &TaskContext) -> Result<String, TaskError> {
        let result = self
            .runner
            .run_phase(self.phase, self.selector.clone())
            .await?;

        if result.success() {
            Ok(result.stdout)
        } else {
            Err(TaskError::collaborator(format!(
                "'{}' exited with code {}",
                self.phase, result.code
            ))
            .with_detail(result.combined_output()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunId;
    use mockall::predicate::eq;

    fn ctx() -> TaskContext {
        TaskContext::new("dbt-staging-pipeline", RunId::new(), "dbt_run_staging", 1)
    }

    #[test]
    fn test_phase_args() {
        assert_eq!(Phase::Debug.args(None).unwrap(), vec!["debug"]);
        assert_eq!(
            Phase::Test.args(Some("models/staged")).unwrap(),
            vec!["test", "--select", "models/staged"]
        );
        assert!(matches!(Phase::Run.args(None), Err(TaskError::Contract(_))));
        assert!(matches!(Phase::Run.args(Some(" ")), Err(TaskError::Contract(_))));
        assert!(matches!(Phase::Debug.args(Some("x")), Err(TaskError::Contract(_))));
    }

    #[tokio::test]
    async fn test_transformation_success_returns_stdout() {
        let mut runner = MockPhaseRunner::new();
        runner
            .expect_run_phase()
            .with(eq(Phase::Run), eq(Some("models/staged".to_string())))
            .times(1)
            .returning(|_, _| {
                Ok(ExitResult {
                    code: 0,
                    stdout: "Completed successfully".to_string(),
                    stderr: String::new(),
                })
            });

        let task = TransformationTask::selecting(Arc::new(runner), Phase::Run, "models/staged");
        assert_eq!(task.run(&ctx()).await.unwrap(), "Completed successfully");
    }

    #[tokio::test]
    async fn test_transformation_nonzero_exit_is_collaborator_failure() {
        let mut runner = MockPhaseRunner::new();
        runner.expect_run_phase().returning(|_, _| {
            Ok(ExitResult {
                code: 1,
                stdout: "1 of 3 FAIL".to_string(),
                stderr: "Database Error".to_string(),
            })
        });

        let task = TransformationTask::selecting(Arc::new(runner), Phase::Test, "models/cleaned");
        let err = task.run(&ctx()).await.unwrap_err();

        assert!(matches!(err, TaskError::Collaborator { .. }));
        assert_eq!(err.to_string(), "'test' exited with code 1");
        assert_eq!(err.detail(), Some("1 of 3 FAIL\nDatabase Error"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_passes_profiles_dir() {
        let runner = CommandPhaseRunner::new("echo").with_profiles_dir("/etc/dbt");
        let result = runner
            .run_phase(Phase::Test, Some("models/staged".to_string()))
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "test --select models/staged --profiles-dir /etc/dbt");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_reports_exit_code() {
        let runner = CommandPhaseRunner::new("false");
        let result = runner.run_phase(Phase::Debug, None).await.unwrap();
        assert_eq!(result.code, 1);
    }

    #[tokio::test]
    async fn test_command_runner_missing_binary() {
        let runner = CommandPhaseRunner::new("/nonexistent/transform-tool");
        let err = runner.run_phase(Phase::Debug, None).await.unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}
