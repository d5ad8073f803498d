//! Runtime configuration.
//!
//! A [`NightflowConfig`] is built once at startup, from a JSON file, the
//! environment, or both, and handed to collaborators at construction. Task
//! bodies never read the environment themselves.
//!
//! Environment keys follow the deployment the pipelines were written for:
//! `MINIO_*` for the object store, `SNOWFLAKE_*` for the warehouse and
//! `NIGHTFLOW_*` for everything else.

use crate::errors::ConfigError;
use crate::executor::TaskExecutor;
use crate::observability::LogFormat;
use crate::pipeline::{ControllerConfig, FailureMode};
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// A credential that never appears in logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the credential itself.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if no credential is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Scheduler loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Terminal runs kept in memory.
    pub archive_capacity: usize,
    /// Checkpoint file for crash resume.
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            archive_capacity: 64,
            checkpoint_path: None,
        }
    }
}

/// Executor and controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Per-attempt timeout applied to nodes without their own.
    pub default_timeout_secs: Option<u64>,
    /// Attempts running at once within one run.
    pub max_concurrent_tasks: usize,
    /// Handling of unstarted nodes after a permanent failure.
    pub failure_mode: FailureMode,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: None,
            max_concurrent_tasks: ControllerConfig::default().max_concurrent_tasks,
            failure_mode: FailureMode::default(),
        }
    }
}

/// Transformation tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    /// Tool executable.
    pub binary: PathBuf,
    /// Working directory for every phase.
    pub project_dir: Option<PathBuf>,
    /// Passed as `--profiles-dir`.
    pub profiles_dir: Option<PathBuf>,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("dbt"),
            project_dir: None,
            profiles_dir: None,
        }
    }
}

/// Object store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreSettings {
    /// `host:port` of the store.
    pub endpoint: String,
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: Secret,
    /// Bucket holding the CSV exports.
    pub bucket: String,
    /// Use TLS.
    pub secure: bool,
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9000".to_string(),
            access_key: String::new(),
            secret_key: Secret::default(),
            bucket: "raw".to_string(),
            secure: false,
        }
    }
}

/// Warehouse connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSettings {
    /// Account identifier.
    pub account: String,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: Secret,
    /// Compute warehouse.
    pub warehouse: String,
    /// Target database.
    pub database: String,
    /// Schema receiving raw tables.
    pub raw_schema: String,
    /// Session role.
    pub role: String,
}

/// Upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Endpoint returning records; API ingestion needs it set.
    pub url: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Raw table receiving the records.
    pub table: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
            table: "API_RAW".to_string(),
        }
    }
}

/// Directories used by the local collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Root whose subdirectories act as buckets.
    pub object_root: PathBuf,
    /// Root of the JSON-lines warehouse.
    pub warehouse_root: PathBuf,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            object_root: PathBuf::from("data/objects"),
            warehouse_root: PathBuf::from("data/warehouse"),
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Line format.
    pub format: LogFormat,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NightflowConfig {
    /// Scheduler loop.
    pub scheduler: SchedulerSettings,
    /// Executor and controller.
    pub executor: ExecutorSettings,
    /// Transformation tool.
    pub transform: TransformSettings,
    /// Object store.
    pub object_store: ObjectStoreSettings,
    /// Warehouse.
    pub warehouse: WarehouseSettings,
    /// Upstream API.
    pub api: ApiSettings,
    /// Local collaborators.
    pub local: LocalSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl NightflowConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Builds a config from defaults and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from defaults and a key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparseable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().with_overrides(lookup)
    }

    /// Applies every key present in `lookup` on top of this config.
    ///
    /// Empty values are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparseable values.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("MINIO_EXTERNAL_URL") {
            self.object_store.endpoint = v;
        }
        if let Some(v) = get("MINIO_ACCESS_KEY") {
            self.object_store.access_key = v;
        }
        if let Some(v) = get("MINIO_SECRET_KEY") {
            self.object_store.secret_key = Secret::new(v);
        }
        if let Some(v) = get("MINIO_BUCKET_NAME") {
            self.object_store.bucket = v;
        }
        if let Some(v) = get("MINIO_SECURE") {
            self.object_store.secure = parse_bool("MINIO_SECURE", &v)?;
        }

        if let Some(v) = get("SNOWFLAKE_ACCOUNT") {
            self.warehouse.account = v;
        }
        if let Some(v) = get("SNOWFLAKE_USER") {
            self.warehouse.user = v;
        }
        if let Some(v) = get("SNOWFLAKE_PASSWORD") {
            self.warehouse.password = Secret::new(v);
        }
        if let Some(v) = get("SNOWFLAKE_WAREHOUSE") {
            self.warehouse.warehouse = v;
        }
        if let Some(v) = get("SNOWFLAKE_DATABASE") {
            self.warehouse.database = v;
        }
        if let Some(v) = get("SNOWFLAKE_SCHEMA_RAW") {
            self.warehouse.raw_schema = v;
        }
        if let Some(v) = get("SNOWFLAKE_ROLE") {
            self.warehouse.role = v;
        }

        if let Some(v) = get("NIGHTFLOW_TICK_INTERVAL_SECS") {
            self.scheduler.tick_interval_secs = parse("NIGHTFLOW_TICK_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("NIGHTFLOW_ARCHIVE_CAPACITY") {
            self.scheduler.archive_capacity = parse("NIGHTFLOW_ARCHIVE_CAPACITY", &v)?;
        }
        if let Some(v) = get("NIGHTFLOW_CHECKPOINT_PATH") {
            self.scheduler.checkpoint_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("NIGHTFLOW_TASK_TIMEOUT_SECS") {
            self.executor.default_timeout_secs = Some(parse("NIGHTFLOW_TASK_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("NIGHTFLOW_MAX_CONCURRENT_TASKS") {
            self.executor.max_concurrent_tasks = parse("NIGHTFLOW_MAX_CONCURRENT_TASKS", &v)?;
        }
        if let Some(v) = get("NIGHTFLOW_FAILURE_MODE") {
            self.executor.failure_mode = match v.to_ascii_lowercase().as_str() {
                "fail_fast" => FailureMode::FailFast,
                "continue_independent" => FailureMode::ContinueIndependent,
                _ => return Err(invalid("NIGHTFLOW_FAILURE_MODE", &v)),
            };
        }
        if let Some(v) = get("NIGHTFLOW_DBT_BINARY") {
            self.transform.binary = PathBuf::from(v);
        }
        if let Some(v) = get("NIGHTFLOW_DBT_PROJECT_DIR") {
            self.transform.project_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("NIGHTFLOW_DBT_PROFILES_DIR") {
            self.transform.profiles_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("NIGHTFLOW_API_URL") {
            self.api.url = Some(v);
        }
        if let Some(v) = get("NIGHTFLOW_API_TIMEOUT_SECS") {
            self.api.timeout_secs = parse("NIGHTFLOW_API_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("NIGHTFLOW_API_TABLE") {
            self.api.table = v;
        }
        if let Some(v) = get("NIGHTFLOW_OBJECT_ROOT") {
            self.local.object_root = PathBuf::from(v);
        }
        if let Some(v) = get("NIGHTFLOW_WAREHOUSE_ROOT") {
            self.local.warehouse_root = PathBuf::from(v);
        }
        if let Some(v) = get("NIGHTFLOW_LOG_FORMAT") {
            self.logging.format = v.parse().map_err(|_| invalid("NIGHTFLOW_LOG_FORMAT", &v))?;
        }

        Ok(self)
    }

    /// Scheduler settings in the form the scheduler takes.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(self.scheduler.tick_interval_secs.max(1)),
            archive_capacity: self.scheduler.archive_capacity,
            checkpoint_path: self.scheduler.checkpoint_path.clone(),
        }
    }

    /// Controller settings in the form the controller takes.
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_concurrent_tasks: self.executor.max_concurrent_tasks.max(1),
            failure_mode: self.executor.failure_mode,
        }
    }

    /// Builds the task executor.
    #[must_use]
    pub fn task_executor(&self) -> TaskExecutor {
        match self.executor.default_timeout_secs {
            Some(secs) => TaskExecutor::new().with_default_timeout(Duration::from_secs(secs)),
            None => TaskExecutor::new(),
        }
    }

    /// Per-request timeout of the API source.
    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
