//! Narrow interfaces to the external systems the nightly pipelines drive.
//!
//! Every trait here is a seam for tests: the orchestration core only sees
//! [`TaskWork`](crate::executor::TaskWork) implementations built on top of
//! these interfaces, and every failure surfaces as a retryable
//! [`TaskError::Collaborator`].

mod ingestion;
mod local;
mod memory;

#[cfg(feature = "http")]
mod http;

pub use ingestion::{
    parse_csv, raw_table_name, ApiIngestionTask, CsvTable, ObjectStoreIngestionTask,
};
pub use local::{JsonLinesWarehouse, LocalObjectStore};
pub use memory::{InMemoryObjectStore, InMemoryWarehouse, StaticApiSource};

#[cfg(feature = "http")]
pub use http::HttpApiSource;

use crate::errors::TaskError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// One row of tabular data, keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// How rows are written into a warehouse table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Replace the table's contents.
    #[default]
    Overwrite,
    /// Add the rows to the existing contents.
    Append,
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// Upstream API producing records.
#[async_trait]
pub trait ApiSource: Send + Sync + Debug {
    /// Fetches the current batch of records.
    async fn fetch(&self) -> Result<Vec<Record>, TaskError>;
}

/// Bucket-addressed object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Lists every object name in the bucket, recursively.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, TaskError>;

    /// Reads one object's bytes.
    async fn read_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, TaskError>;
}

/// Destination warehouse for raw tables.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WarehouseLoader: Send + Sync {
    /// Writes rows into `table`, returning the number of rows written.
    async fn load(&self, table: &str, rows: Vec<Record>, mode: LoadMode) -> Result<usize, TaskError>;
}
