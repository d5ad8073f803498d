//! In-memory collaborators for tests and dry runs.

use super::{ApiSource, LoadMode, ObjectStore, Record, WarehouseLoader};
use crate::errors::TaskError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// An API source returning a fixed batch of records.
#[derive(Debug, Default)]
pub struct StaticApiSource {
    records: Vec<Record>,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl StaticApiSource {
    /// Creates a source that always returns `records`.
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            failures_remaining: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Makes the first `count` fetches fail.
    #[must_use]
    pub fn failing_first(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Returns how many times `fetch` was called.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiSource for StaticApiSource {
    async fn fetch(&self) -> Result<Vec<Record>, TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TaskError::collaborator(format!(
                "API request {call} failed: service unavailable"
            )));
        }
        Ok(self.records.clone())
    }
}

/// Object storage held in memory, bucket name to object name to bytes.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store with no buckets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `bucket` if it does not exist.
    pub fn create_bucket(&self, bucket: impl Into<String>) {
        self.buckets.lock().entry(bucket.into()).or_default();
    }

    /// Stores an object, creating the bucket if needed.
    pub fn put(&self, bucket: impl Into<String>, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.buckets
            .lock()
            .entry(bucket.into())
            .or_default()
            .insert(name.into(), data.into());
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, TaskError> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .ok_or_else(|| TaskError::collaborator(format!("bucket '{bucket}' does not exist")))
    }

    async fn read_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, TaskError> {
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|objects| objects.get(name).cloned())
            .ok_or_else(|| {
                TaskError::collaborator(format!("object '{name}' not found in bucket '{bucket}'"))
            })
    }
}

/// A warehouse keeping its tables in memory.
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    tables: Mutex<BTreeMap<String, Vec<Record>>>,
}

impl InMemoryWarehouse {
    /// Creates an empty warehouse.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a table's rows.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<Vec<Record>> {
        self.tables.lock().get(name).cloned()
    }

    /// Returns the table names, sorted.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        self.tables.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl WarehouseLoader for InMemoryWarehouse {
    async fn load(&self, table: &str, rows: Vec<Record>, mode: LoadMode) -> Result<usize, TaskError> {
        let written = rows.len();
        let mut tables = self.tables.lock();
        let existing = tables.entry(table.to_string()).or_default();
        if mode == LoadMode::Overwrite {
            existing.clear();
        }
        existing.extend(rows);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(n: i64) -> Record {
        let mut record = Record::new();
        record.insert("n".to_string(), json!(n));
        record
    }

    #[tokio::test]
    async fn test_static_source_fails_first_calls() {
        let source = StaticApiSource::new(vec![row(1)]).failing_first(2);

        assert!(source.fetch().await.is_err());
        assert!(source.fetch().await.is_err());
        assert_eq!(source.fetch().await.unwrap(), vec![row(1)]);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_warehouse_overwrite_and_append() {
        let warehouse = InMemoryWarehouse::new();

        warehouse.load("T", vec![row(1), row(2)], LoadMode::Append).await.unwrap();
        warehouse.load("T", vec![row(3)], LoadMode::Append).await.unwrap();
        assert_eq!(warehouse.table("T").map(|t| t.len()), Some(3));

        warehouse.load("T", vec![row(9)], LoadMode::Overwrite).await.unwrap();
        assert_eq!(warehouse.table("T"), Some(vec![row(9)]));
    }

    #[tokio::test]
    async fn test_object_store_missing_object() {
        let store = InMemoryObjectStore::new();
        store.put("raw", "a.csv", "x\n");

        assert_eq!(store.read_object("raw", "a.csv").await.unwrap(), b"x\n".to_vec());
        assert!(store.read_object("raw", "b.csv").await.is_err());
        assert!(store.list_objects("other").await.is_err());
    }
}
