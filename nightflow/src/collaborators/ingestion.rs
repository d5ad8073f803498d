//! Ingestion work: API to warehouse, and object store to warehouse.

use super::{ApiSource, LoadMode, ObjectStore, Record, WarehouseLoader};
use crate::errors::TaskError;
use crate::executor::{TaskContext, TaskWork};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the surrogate key column added to every ingested object.
const ID_COLUMN: &str = "id";

/// Fetches records from an API and loads them into one warehouse table.
#[derive(Clone)]
pub struct ApiIngestionTask {
    source: Arc<dyn ApiSource>,
    loader: Arc<dyn WarehouseLoader>,
    table: String,
    mode: LoadMode,
}

impl ApiIngestionTask {
    /// Creates API ingestion work appending into `table`.
    #[must_use]
    pub fn new(
        source: Arc<dyn ApiSource>,
        loader: Arc<dyn WarehouseLoader>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            source,
            loader,
            table: table.into(),
            mode: LoadMode::Append,
        }
    }

    /// Sets the load mode.
    #[must_use]
    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the destination table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Debug for ApiIngestionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiIngestionTask")
            .field("source", &self.source)
            .field("table", &self.table)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskWork for ApiIngestionTask {
    async fn run(&self, ctx: &TaskContext) -> Result<String, TaskError> {
        let records = self.source.fetch().await?;
        if records.is_empty() {
            info!(task = %ctx.task, "API returned no records");
            return Ok("API returned no records".to_string());
        }

        let fetched = records.len();
        let written = self.loader.load(&self.table, records, self.mode).await?;
        info!(
            task = %ctx.task,
            table = %self.table,
            fetched,
            written,
            "API records loaded"
        );

        Ok(format!("loaded {written} rows into {} ({})", self.table, self.mode))
    }
}

/// Loads every CSV object of a bucket into its own raw warehouse table.
///
/// Objects are independent: a failing object is logged and counted, and the
/// task only fails when no object could be loaded, or when `require_all` is
/// set and any object failed. A bucket without CSV objects is a success.
#[derive(Clone)]
pub struct ObjectStoreIngestionTask {
    store: Arc<dyn ObjectStore>,
    loader: Arc<dyn WarehouseLoader>,
    bucket: String,
    require_all: bool,
}

impl ObjectStoreIngestionTask {
    /// Creates object-store ingestion work for `bucket`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        loader: Arc<dyn WarehouseLoader>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            loader,
            bucket: bucket.into(),
            require_all: false,
        }
    }

    /// Fails the task if any single object fails.
    #[must_use]
    pub fn require_all(mut self) -> Self {
        self.require_all = true;
        self
    }

    /// Returns the source bucket.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ingest_object(&self, name: &str) -> Result<(String, usize), TaskError> {
        let bytes = self.store.read_object(&self.bucket, name).await?;
        let table = parse_csv(&bytes)?;
        if table.columns.iter().any(|c| c.eq_ignore_ascii_case(ID_COLUMN)) {
            return Err(TaskError::collaborator(format!(
                "object already has an '{ID_COLUMN}' column"
            )));
        }

        let rows = with_surrogate_ids(table.rows);
        let target = raw_table_name(name);
        let written = self.loader.load(&target, rows, LoadMode::Overwrite).await?;
        Ok((target, written))
    }
}

impl fmt::Debug for ObjectStoreIngestionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreIngestionTask")
            .field("store", &self.store)
            .field("bucket", &self.bucket)
            .field("require_all", &self.require_all)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskWork for ObjectStoreIngestionTask {
    async fn run(&self, ctx: &TaskContext) -> Result<String, TaskError> {
        let objects = self.store.list_objects(&self.bucket).await?;
        let csvs: Vec<&String> = objects.iter().filter(|name| is_csv(name)).collect();
        debug!(
            bucket = %self.bucket,
            objects = objects.len(),
            csv_objects = csvs.len(),
            "Listed bucket"
        );

        if csvs.is_empty() {
            info!(task = %ctx.task, bucket = %self.bucket, "No CSV objects to ingest");
            return Ok(format!("no CSV objects in bucket '{}'", self.bucket));
        }

        let mut loaded = Vec::new();
        let mut failures = Vec::new();
        for name in &csvs {
            match self.ingest_object(name).await {
                Ok((table, rows)) => {
                    info!(object = %name, table = %table, rows, "Object loaded");
                    loaded.push(format!("{name} -> {table} ({rows} rows)"));
                }
                Err(error) => {
                    warn!(object = %name, error = %error, "Failed to ingest object");
                    failures.push(format!("{name}: {error}"));
                }
            }
        }

        if loaded.is_empty() || (self.require_all && !failures.is_empty()) {
            return Err(TaskError::collaborator(format!(
                "{} of {} CSV objects failed to load",
                failures.len(),
                csvs.len()
            ))
            .with_detail(failures.join("\n")));
        }

        let mut summary = format!(
            "loaded {} of {} CSV objects: {}",
            loaded.len(),
            csvs.len(),
            loaded.join(", ")
        );
        if !failures.is_empty() {
            summary.push_str("\nfailed: ");
            summary.push_str(&failures.join(", "));
        }
        Ok(summary)
    }
}

fn is_csv(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Derives the raw table name for an object.
///
/// The part of the name before the first `.` is upper-cased, path
/// separators and dashes become underscores, and `_RAW` is appended.
///
/// ```
/// use nightflow::collaborators::raw_table_name;
///
/// assert_eq!(raw_table_name("customers.csv"), "CUSTOMERS_RAW");
/// assert_eq!(raw_table_name("exports/order-items.2024.csv"), "EXPORTS_ORDER_ITEMS_RAW");
/// ```
#[must_use]
pub fn raw_table_name(object: &str) -> String {
    let stem = object.split('.').next().unwrap_or(object);
    let normalized: String = stem
        .chars()
        .map(|c| match c {
            '-' | '/' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect();
    format!("{normalized}_RAW")
}

fn with_surrogate_ids(rows: Vec<Record>) -> Vec<Record> {
    rows.into_iter()
        .zip(1_u64..)
        .map(|(mut row, id)| {
            row.insert(ID_COLUMN.to_string(), Value::from(id));
            row
        })
        .collect()
}

/// A parsed CSV object.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    /// Column names from the header row.
    pub columns: Vec<String>,
    /// Data rows; short rows are padded with nulls.
    pub rows: Vec<Record>,
}

/// Parses a CSV object with a header row.
///
/// Fields may be double-quoted; `""` inside quotes is a literal quote.
/// Blank lines are skipped and a leading UTF-8 byte order mark is ignored.
/// Cells are inferred as null (empty), boolean, integer, float or string.
///
/// # Errors
///
/// Returns a collaborator error for non-UTF-8 input, a missing or invalid
/// header, or a row with more fields than the header.
pub fn parse_csv(data: &[u8]) -> Result<CsvTable, TaskError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);

    let columns: Vec<String> = reader
        .headers()
        .map_err(invalid_csv)?
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    if columns.is_empty() {
        return Err(TaskError::collaborator("object is empty, expected a header row"));
    }
    let mut seen = HashSet::new();
    for column in &columns {
        if column.is_empty() {
            return Err(TaskError::collaborator("header contains an empty column name"));
        }
        if !seen.insert(column.as_str()) {
            return Err(TaskError::collaborator(format!(
                "header declares column '{column}' more than once"
            )));
        }
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(invalid_csv)?;
        if record.len() > columns.len() {
            return Err(TaskError::collaborator(format!(
                "row {} has {} fields, expected at most {}",
                line + 1,
                record.len(),
                columns.len()
            )));
        }

        let mut row = Record::new();
        let mut fields = record.iter();
        for column in &columns {
            let value = fields.next().map_or(Value::Null, infer_cell);
            row.insert(column.clone(), value);
        }
        rows.push(row);
    }

    Ok(CsvTable { columns, rows })
}

fn invalid_csv(e: csv::Error) -> TaskError {
    TaskError::collaborator(format!("invalid CSV object: {e}"))
}

fn infer_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if float.is_finite() {
            return Value::from(float);
        }
    }
    Value::String(cell.to_string())
}
