//! Filesystem-backed collaborators used by the binary.

use super::{LoadMode, ObjectStore, Record, WarehouseLoader};
use crate::errors::TaskError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Object storage where each bucket is a directory under `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, TaskError> {
        relative_path(bucket).map(|rel| self.root.join(rel))
    }
}

/// Rejects names that would escape the root directory.
fn relative_path(name: &str) -> Result<PathBuf, TaskError> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || escapes {
        return Err(TaskError::contract(format!("invalid object path '{name}'")));
    }
    Ok(path.to_path_buf())
}

fn io_error(action: &str, path: &Path, error: &std::io::Error) -> TaskError {
    TaskError::collaborator(format!("failed to {action} '{}': {error}", path.display()))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, TaskError> {
        let base = self.bucket_dir(bucket)?;
        let mut names = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| io_error("list", &dir, &e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error("list", &dir, &e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error("inspect", &path, &e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&base) {
                    let name: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    names.push(name.join("/"));
                }
            }
        }

        names.sort();
        debug!(bucket = %bucket, objects = names.len(), "Listed local bucket");
        Ok(names)
    }

    async fn read_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, TaskError> {
        let path = self.bucket_dir(bucket)?.join(relative_path(name)?);
        fs::read(&path).await.map_err(|e| io_error("read", &path, &e))
    }
}

/// A warehouse writing one JSON-lines file per table.
///
/// Tables live at `root/<database>/<schema>/<TABLE>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonLinesWarehouse {
    root: PathBuf,
    database: String,
    schema: String,
}

impl JsonLinesWarehouse {
    /// Creates a warehouse writing under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            database: database.into(),
            schema: schema.into(),
        }
    }

    /// Returns the file backing `table`.
    #[must_use]
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root
            .join(&self.database)
            .join(&self.schema)
            .join(format!("{table}.jsonl"))
    }
}

#[async_trait]
impl WarehouseLoader for JsonLinesWarehouse {
    async fn load(&self, table: &str, rows: Vec<Record>, mode: LoadMode) -> Result<usize, TaskError> {
        relative_path(table)?;
        let path = self.table_path(table);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create", parent, &e))?;
        }

        let mut buffer = Vec::new();
        for row in &rows {
            serde_json::to_writer(&mut buffer, row)
                .map_err(|e| TaskError::contract(format!("row is not serializable: {e}")))?;
            buffer.push(b'\n');
        }

        let mut options = fs::OpenOptions::new();
        options.create(true);
        match mode {
            LoadMode::Overwrite => options.write(true).truncate(true),
            LoadMode::Append => options.append(true),
        };

        let mut file = options
            .open(&path)
            .await
            .map_err(|e| io_error("open", &path, &e))?;
        file.write_all(&buffer)
            .await
            .map_err(|e| io_error("write", &path, &e))?;
        file.flush().await.map_err(|e| io_error("write", &path, &e))?;

        debug!(table = %table, rows = rows.len(), mode = %mode, path = %path.display(), "Rows written");
        Ok(rows.len())
    }
}
