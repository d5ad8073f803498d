//! Scheduler checkpoint for crash resume.
//!
//! The only state persisted across restarts is the next-fire instant of each
//! pipeline. Run history is deliberately kept in memory.

use crate::errors::NightflowError;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

/// Next-fire instants written after a scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerCheckpoint {
    /// When the checkpoint was taken.
    pub saved_at: Timestamp,
    /// Next-fire instant per pipeline name.
    pub next_fire: BTreeMap<String, Timestamp>,
}

impl SchedulerCheckpoint {
    /// Creates a checkpoint.
    #[must_use]
    pub fn new(saved_at: Timestamp, next_fire: BTreeMap<String, Timestamp>) -> Self {
        Self {
            saved_at,
            next_fire,
        }
    }

    /// Loads a checkpoint, returning `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Option<Self>, NightflowError> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Writes the checkpoint atomically (temporary file, then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<(), NightflowError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}
