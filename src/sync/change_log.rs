// kintone-mirror/src/sync/change_log.rs
//! Audit trail of updates and deletions applied to the mirror tables.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::coercion::{ColumnValue, StoredRow};
use super::diff::Diff;
use crate::errors::{Result, SyncError};

/// Sink for audit entries. Callers treat failures as warnings, never as reasons to stop.
pub trait ChangeLog: Send + Sync {
    fn log_update(
        &self,
        app_id: u64,
        table: &str,
        primary_key: &ColumnValue,
        diff: &Diff,
    ) -> Result<()>;

    fn log_delete(&self, app_id: u64, table: &str, row: &StoredRow) -> Result<()>;
}

/// One self-contained audit entry, serialized as a single JSON object.
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ChangeEntry<'a> {
    Update {
        app_id: u64,
        table: &'a str,
        run_id: Uuid,
        logged_at: DateTime<Utc>,
        primary_key: &'a ColumnValue,
        diff: &'a Diff,
    },
    Delete {
        app_id: u64,
        table: &'a str,
        run_id: Uuid,
        logged_at: DateTime<Utc>,
        row: &'a StoredRow,
    },
}

/// Emits entries as `tracing` events on target `change_log` and, optionally,
/// appends them to a JSON Lines file.
pub struct StructuredChangeLog {
    run_id: Uuid,
    file: Option<Mutex<File>>,
}

impl StructuredChangeLog {
    pub fn new(run_id: Uuid, path: Option<&Path>) -> Self {
        let file = path.and_then(|p| match open_append(p) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                warn!(path = %p.display(), error = %e, "Change log file unavailable, logging to tracing only");
                None
            }
        });
        Self { run_id, file }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn write(&self, entry: &ChangeEntry<'_>) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        info!(target: "change_log", "{}", line);

        if let Some(file) = &self.file {
            let mut file = file
                .lock()
                .map_err(|_| SyncError::ChangeLog("change log file lock poisoned".to_string()))?;
            writeln!(file, "{}", line).map_err(|e| SyncError::ChangeLog(e.to_string()))?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl ChangeLog for StructuredChangeLog {
    fn log_update(
        &self,
        app_id: u64,
        table: &str,
        primary_key: &ColumnValue,
        diff: &Diff,
    ) -> Result<()> {
        self.write(&ChangeEntry::Update {
            app_id,
            table,
            run_id: self.run_id,
            logged_at: Utc::now(),
            primary_key,
            diff,
        })
    }

    fn log_delete(&self, app_id: u64, table: &str, row: &StoredRow) -> Result<()> {
        self.write(&ChangeEntry::Delete {
            app_id,
            table,
            run_id: self.run_id,
            logged_at: Utc::now(),
            row,
        })
    }
}
