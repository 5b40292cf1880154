// kintone-mirror/src/sync/testing.rs
//! In-memory doubles for the record API, the mirror tables and the change log.
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::change_log::ChangeLog;
use super::coercion::{ColumnTypes, ColumnValue, StoredRow};
use super::diff::Diff;
use crate::errors::{Result, SyncError};
use crate::kintone::{RecordApi, RecordPage, RemoteField, RemoteRecord};
use crate::store::{Application, ApplicationRegistry, TableStore};

pub fn record(fields: &[(&str, Value)]) -> RemoteRecord {
    RemoteRecord {
        fields: fields
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    RemoteField {
                        field_type: None,
                        value: value.clone(),
                    },
                )
            })
            .collect(),
    }
}

#[derive(Default)]
struct FakeApiState {
    records: HashMap<u64, Vec<RemoteRecord>>,
    total_count_drift: HashMap<u64, u64>,
    without_total_count: HashSet<u64>,
    failures: HashSet<(u64, u64)>,
    queries: Vec<(u64, String)>,
}

/// Serves canned records per application and remembers every query.
#[derive(Default)]
pub struct FakeRecordApi {
    state: Mutex<FakeApiState>,
}

impl FakeRecordApi {
    /// Records with `$id` and `record number` both equal to 1..=n.
    pub fn numbered(n: u64) -> Vec<RemoteRecord> {
        (1..=n)
            .map(|i| {
                record(&[
                    ("$id", json!(i.to_string())),
                    ("record number", json!(i.to_string())),
                    ("name", json!(format!("Record {}", i))),
                ])
            })
            .collect()
    }

    pub fn set_records(&self, app_id: u64, records: Vec<RemoteRecord>) {
        self.state.lock().unwrap().records.insert(app_id, records);
    }

    /// Makes every page after the first report `total_count` instead of the real size.
    pub fn set_total_count_drift(&self, app_id: u64, total_count: u64) {
        self.state
            .lock()
            .unwrap()
            .total_count_drift
            .insert(app_id, total_count);
    }

    /// Serves pages for `app_id` with no `totalCount` at all.
    pub fn omit_total_count(&self, app_id: u64) {
        self.state
            .lock()
            .unwrap()
            .without_total_count
            .insert(app_id);
    }

    pub fn fail_at_offset(&self, app_id: u64, offset: u64) {
        self.state.lock().unwrap().failures.insert((app_id, offset));
    }

    pub fn queries(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().queries.clone()
    }
}

fn parse_query(query: &str) -> (usize, u64) {
    let parts: Vec<&str> = query.split_whitespace().collect();
    match parts.as_slice() {
        ["limit", limit, "offset", offset] => (
            limit.parse().expect("numeric limit"),
            offset.parse().expect("numeric offset"),
        ),
        _ => panic!("unexpected query {:?}", query),
    }
}

#[async_trait]
impl RecordApi for FakeRecordApi {
    async fn get_records(&self, app_id: u64, query: &str) -> Result<RecordPage> {
        let (limit, offset) = parse_query(query);
        let mut state = self.state.lock().unwrap();
        state.queries.push((app_id, query.to_string()));

        if state.failures.contains(&(app_id, offset)) {
            return Err(SyncError::Api {
                status: 503,
                code: "CB_UNAVAILABLE".to_string(),
                message: "service unavailable".to_string(),
            });
        }

        let records = state.records.get(&app_id).cloned().unwrap_or_default();
        let actual = records.len() as u64;
        let total_count = if offset == 0 {
            actual
        } else {
            state.total_count_drift.get(&app_id).copied().unwrap_or(actual)
        };

        let total_count = if state.without_total_count.contains(&app_id) {
            None
        } else {
            Some(total_count)
        };

        Ok(RecordPage {
            records: records.into_iter().skip(offset as usize).take(limit).collect(),
            total_count,
        })
    }
}

pub struct MemoryRegistry {
    apps: Vec<Application>,
}

impl MemoryRegistry {
    pub fn new(apps: Vec<Application>) -> Self {
        Self { apps }
    }
}

#[async_trait]
impl ApplicationRegistry for MemoryRegistry {
    async fn list(&self) -> Result<Vec<Application>> {
        Ok(self.apps.clone())
    }

    async fn find(&self, app_id: u64) -> Result<Option<Application>> {
        Ok(self.apps.iter().find(|a| a.id == app_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert(StoredRow),
    Update(ColumnValue, Diff),
    Delete(String, ColumnValue),
}

#[derive(Default)]
struct MemoryTable {
    columns: ColumnTypes,
    rows: Vec<StoredRow>,
}

/// Mirror tables held in memory; every write is recorded per table.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
    writes: Mutex<HashMap<String, Vec<WriteOp>>>,
}

impl MemoryTableStore {
    pub fn create_table(&self, table: &str, columns: ColumnTypes, rows: Vec<StoredRow>) {
        self.tables
            .lock()
            .unwrap()
            .insert(table.to_string(), MemoryTable { columns, rows });
    }

    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn writes(&self, table: &str) -> Vec<WriteOp> {
        self.writes
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn record_write(&self, table: &str, op: WriteOp) {
        self.writes
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(op);
    }

    fn with_table<T>(&self, table: &str, f: impl FnOnce(&mut MemoryTable) -> T) -> Result<T> {
        let mut tables = self.tables.lock().unwrap();
        let found = tables.get_mut(table).ok_or_else(|| SyncError::SchemaMissing {
            table: table.to_string(),
        })?;
        Ok(f(found))
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains_key(table))
    }

    async fn column_types(&self, table: &str) -> Result<ColumnTypes> {
        self.with_table(table, |t| t.columns.clone())
    }

    async fn load_rows(&self, table: &str, _columns: &ColumnTypes) -> Result<Vec<StoredRow>> {
        self.with_table(table, |t| t.rows.clone())
    }

    async fn insert_row(&self, table: &str, row: &StoredRow) -> Result<()> {
        self.with_table(table, |t| t.rows.push(row.clone()))?;
        self.record_write(table, WriteOp::Insert(row.clone()));
        Ok(())
    }

    async fn update_row(
        &self,
        table: &str,
        key_column: &str,
        key: &ColumnValue,
        changes: &Diff,
    ) -> Result<()> {
        self.with_table(table, |t| {
            for row in t.rows.iter_mut().filter(|r| r.get(key_column) == Some(key)) {
                for (column, change) in changes {
                    match &change.new {
                        Some(value) => {
                            row.insert(column.clone(), value.clone());
                        }
                        None => {
                            row.remove(column);
                        }
                    }
                }
            }
        })?;
        self.record_write(table, WriteOp::Update(key.clone(), changes.clone()));
        Ok(())
    }

    async fn delete_row(&self, table: &str, column: &str, value: &ColumnValue) -> Result<()> {
        self.with_table(table, |t| t.rows.retain(|r| r.get(column) != Some(value)))?;
        self.record_write(table, WriteOp::Delete(column.to_string(), value.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoggedChange {
    Update {
        app_id: u64,
        primary_key: ColumnValue,
        diff: Diff,
    },
    Delete {
        app_id: u64,
        row: StoredRow,
    },
}

/// Keeps entries in memory; can be switched to fail every write.
#[derive(Default)]
pub struct RecordingChangeLog {
    entries: Mutex<Vec<LoggedChange>>,
    failing: AtomicBool,
}

impl RecordingChangeLog {
    pub fn entries(&self) -> Vec<LoggedChange> {
        self.entries.lock().unwrap().clone()
    }

    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn push(&self, entry: LoggedChange) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::ChangeLog("disk full".to_string()));
        }
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

impl ChangeLog for RecordingChangeLog {
    fn log_update(
        &self,
        app_id: u64,
        _table: &str,
        primary_key: &ColumnValue,
        diff: &Diff,
    ) -> Result<()> {
        self.push(LoggedChange::Update {
            app_id,
            primary_key: primary_key.clone(),
            diff: diff.clone(),
        })
    }

    fn log_delete(&self, app_id: u64, _table: &str, row: &StoredRow) -> Result<()> {
        self.push(LoggedChange::Delete {
            app_id,
            row: row.clone(),
        })
    }
}
