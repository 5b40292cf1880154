// kintone-mirror/src/sync/logic.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::change_log::ChangeLog;
use super::coercion::{ColumnTypes, ColumnValue, StoredRow, coerce_record};
use super::diff::diff;
use super::pager::RecordPager;
use super::progress::{Marker, Progress};
use crate::config::{FailurePolicy, SyncConfig};
use crate::errors::{Result, SyncError};
use crate::kintone::{RecordApi, RemoteRecord};
use crate::store::{Application, ApplicationRegistry, TableStore};

/// Counters for one application's reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub total_count: u64,
    pub fetched: u64,
    pub pages: u32,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

enum Outcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Brings mirror tables to parity with kintone: inserts new records, updates
/// changed ones and deletes rows whose `$id` no longer exists remotely.
///
/// Applications and pages are processed strictly one after another; the tool
/// assumes it is the only writer of the mirror tables while it runs.
pub struct Reconciler {
    api: Arc<dyn RecordApi>,
    store: Arc<dyn TableStore>,
    registry: Arc<dyn ApplicationRegistry>,
    change_log: Arc<dyn ChangeLog>,
    config: SyncConfig,
    progress: Progress,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn RecordApi>,
        store: Arc<dyn TableStore>,
        registry: Arc<dyn ApplicationRegistry>,
        change_log: Arc<dyn ChangeLog>,
        config: SyncConfig,
    ) -> Self {
        let progress = Progress::new(config.progress);
        Self {
            api,
            store,
            registry,
            change_log,
            config,
            progress,
        }
    }

    /// The requested application, or every registered one when `app_id` is `None`.
    pub async fn resolve_applications(&self, app_id: Option<u64>) -> Result<Vec<Application>> {
        match app_id {
            Some(id) => self
                .registry
                .find(id)
                .await?
                .map(|app| vec![app])
                .ok_or(SyncError::NotFound { app_id: id }),
            None => self.registry.list().await,
        }
    }

    /// Reconciles the resolved applications, honouring the configured failure policy.
    pub async fn reconcile(
        &self,
        app_id: Option<u64>,
    ) -> Result<Vec<(Application, ReconcileStats)>> {
        let apps = self.resolve_applications(app_id).await?;
        info!(applications = apps.len(), "Reconciling applications");

        let mut results = Vec::with_capacity(apps.len());
        let mut failures = Vec::new();

        for app in apps {
            match self.reconcile_application(&app).await {
                Ok(stats) => results.push((app, stats)),
                Err(e) => {
                    error!(app_id = app.id, app_name = %app.name, error = %e, "Reconciliation failed");
                    match self.config.failure_policy {
                        FailurePolicy::Abort => {
                            return Err(SyncError::Application {
                                app_id: app.id,
                                table: self.config.table_name(app.id),
                                source: Box::new(e),
                            });
                        }
                        FailurePolicy::Continue => failures.push((app.id, e.to_string())),
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(results)
        } else {
            Err(SyncError::PartialFailure { failures })
        }
    }

    /// Full scan of one application.
    ///
    /// 1. Check the mirror table exists and declares the key columns.
    /// 2. Index the stored rows by primary key.
    /// 3. Page through kintone; insert or update each record whose coerced
    ///    fields differ from the stored row, remembering every `$id` seen.
    /// 4. Re-read the table and delete the rows whose `$id` was never seen.
    pub async fn reconcile_application(&self, app: &Application) -> Result<ReconcileStats> {
        let table = self.config.table_name(app.id);
        if !self.store.table_exists(&table).await? {
            return Err(SyncError::SchemaMissing { table });
        }

        let columns = self.store.column_types(&table).await?;
        for key_column in [&self.config.primary_key_field, &self.config.id_field] {
            if !columns.contains_key(key_column) {
                return Err(SyncError::MissingKeyColumn {
                    table,
                    column: key_column.clone(),
                });
            }
        }

        let mut by_key: HashMap<String, StoredRow> = self
            .store
            .load_rows(&table, &columns)
            .await?
            .into_iter()
            .filter_map(|row| {
                let key = row.get(&self.config.primary_key_field)?.key();
                Some((key, row))
            })
            .collect();

        let mut stats = ReconcileStats::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pager = RecordPager::new(self.api.as_ref(), app.id, self.config.page_size);

        while let Some(page) = pager.next_page().await? {
            if pager.pages_fetched() == 1 {
                stats.total_count = pager.total_count().unwrap_or(0);
                info!(app_id = app.id, app_name = %app.name, total_count = stats.total_count, "Scanning application");
                self.progress.app_started(app, stats.total_count);
            }
            self.progress.mark(Marker::Page);

            for record in &page.records {
                let (id, outcome) = self
                    .apply_record(app, &table, &columns, record, &mut by_key)
                    .await?;
                stats.fetched += 1;
                match outcome {
                    Outcome::Inserted => stats.inserted += 1,
                    Outcome::Updated => stats.updated += 1,
                    Outcome::Unchanged => stats.unchanged += 1,
                }
                seen.insert(id);
            }
        }
        stats.pages = pager.pages_fetched();

        stats.deleted = self.delete_unseen(app, &table, &columns, &seen).await?;

        self.progress.app_finished(app, &stats);
        info!(
            app_id = app.id,
            table = %table,
            fetched = stats.fetched,
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            "Application reconciled"
        );
        Ok(stats)
    }

    /// Writes one record if it differs from the stored row. Returns its `$id` key.
    async fn apply_record(
        &self,
        app: &Application,
        table: &str,
        columns: &ColumnTypes,
        record: &RemoteRecord,
        by_key: &mut HashMap<String, StoredRow>,
    ) -> Result<(String, Outcome)> {
        let remote = coerce_record(record, columns)?;

        let primary_key = self.required(app, &remote, &self.config.primary_key_field)?.clone();
        let id = self.required(app, &remote, &self.config.id_field)?.key();
        let key = primary_key.key();

        let (changes, exists) = match by_key.get(&key) {
            Some(stored) => (diff(stored, &remote), true),
            None => (diff(&StoredRow::new(), &remote), false),
        };

        if changes.is_empty() {
            return Ok((id, Outcome::Unchanged));
        }

        let outcome = if exists {
            self.store
                .update_row(table, &self.config.primary_key_field, &primary_key, &changes)
                .await?;
            if let Err(e) = self
                .change_log
                .log_update(app.id, table, &primary_key, &changes)
            {
                warn!(app_id = app.id, key = %primary_key, error = %e, "Change log entry for update was not written");
            }
            self.progress.mark(Marker::Update);
            Outcome::Updated
        } else {
            // inserts are intentionally absent from the change log
            self.store.insert_row(table, &remote).await?;
            self.progress.mark(Marker::Insert);
            Outcome::Inserted
        };

        by_key.insert(key, remote);
        Ok((id, outcome))
    }

    fn required<'r>(
        &self,
        app: &Application,
        row: &'r StoredRow,
        field: &str,
    ) -> Result<&'r ColumnValue> {
        row.get(field).ok_or_else(|| SyncError::MalformedRecord {
            app_id: app.id,
            reason: format!("record has no value for \"{}\"", field),
        })
    }

    /// Deletes every stored row whose `$id` was not observed during the scan.
    async fn delete_unseen(
        &self,
        app: &Application,
        table: &str,
        columns: &ColumnTypes,
        seen: &HashSet<String>,
    ) -> Result<u64> {
        let id_field = self.config.id_field.as_str();
        let pk_field = self.config.primary_key_field.as_str();
        let mut deleted = 0;

        for row in self.store.load_rows(table, columns).await? {
            let (column, value) = match (row.get(id_field), row.get(pk_field)) {
                (Some(id), _) if seen.contains(&id.key()) => continue,
                (Some(id), _) => (id_field, id.clone()),
                (None, Some(pk)) => (pk_field, pk.clone()),
                (None, None) => {
                    warn!(app_id = app.id, table, "Stored row has neither $id nor primary key, skipping");
                    continue;
                }
            };

            if let Err(e) = self.change_log.log_delete(app.id, table, &row) {
                warn!(app_id = app.id, key = %value, error = %e, "Change log entry for delete was not written");
            }
            self.store.delete_row(table, column, &value).await?;
            self.progress.mark(Marker::Delete);
            deleted += 1;
        }

        Ok(deleted)
    }
}
