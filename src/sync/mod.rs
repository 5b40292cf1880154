// kintone-mirror/src/sync/mod.rs
pub(crate) mod change_log;
pub(crate) mod coercion;
pub(crate) mod diff;
pub(crate) mod logic;
pub(crate) mod pager;
pub(crate) mod progress;
#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::kintone::KintoneClient;
use crate::store::{PgApplicationRegistry, PgTableStore};
use change_log::StructuredChangeLog;
use logic::Reconciler;

/// Public entry point for the reconciliation run.
/// Mirrors one application, or every registered application when `app_id` is `None`.
pub async fn run_sync_flow(app_config: &AppConfig, app_id: Option<u64>) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&app_config.database_url)
        .await
        .context("Failed to connect to the mirror database")?;

    let api = KintoneClient::new(&app_config.kintone).context("Failed to build kintone client")?;
    let change_log = StructuredChangeLog::new(
        Uuid::new_v4(),
        app_config.sync.change_log_path.as_deref(),
    );
    info!(run_id = %change_log.run_id(), "Starting reconciliation run");

    let reconciler = Reconciler::new(
        Arc::new(api),
        Arc::new(PgTableStore::new(pool.clone())),
        Arc::new(PgApplicationRegistry::new(
            pool.clone(),
            app_config.sync.registry_table.clone(),
        )),
        Arc::new(change_log),
        app_config.sync.clone(),
    );

    let results = reconciler.reconcile(app_id).await;
    pool.close().await;

    let results = results.context("Reconciliation failed")?;
    info!(applications = results.len(), "Reconciliation run finished");
    Ok(())
}
