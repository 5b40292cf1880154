use thiserror::Error;

use crate::sync::coercion::CoercionError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(
        "Table {table} does not exist. Run schema setup for this application first, then retry the reconciliation."
    )]
    SchemaMissing { table: String },

    #[error("Table {table} has no column \"{column}\". Re-run schema setup for this application.")]
    MissingKeyColumn { table: String, column: String },

    #[error("Column \"{column}\" of table {table} has unsupported type {data_type}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        data_type: String,
    },

    #[error("Application {app_id} is not registered")]
    NotFound { app_id: u64 },

    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    #[error("Malformed record from application {app_id}: {reason}")]
    MalformedRecord { app_id: u64, reason: String },

    #[error("Record API response for application {app_id} carries no totalCount")]
    MissingTotalCount { app_id: u64 },

    #[error("Record API returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serde JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Change log write failed: {0}")]
    ChangeLog(String),

    #[error("Application {app_id} ({table}): {source}")]
    Application {
        app_id: u64,
        table: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error("{} application(s) failed to reconcile: {}", failures.len(), summarize(failures))]
    PartialFailure { failures: Vec<(u64, String)> },
}

fn summarize(failures: &[(u64, String)]) -> String {
    failures
        .iter()
        .map(|(app_id, message)| format!("[{}] {}", app_id, message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, SyncError>;
