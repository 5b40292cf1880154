// kintone-mirror/src/store/mod.rs
//! Relational side of the mirror: per-application tables and the application registry.
pub(crate) mod postgres;

pub use self::postgres::{PgApplicationRegistry, PgTableStore};

use async_trait::async_trait;

use crate::errors::Result;
use crate::sync::coercion::{ColumnTypes, ColumnValue, StoredRow};
use crate::sync::diff::Diff;

/// A registered kintone application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub id: u64,
    pub name: String,
}

/// Read-only listing of the applications to mirror.
#[async_trait]
pub trait ApplicationRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<Application>>;
    async fn find(&self, app_id: u64) -> Result<Option<Application>>;
}

/// Row access to the mirror tables. Tables are created elsewhere; this never issues DDL.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Declared column types, which double as the coercion targets for the table.
    async fn column_types(&self, table: &str) -> Result<ColumnTypes>;

    /// Every row of the table, null columns stripped.
    async fn load_rows(&self, table: &str, columns: &ColumnTypes) -> Result<Vec<StoredRow>>;

    async fn insert_row(&self, table: &str, row: &StoredRow) -> Result<()>;

    /// Applies a diff to the row whose `key_column` equals `key`; absent new values become NULL.
    async fn update_row(
        &self,
        table: &str,
        key_column: &str,
        key: &ColumnValue,
        changes: &Diff,
    ) -> Result<()>;

    async fn delete_row(&self, table: &str, column: &str, value: &ColumnValue) -> Result<()>;
}
