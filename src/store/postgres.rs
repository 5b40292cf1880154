// kintone-mirror/src/store/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, warn};

use super::{Application, ApplicationRegistry, TableStore};
use crate::errors::{Result, SyncError};
use crate::sync::coercion::{ColumnType, ColumnTypes, ColumnValue, StoredRow, strip_nulls, unpad};
use crate::sync::diff::Diff;
use crate::utils::quote_ident;

pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &ColumnValue) {
    match value.clone() {
        ColumnValue::Text(s) => builder.push_bind(s),
        ColumnValue::Integer(i) => builder.push_bind(i),
        ColumnValue::Numeric(d) => builder.push_bind(d),
        ColumnValue::Float(x) => builder.push_bind(x),
        ColumnValue::Boolean(b) => builder.push_bind(b),
        ColumnValue::Date(d) => builder.push_bind(d),
        ColumnValue::Time(t) => builder.push_bind(t),
        ColumnValue::Timestamp(ts) => builder.push_bind(ts),
        ColumnValue::TimestampTz(ts) => builder.push_bind(ts),
        ColumnValue::Json(v) => builder.push_bind(sqlx::types::Json(v)),
    };
}

fn text_value(column_type: ColumnType, s: String) -> ColumnValue {
    match column_type {
        ColumnType::Char => ColumnValue::Text(unpad(&s).to_string()),
        _ => ColumnValue::Text(s),
    }
}

fn decode_column(
    row: &PgRow,
    index: usize,
    column_type: ColumnType,
) -> std::result::Result<Option<ColumnValue>, sqlx::Error> {
    let value = match column_type {
        ColumnType::SmallInt => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| ColumnValue::Integer(v.into())),
        ColumnType::Integer => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| ColumnValue::Integer(v.into())),
        ColumnType::BigInt => row.try_get::<Option<i64>, _>(index)?.map(ColumnValue::Integer),
        ColumnType::Numeric => row
            .try_get::<Option<Decimal>, _>(index)?
            .map(ColumnValue::Numeric),
        ColumnType::Real => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| ColumnValue::Float(v.into())),
        ColumnType::Double => row.try_get::<Option<f64>, _>(index)?.map(ColumnValue::Float),
        ColumnType::Boolean => row.try_get::<Option<bool>, _>(index)?.map(ColumnValue::Boolean),
        ColumnType::Text | ColumnType::Char => row
            .try_get::<Option<String>, _>(index)?
            .map(|s| text_value(column_type, s)),
        ColumnType::Date => row.try_get::<Option<NaiveDate>, _>(index)?.map(ColumnValue::Date),
        ColumnType::Time => row.try_get::<Option<NaiveTime>, _>(index)?.map(ColumnValue::Time),
        ColumnType::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(ColumnValue::Timestamp),
        ColumnType::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(ColumnValue::TimestampTz),
        ColumnType::Json | ColumnType::Jsonb => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(ColumnValue::Json),
    };
    Ok(value)
}

fn insert_query(table: &str, row: &StoredRow) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("INSERT INTO {} (", quote_ident(table)));
    let column_list = row.keys().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    builder.push(column_list);
    builder.push(") VALUES (");
    for (i, value) in row.values().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        push_value(&mut builder, value);
    }
    builder.push(")");
    builder
}

// Only the diffed columns are written; a cleared value becomes NULL.
fn update_query(
    table: &str,
    key_column: &str,
    key: &ColumnValue,
    changes: &Diff,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("UPDATE {} SET ", quote_ident(table)));
    for (i, (column, change)) in changes.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(quote_ident(column));
        builder.push(" = ");
        match &change.new {
            Some(value) => push_value(&mut builder, value),
            None => {
                builder.push("NULL");
            }
        }
    }
    builder.push(format!(" WHERE {} = ", quote_ident(key_column)));
    push_value(&mut builder, key);
    builder
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM information_schema.tables
                 WHERE table_schema = current_schema() AND table_name = $1
             )",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn column_types(&self, table: &str) -> Result<ColumnTypes> {
        let columns = sqlx::query_as::<_, (String, String)>(
            "SELECT column_name::text, data_type::text
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut types = ColumnTypes::new();
        for (column, data_type) in columns {
            let column_type = ColumnType::from_pg_data_type(&data_type).ok_or_else(|| {
                SyncError::UnsupportedColumnType {
                    table: table.to_string(),
                    column: column.clone(),
                    data_type: data_type.clone(),
                }
            })?;
            types.insert(column, column_type);
        }
        Ok(types)
    }

    async fn load_rows(&self, table: &str, columns: &ColumnTypes) -> Result<Vec<StoredRow>> {
        let column_list = columns
            .keys()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM {}", column_list, quote_ident(table));

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        debug!(table, rows = rows.len(), "Loaded stored rows");

        let mut stored = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for (index, (name, column_type)) in columns.iter().enumerate() {
                values.push((name.clone(), decode_column(row, index, *column_type)?));
            }
            stored.push(strip_nulls(values));
        }
        Ok(stored)
    }

    async fn insert_row(&self, table: &str, row: &StoredRow) -> Result<()> {
        insert_query(table, row).build().execute(&self.pool).await?;
        Ok(())
    }

    async fn update_row(
        &self,
        table: &str,
        key_column: &str,
        key: &ColumnValue,
        changes: &Diff,
    ) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut builder = update_query(table, key_column, key, changes);
        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            warn!(table, key = %key, "Update matched no rows");
        }
        Ok(())
    }

    async fn delete_row(&self, table: &str, column: &str, value: &ColumnValue) -> Result<()> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "DELETE FROM {} WHERE {} = ",
            quote_ident(table),
            quote_ident(column)
        ));
        push_value(&mut builder, value);
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

/// Registry backed by the `apps` table (`"appId"`, `name`).
pub struct PgApplicationRegistry {
    pool: PgPool,
    table: String,
}

impl PgApplicationRegistry {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    fn to_application(&self, (id, name): (i64, Option<String>)) -> Result<Application> {
        let id = u64::try_from(id).map_err(|_| {
            SyncError::Config(format!("{} contains a negative appId: {}", self.table, id))
        })?;
        Ok(Application {
            id,
            name: name.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ApplicationRegistry for PgApplicationRegistry {
    async fn list(&self) -> Result<Vec<Application>> {
        let sql = format!(
            r#"SELECT "appId"::bigint, name::text FROM {} ORDER BY "appId""#,
            quote_ident(&self.table)
        );
        let rows = sqlx::query_as::<_, (i64, Option<String>)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|row| self.to_application(row)).collect()
    }

    async fn find(&self, app_id: u64) -> Result<Option<Application>> {
        let Ok(id) = i64::try_from(app_id) else {
            return Ok(None);
        };
        let sql = format!(
            r#"SELECT "appId"::bigint, name::text FROM {} WHERE "appId" = $1"#,
            quote_ident(&self.table)
        );
        let row = sqlx::query_as::<_, (i64, Option<String>)>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| self.to_application(r)).transpose()
    }
}
