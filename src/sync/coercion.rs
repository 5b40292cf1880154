// kintone-mirror/src/sync/coercion.rs
//! Conversion of kintone field values into the declared types of the mirror table.
//!
//! The target column type always comes from the table definition, never from
//! inspecting the value, so every "what type is this" decision lives here.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::kintone::RemoteRecord;

/// Storage type of a mirror-table column, as declared in `information_schema.columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Numeric,
    Real,
    Double,
    Boolean,
    Text,
    /// `character(n)`: blank-padded on read, so trailing spaces carry no meaning.
    Char,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
}

impl ColumnType {
    /// Maps a Postgres `data_type` string. Returns `None` for types the mirror cannot hold.
    pub fn from_pg_data_type(data_type: &str) -> Option<Self> {
        let column_type = match data_type {
            "smallint" => ColumnType::SmallInt,
            "integer" => ColumnType::Integer,
            "bigint" => ColumnType::BigInt,
            "numeric" => ColumnType::Numeric,
            "real" => ColumnType::Real,
            "double precision" => ColumnType::Double,
            "boolean" => ColumnType::Boolean,
            "text" | "character varying" => ColumnType::Text,
            "character" => ColumnType::Char,
            "date" => ColumnType::Date,
            "time without time zone" => ColumnType::Time,
            "timestamp without time zone" => ColumnType::Timestamp,
            "timestamp with time zone" => ColumnType::TimestampTz,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            _ => return None,
        };
        Some(column_type)
    }

    fn is_json(self) -> bool {
        matches!(self, ColumnType::Json | ColumnType::Jsonb)
    }

    fn is_text(self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Char)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::SmallInt => "smallint",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Numeric => "numeric",
            ColumnType::Real => "real",
            ColumnType::Double => "double precision",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Char => "character",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
        };
        f.write_str(name)
    }
}

/// Column name to declared type, for one mirror table.
pub type ColumnTypes = BTreeMap<String, ColumnType>;

/// A non-null value as stored in (or destined for) a mirror-table column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Integer(i64),
    Numeric(Decimal),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(Value),
}

impl ColumnValue {
    /// Identity used for primary-key and `$id` lookups.
    pub fn key(&self) -> String {
        match self {
            ColumnValue::Numeric(d) => d.normalize().to_string(),
            other => other.to_string(),
        }
    }

    /// Recovers the nested structure a list or object field was stored as.
    #[cfg(test)]
    pub fn as_nested(&self) -> Option<Value> {
        match self {
            ColumnValue::Json(v) if v.is_array() || v.is_object() => Some(v.clone()),
            ColumnValue::Text(s) => serde_json::from_str::<Value>(s)
                .ok()
                .filter(|v| v.is_array() || v.is_object()),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Text(s) => f.write_str(s),
            ColumnValue::Integer(i) => write!(f, "{}", i),
            ColumnValue::Numeric(d) => write!(f, "{}", d),
            ColumnValue::Float(x) => write!(f, "{}", x),
            ColumnValue::Boolean(b) => write!(f, "{}", b),
            ColumnValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            ColumnValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            ColumnValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            ColumnValue::TimestampTz(ts) => f.write_str(&ts.to_rfc3339()),
            ColumnValue::Json(v) => f.write_str(&canonical_json(v)),
        }
    }
}

impl Serialize for ColumnValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ColumnValue::Integer(i) => serializer.serialize_i64(*i),
            ColumnValue::Float(x) => serializer.serialize_f64(*x),
            ColumnValue::Boolean(b) => serializer.serialize_bool(*b),
            ColumnValue::Json(v) => v.serialize(serializer),
            other => serializer.collect_str(other),
        }
    }
}

/// A row in comparable form: column name to value, null columns omitted.
pub type StoredRow = BTreeMap<String, ColumnValue>;

/// Builds a [`StoredRow`] from nullable column values, dropping the nulls.
///
/// kintone never sends an explicit null for an empty field, so stored nulls
/// must be dropped the same way before rows are compared.
pub fn strip_nulls<I>(columns: I) -> StoredRow
where
    I: IntoIterator<Item = (String, Option<ColumnValue>)>,
{
    columns
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
}

#[derive(Debug, Error)]
#[error("field \"{field}\" value {value} cannot be stored as {column_type}: {reason}")]
pub struct CoercionError {
    pub field: String,
    pub value: String,
    pub column_type: String,
    pub reason: String,
}

/// Compact JSON with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Converts one raw field value into the storage form of `column_type`.
///
/// `Ok(None)` means the value is absent: null, an empty list or object, or an
/// empty string destined for a non-text column.
pub fn coerce(
    field: &str,
    raw: &Value,
    column_type: ColumnType,
) -> Result<Option<ColumnValue>, CoercionError> {
    let fail = |reason: String| CoercionError {
        field: field.to_string(),
        value: raw.to_string(),
        column_type: column_type.to_string(),
        reason,
    };

    match raw {
        Value::Null => Ok(None),
        Value::Array(items) if items.is_empty() => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        Value::Array(_) | Value::Object(_) => match column_type {
            ty if ty.is_text() => Ok(Some(ColumnValue::Text(canonical_json(raw)))),
            ty if ty.is_json() => Ok(Some(ColumnValue::Json(sort_keys(raw)))),
            _ => Err(fail(
                "lists and objects can only be stored in text or json columns".to_string(),
            )),
        },
        Value::String(s) => coerce_str(s, column_type).map_err(fail),
        Value::Number(n) => coerce_number(n, column_type).map(Some).map_err(fail),
        Value::Bool(b) => match column_type {
            ColumnType::Boolean => Ok(Some(ColumnValue::Boolean(*b))),
            ty if ty.is_text() => Ok(Some(ColumnValue::Text(b.to_string()))),
            ty if ty.is_json() => Ok(Some(ColumnValue::Json(Value::Bool(*b)))),
            _ => Err(fail("booleans cannot be stored in this column".to_string())),
        },
    }
}

/// Coerces every field of a record against the table's declared columns.
pub fn coerce_record(
    record: &RemoteRecord,
    columns: &ColumnTypes,
) -> Result<StoredRow, CoercionError> {
    let mut row = StoredRow::new();
    for (name, field) in &record.fields {
        let column_type = columns.get(name).ok_or_else(|| CoercionError {
            field: name.clone(),
            value: field.value.to_string(),
            column_type: "none".to_string(),
            reason: "the table declares no column for this field".to_string(),
        })?;
        if let Some(value) = coerce(name, &field.value, *column_type)? {
            row.insert(name.clone(), value);
        }
    }
    Ok(row)
}

fn coerce_str(s: &str, column_type: ColumnType) -> Result<Option<ColumnValue>, String> {
    match column_type {
        ColumnType::Text => return Ok(Some(ColumnValue::Text(s.to_string()))),
        ColumnType::Char => return Ok(Some(ColumnValue::Text(unpad(s).to_string()))),
        _ => {}
    }

    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value = match column_type {
        ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => {
            ColumnValue::Integer(parse_integer(trimmed, column_type)?)
        }
        ColumnType::Numeric => ColumnValue::Numeric(parse_decimal(trimmed)?),
        ColumnType::Real | ColumnType::Double => ColumnValue::Float(float_for(
            strip_grouping(trimmed)
                .parse::<f64>()
                .map_err(|e| format!("not a number ({})", e))?,
            column_type,
        )),
        ColumnType::Boolean => ColumnValue::Boolean(parse_bool(trimmed)?),
        ColumnType::Date => ColumnValue::Date(
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map_err(|e| format!("not a YYYY-MM-DD date ({})", e))?,
        ),
        ColumnType::Time => ColumnValue::Time(parse_time(trimmed)?),
        ColumnType::Timestamp => ColumnValue::Timestamp(parse_timestamp(trimmed)?.naive_utc()),
        ColumnType::TimestampTz => ColumnValue::TimestampTz(parse_timestamp(trimmed)?),
        ColumnType::Json | ColumnType::Jsonb => ColumnValue::Json(Value::String(s.to_string())),
        ColumnType::Text | ColumnType::Char => ColumnValue::Text(s.to_string()),
    };
    Ok(Some(value))
}

fn coerce_number(n: &Number, column_type: ColumnType) -> Result<ColumnValue, String> {
    match column_type {
        ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => {
            let value = match n.as_i64() {
                Some(i) => i,
                None => parse_integer(&n.to_string(), ColumnType::BigInt)?,
            };
            Ok(ColumnValue::Integer(check_range(value, column_type)?))
        }
        ColumnType::Numeric => Ok(ColumnValue::Numeric(parse_decimal(&n.to_string())?)),
        ColumnType::Real | ColumnType::Double => n
            .as_f64()
            .map(|x| ColumnValue::Float(float_for(x, column_type)))
            .ok_or_else(|| "not representable as a float".to_string()),
        ColumnType::Boolean => match n.as_i64() {
            Some(0) => Ok(ColumnValue::Boolean(false)),
            Some(1) => Ok(ColumnValue::Boolean(true)),
            _ => Err("only 0 and 1 map to booleans".to_string()),
        },
        ColumnType::Text | ColumnType::Char => Ok(ColumnValue::Text(n.to_string())),
        ColumnType::Json | ColumnType::Jsonb => Ok(ColumnValue::Json(Value::Number(n.clone()))),
        ColumnType::Date | ColumnType::Time | ColumnType::Timestamp | ColumnType::TimestampTz => {
            Err("numbers cannot be stored in date/time columns".to_string())
        }
    }
}

// real columns hold f32; narrow first so the value compares equal once read back.
fn float_for(x: f64, column_type: ColumnType) -> f64 {
    if column_type == ColumnType::Real {
        f64::from(x as f32)
    } else {
        x
    }
}

/// Drops the blank padding Postgres adds to `character(n)` values.
pub fn unpad(s: &str) -> &str {
    s.trim_end_matches(' ')
}

fn strip_grouping(s: &str) -> String {
    s.replace(',', "")
}

fn parse_decimal(s: &str) -> Result<Decimal, String> {
    let plain = strip_grouping(s);
    Decimal::from_str(&plain)
        .or_else(|_| Decimal::from_scientific(&plain))
        .map_err(|e| format!("not a decimal number ({})", e))
}

fn parse_integer(s: &str, column_type: ColumnType) -> Result<i64, String> {
    let plain = strip_grouping(s);
    let value = match plain.parse::<i64>() {
        Ok(i) => i,
        Err(_) => {
            let d = parse_decimal(&plain)?;
            if !d.fract().is_zero() {
                return Err("has a fractional part".to_string());
            }
            d.to_i64().ok_or_else(|| "out of range for bigint".to_string())?
        }
    };
    check_range(value, column_type)
}

fn check_range(value: i64, column_type: ColumnType) -> Result<i64, String> {
    let in_range = match column_type {
        ColumnType::SmallInt => i16::try_from(value).is_ok(),
        ColumnType::Integer => i32::try_from(value).is_ok(),
        _ => true,
    };
    if in_range {
        Ok(value)
    } else {
        Err(format!("out of range for {}", column_type))
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "on" => Ok(true),
        "false" | "f" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("\"{}\" is not a boolean", other)),
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| format!("not an HH:MM[:SS] time ({})", e))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    Err("not an RFC 3339 or YYYY-MM-DD HH:MM:SS timestamp".to_string())
}
