// kintone-mirror/src/kintone/mod.rs
//! Wire types and the record API seam for kintone.
pub(crate) mod client;

pub use client::KintoneClient;

use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::Result;

/// One field of a record as sent by kintone: `{"type": "...", "value": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteField {
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// A record keyed by field code, including the reserved `$id` field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RemoteRecord {
    pub fields: BTreeMap<String, RemoteField>,
}

impl RemoteRecord {
    #[cfg(test)]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).map(|f| &f.value)
    }
}

/// Response body of `GET /k/v1/records.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
    /// Only present when the request asked for `totalCount=true`.
    #[serde(rename = "totalCount", default, deserialize_with = "total_count")]
    pub total_count: Option<u64>,
}

// kintone sends totalCount as a decimal string.
fn total_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid totalCount {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid totalCount {:?}: {}", s, e))),
        Some(other) => Err(de::Error::custom(format!("invalid totalCount {}", other))),
    }
}

/// Read access to an application's records.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// Runs one records query (e.g. `limit 500 offset 1000`) against an application.
    async fn get_records(&self, app_id: u64, query: &str) -> Result<RecordPage>;
}
