// kintone-mirror/src/sync/diff.rs
use serde::Serialize;
use std::collections::BTreeMap;

use super::coercion::{ColumnValue, StoredRow};

/// One column's before/after pair. `None` means the column is absent on that side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub old: Option<ColumnValue>,
    pub new: Option<ColumnValue>,
}

pub type Diff = BTreeMap<String, Change>;

/// Column-level differences between a stored row and its coerced remote counterpart.
///
/// Both rows are expected to be null-stripped already, so a column missing on
/// both sides can never show up here.
pub fn diff(stored: &StoredRow, remote: &StoredRow) -> Diff {
    let mut changes = Diff::new();

    for (column, old) in stored {
        let new = remote.get(column);
        if new != Some(old) {
            changes.insert(
                column.clone(),
                Change {
                    old: Some(old.clone()),
                    new: new.cloned(),
                },
            );
        }
    }

    for (column, new) in remote {
        if !stored.contains_key(column) {
            changes.insert(
                column.clone(),
                Change {
                    old: None,
                    new: Some(new.clone()),
                },
            );
        }
    }

    changes
}
