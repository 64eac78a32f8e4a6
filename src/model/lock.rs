//! Per-item lock file records as seen by a directory scan.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// A lock file found in the lock directory.
///
/// Existence of the file is the signal; `data` is advisory and is `None`
/// when the payload is missing or not a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub item_id: String,
    pub lock_path: PathBuf,
    pub mtime_ms: i64,
    pub age_ms: i64,
    pub data: Option<Map<String, Value>>,
}

impl LockRecord {
    /// String field from the payload, if present.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}
