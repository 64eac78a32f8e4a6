//! State file storage.
//!
//! The state document is the single source of truth for claims and the
//! backlog snapshot. Reads tolerate structural drift (mistyped sections,
//! claim entries and fields are reset or dropped) but not corruption.
//! Writes replace the whole file through a temp file and an atomic rename,
//! so readers never see a partial document and a crash mid-write leaves
//! the previous one.

use crate::error::{Error, Result};
use crate::model::{BacklogItem, STATE_VERSION, StateDocument, now_ms};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle on one state file. Callers must hold the gate for this path
/// around [`StateStore::persist`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, synthesizing an empty one if the file is absent.
    pub async fn load(&self) -> Result<StateDocument> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file, starting empty");
                return Ok(StateDocument::new(now_ms()));
            }
            Err(e) => return Err(e.into()),
        };

        let value: Value = serde_json::from_str(&raw).map_err(|e| Error::StateParse {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        repair(value, &self.path, now_ms())
    }

    /// Replace the document on disk.
    pub async fn persist(&self, doc: &StateDocument) -> Result<()> {
        write_json_atomic(&self.path, doc).await?;
        debug!(
            path = %self.path.display(),
            updated_at_ms = doc.updated_at_ms,
            claims = doc.claims.len(),
            "state persisted"
        );
        Ok(())
    }
}

/// Claim fields holding millisecond timestamps or durations.
const CLAIM_MS_FIELDS: [&str; 6] = [
    "leaseMs",
    "claimedAtMs",
    "heartbeatAtMs",
    "createdAtMs",
    "updatedAtMs",
    "completedAtMs",
];

/// Claim fields holding plain strings.
const CLAIM_TEXT_FIELDS: [&str; 8] = [
    "queue",
    "label",
    "workLine",
    "sessionKey",
    "status",
    "lockPath",
    "branch",
    "prUrl",
];

/// Reset drifted sections and fields to their empty defaults, then decode.
///
/// Drift is repaired entry by entry: one malformed claim or backlog item
/// never makes the rest of the ledger unreadable.
fn repair(value: Value, path: &Path, now: i64) -> Result<StateDocument> {
    let Value::Object(mut root) = value else {
        return Err(Error::StateShape {
            path: path.to_path_buf(),
            reason: "top-level value is not an object".to_string(),
        });
    };

    let backlog = root
        .entry("backlog")
        .or_insert_with(|| Value::Object(Map::new()));
    if !backlog.is_object() {
        *backlog = Value::Object(Map::new());
    }
    if let Value::Object(backlog) = backlog {
        repair_backlog(backlog);
    }

    let claims = root
        .entry("claims")
        .or_insert_with(|| Value::Object(Map::new()));
    if !claims.is_object() {
        *claims = Value::Object(Map::new());
    }
    if let Value::Object(claims) = claims {
        claims.retain(|item_id, claim| match claim {
            Value::Object(fields) => {
                repair_claim(item_id, fields);
                true
            }
            _ => {
                warn!(item_id = %item_id, "dropping malformed claim entry");
                false
            }
        });
    }

    let version_ok = root
        .get("version")
        .and_then(Value::as_u64)
        .is_some_and(|v| u32::try_from(v).is_ok());
    if !version_ok {
        root.insert("version".to_string(), Value::from(STATE_VERSION));
    }
    for key in ["createdAtMs", "updatedAtMs"] {
        let stamp = root.get(key).and_then(integer).unwrap_or(now);
        root.insert(key.to_string(), Value::from(stamp));
    }

    serde_json::from_value(Value::Object(root)).map_err(|e| Error::StateShape {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn repair_backlog(backlog: &mut Map<String, Value>) {
    coerce_integer(backlog, "syncedAtMs", i64::MIN);
    drop_unless_text(backlog, &["file", "sourceFile", "syncedAt"]);
    // `sourceFile` is the older spelling of `file`; both at once would clash.
    if let Some(old) = backlog.remove("sourceFile") {
        if !backlog.get("file").is_some_and(Value::is_string) {
            backlog.insert("file".to_string(), old);
        }
    }

    let items = match backlog.remove("items") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    let items: Vec<Value> = items
        .into_iter()
        .filter(|item| {
            let usable = serde_json::from_value::<BacklogItem>(item.clone()).is_ok();
            if !usable {
                warn!(item = %item, "dropping malformed backlog item");
            }
            usable
        })
        .collect();
    backlog.insert("items".to_string(), Value::Array(items));
}

fn repair_claim(item_id: &str, claim: &mut Map<String, Value>) {
    if !claim.get("itemId").is_some_and(Value::is_string) {
        claim.insert("itemId".to_string(), Value::String(item_id.to_string()));
    }
    for key in CLAIM_MS_FIELDS {
        coerce_integer(claim, key, i64::MIN);
    }
    coerce_integer(claim, "prNumber", 0);
    drop_unless_text(claim, &CLAIM_TEXT_FIELDS);
    if claim
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.trim().is_empty())
    {
        claim.remove("status");
    }
}

/// Rewrite `key` as an integer no smaller than `min` when it holds a number
/// or a numeric string; remove it when it holds anything else.
fn coerce_integer(map: &mut Map<String, Value>, key: &str, min: i64) {
    let coerced = match map.get(key) {
        None | Some(Value::Null) => return,
        Some(value) => integer(value).filter(|n| *n >= min),
    };
    match coerced {
        Some(n) => {
            map.insert(key.to_string(), Value::from(n));
        }
        None => {
            map.remove(key);
        }
    }
}

fn drop_unless_text(map: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if map.get(*key).is_some_and(|v| !v.is_string() && !v.is_null()) {
            map.remove(*key);
        }
    }
}

fn integer(value: &Value) -> Option<i64> {
    let float = |f: f64| f.is_finite().then_some(f as i64);
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float))
        }
        _ => None,
    }
}

/// Write `value` as pretty JSON to a uniquely named sibling temp file, then
/// rename it over `path`.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".tmp.{}.{}", std::process::id(), Uuid::new_v4()));
    let tmp_path = PathBuf::from(tmp_name);

    let written = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(text.as_bytes()).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    Ok(())
}
