//! Per-item claim lock files.
//!
//! One `workitem-<itemId>.lock` file per claimed item, JSON payload mirroring
//! the claim for tools outside this crate. Creation is exclusive, which is
//! what settles two processes racing for the same item. Existence is
//! authoritative here: no staleness override happens at this layer.

use crate::error::Result;
use crate::model::{LockRecord, now_ms};
use crate::storage::write_json_atomic;
use regex::Regex;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;
use tokio::io::AsyncWriteExt;
use tracing::debug;

static LOCK_FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^workitem-([^.]+)\.lock$").expect("static regex"));

/// Outcome of an exclusive-create attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    Acquired(PathBuf),
    AlreadyLocked(PathBuf),
}

/// Lock directory handle.
#[derive(Debug, Clone)]
pub struct ClaimLocks {
    dir: PathBuf,
}

impl ClaimLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic lock path for an item.
    pub fn path_for(&self, item_id: &str) -> PathBuf {
        self.dir.join(format!("workitem-{item_id}.lock"))
    }

    /// Create the lock file for `item_id` only if none exists.
    pub async fn try_acquire(&self, item_id: &str, payload: &Map<String, Value>) -> Result<Acquire> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(item_id);

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(item_id, lock = %path.display(), "lock file already present");
                return Ok(Acquire::AlreadyLocked(path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut text = serde_json::to_string_pretty(payload)?;
        text.push('\n');
        if let Err(e) = file.write_all(text.as_bytes()).await {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        file.flush().await?;
        Ok(Acquire::Acquired(path))
    }

    /// Shallow-merge `patch` into the lock payload of `item_id`.
    pub async fn merge_update(
        &self,
        item_id: &str,
        patch: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        self.merge_update_at(&self.path_for(item_id), patch).await
    }

    /// Shallow-merge `patch` into the payload at `path`, creating the file
    /// if absent. The rewrite goes through temp file and rename.
    pub async fn merge_update_at(
        &self,
        path: &Path,
        patch: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut payload = read_payload(path).await.unwrap_or_default();
        payload.extend(patch);
        write_json_atomic(path, &payload).await?;
        Ok(payload)
    }

    /// Every lock file in the directory, sorted by item id.
    pub async fn list_all(&self) -> Result<Vec<LockRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let now = now_ms();
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(item_id) = name
                .to_str()
                .and_then(|n| LOCK_FILE_NAME.captures(n))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
            else {
                continue;
            };

            // Removed between listing and stat: skip it.
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| i64::try_from(d.as_millis()).ok())
                .unwrap_or(0);

            let lock_path = entry.path();
            records.push(LockRecord {
                item_id,
                data: read_payload(&lock_path).await,
                lock_path,
                mtime_ms,
                age_ms: now - mtime_ms,
            });
        }

        records.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Ok(records)
    }
}

/// Payload of a lock file, or `None` when missing or not a JSON object.
pub async fn read_payload(path: &Path) -> Option<Map<String, Value>> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Whether a lock file exists at `path`. Errors count as absent.
pub async fn lock_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
