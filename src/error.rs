//! Error types for workq.
//!
//! Every variant carries a stable machine-readable code (see [`Error::code`])
//! and a JSON object of context (see [`Error::details`]) so the command
//! surface can report failures as structured results.

use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{message}")]
    Usage { message: String, details: Map<String, Value> },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("state file is not valid JSON: {}", path.display())]
    StateParse { path: PathBuf, reason: String },

    #[error("state file has invalid shape: {}", path.display())]
    StateShape { path: PathBuf, reason: String },

    #[error("timed out acquiring state lock: {}", marker.display())]
    LockTimeout {
        resource: PathBuf,
        marker: PathBuf,
        waited: Duration,
    },

    #[error("could not find '## Current items' section")]
    SectionNotFound { backlog_file: Option<PathBuf> },

    #[error("no backlog items in state; run sync-backlog first")]
    BacklogEmpty { state_path: PathBuf },

    #[error("no claim found for item {item_id}")]
    NotFound { item_id: String, state_path: PathBuf },

    #[error("session key mismatch for item {item_id}")]
    SessionMismatch {
        item_id: String,
        expected: Option<String>,
        got: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a usage error without extra context.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            details: Map::new(),
        }
    }

    /// Build a usage error carrying the offending input.
    pub fn usage_with(message: impl Into<String>, details: Value) -> Self {
        let details = match details {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::Usage {
            message: message.into(),
            details,
        }
    }

    /// Stable code reported as `error` in the failure envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usage { .. } => "E_USAGE",
            Self::Config(_) => "E_CONFIG",
            Self::StateParse { .. } => "E_STATE_PARSE",
            Self::StateShape { .. } => "E_STATE_SHAPE",
            Self::LockTimeout { .. } => "E_STATE_LOCK_TIMEOUT",
            Self::SectionNotFound { .. } => "E_BACKLOG_SECTION",
            Self::BacklogEmpty { .. } => "E_BACKLOG_EMPTY",
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::SessionMismatch { .. } => "E_SESSION_MISMATCH",
            Self::Io(_) => "E_IO",
            Self::Json(_) => "E_JSON",
            Self::Other(_) => "E_RUNTIME",
        }
    }

    /// Contextual fields merged into the failure envelope.
    pub fn details(&self) -> Map<String, Value> {
        let value = match self {
            Self::Usage { details, .. } => return details.clone(),
            Self::StateParse { path, reason } | Self::StateShape { path, reason } => {
                json!({ "statePath": path, "reason": reason })
            }
            Self::LockTimeout {
                resource,
                marker,
                waited,
            } => json!({
                "statePath": resource,
                "lockPath": marker,
                "waitMs": u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            }),
            Self::SectionNotFound { backlog_file } => json!({ "backlogFile": backlog_file }),
            Self::BacklogEmpty { state_path } => json!({ "statePath": state_path }),
            Self::NotFound {
                item_id,
                state_path,
            } => json!({ "itemId": item_id, "statePath": state_path }),
            Self::SessionMismatch {
                item_id,
                expected,
                got,
            } => json!({
                "itemId": item_id,
                "expectedSession": expected,
                "gotSession": got,
            }),
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Other(_) => return Map::new(),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}
