//! Core data model.
//!
//! The state document is the primary ledger: a synced backlog snapshot plus
//! one claim per item id. Lock records are the best-effort mirror kept in a
//! separate directory for tools that never read the ledger.

pub mod backlog;
pub mod claim;
pub mod lock;
pub mod state;

pub use backlog::{Backlog, BacklogItem, SkipReason};
pub use claim::{Claim, ClaimStatus, lease_expired};
pub use lock::LockRecord;
pub use state::{STATE_VERSION, StateDocument};

use chrono::{DateTime, Local, Utc};

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// RFC 3339 rendering of a millisecond timestamp, UTC with millisecond precision.
pub fn iso(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Compact local-time stamp (`YYYYMMDD-HHMM`) used in generated claim labels.
pub fn local_stamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .with_timezone(&Local)
        .format("%Y%m%d-%H%M")
        .to_string()
}
