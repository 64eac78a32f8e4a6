//! Claims: the ledger entry asserting that a worker session owns an item.

use crate::config::DEFAULT_LEASE_MS;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a claim.
///
/// Anything outside the known set is kept verbatim as `Custom` so that
/// statuses written by other tools survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClaimStatus {
    Claimed,
    Done,
    Complete,
    Completed,
    PrOpened,
    Custom(String),
}

impl ClaimStatus {
    /// Terminal claims are never stale and never block a new claim.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Done | ClaimStatus::Complete | ClaimStatus::Completed | ClaimStatus::PrOpened
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::Done => "done",
            ClaimStatus::Complete => "complete",
            ClaimStatus::Completed => "completed",
            ClaimStatus::PrOpened => "pr_opened",
            ClaimStatus::Custom(s) => s,
        }
    }
}

impl From<String> for ClaimStatus {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "claimed" => ClaimStatus::Claimed,
            "done" => ClaimStatus::Done,
            "complete" => ClaimStatus::Complete,
            "completed" => ClaimStatus::Completed,
            "pr_opened" => ClaimStatus::PrOpened,
            _ => ClaimStatus::Custom(s),
        }
    }
}

impl From<&str> for ClaimStatus {
    fn from(s: &str) -> Self {
        ClaimStatus::from(s.to_string())
    }
}

impl From<ClaimStatus> for String {
    fn from(status: ClaimStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

/// One claim per item id. Fields are optional on read because claims may be
/// synthesized by `complete` or written by older tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub item_id: String,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub work_line: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub status: Option<ClaimStatus>,
    #[serde(default)]
    pub lease_ms: Option<i64>,
    #[serde(default)]
    pub lock_path: Option<PathBuf>,

    #[serde(default)]
    pub claimed_at_ms: Option<i64>,
    #[serde(default)]
    pub heartbeat_at_ms: Option<i64>,
    #[serde(default)]
    pub created_at_ms: Option<i64>,
    #[serde(default)]
    pub updated_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,

    /// Fields this version does not know about, preserved as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claim {
    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(ClaimStatus::is_terminal)
    }

    /// Lease used for staleness: a positive override wins, then the claim's
    /// own lease (zero included), then the default.
    pub fn ttl_ms(&self, ttl_override: Option<i64>) -> i64 {
        ttl_override
            .filter(|ms| *ms > 0)
            .or(self.lease_ms)
            .unwrap_or(DEFAULT_LEASE_MS)
    }

    /// Last proof of life: the latest heartbeat, else the claim time.
    pub fn last_seen_ms(&self) -> Option<i64> {
        self.heartbeat_at_ms.or(self.claimed_at_ms)
    }

    /// A non-terminal claim whose last proof of life is older than its lease.
    ///
    /// The write path and status reporting both go through here.
    pub fn is_stale(&self, now_ms: i64, ttl_override: Option<i64>) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self.last_seen_ms() {
            Some(seen) => lease_expired(seen, now_ms, self.ttl_ms(ttl_override)),
            None => false,
        }
    }
}

/// True once strictly more than `ttl_ms` has elapsed since `since_ms`.
pub fn lease_expired(since_ms: i64, now_ms: i64, ttl_ms: i64) -> bool {
    now_ms.saturating_sub(since_ms) > ttl_ms
}
