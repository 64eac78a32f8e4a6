//! Requests accepted and reports returned by coordinator operations.
//!
//! Reports serialize to the camelCase JSON objects emitted by the command
//! surface.

use crate::model::{ClaimStatus, SkipReason};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Parameters for [`Coordinator::claim`](super::Coordinator::claim).
#[derive(Debug, Clone, Default)]
pub struct ClaimRequest {
    pub(crate) queue: Option<String>,
    pub(crate) session_key: Option<String>,
    pub(crate) lease_ms: Option<i64>,
    pub(crate) label: Option<String>,
}

impl ClaimRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn lease_ms(mut self, lease_ms: i64) -> Self {
        self.lease_ms = Some(lease_ms);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Parameters for [`Coordinator::heartbeat`](super::Coordinator::heartbeat).
#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub(crate) item_id: String,
    pub(crate) session_key: String,
    pub(crate) lease_ms: Option<i64>,
}

impl HeartbeatRequest {
    pub fn new(item_id: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            session_key: session_key.into(),
            lease_ms: None,
        }
    }

    /// Replace the claim's lease from now on.
    pub fn lease_ms(mut self, lease_ms: i64) -> Self {
        self.lease_ms = Some(lease_ms);
        self
    }
}

/// Parameters for [`Coordinator::complete`](super::Coordinator::complete).
#[derive(Debug, Clone)]
pub struct CompleteRequest {
    pub(crate) item_id: String,
    pub(crate) session_key: Option<String>,
    pub(crate) status: Option<ClaimStatus>,
    pub(crate) branch: Option<String>,
    pub(crate) pr_number: Option<u64>,
    pub(crate) pr_url: Option<String>,
    pub(crate) label: Option<String>,
}

impl CompleteRequest {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            session_key: None,
            status: None,
            branch: None,
            pr_number: None,
            pr_url: None,
            label: None,
        }
    }

    pub fn session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn status(mut self, status: impl Into<ClaimStatus>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn pr_number(mut self, pr_number: u64) -> Self {
        self.pr_number = Some(pr_number);
        self
    }

    pub fn pr_url(mut self, pr_url: impl Into<String>) -> Self {
        self.pr_url = Some(pr_url.into());
        self
    }

    /// Label used only when no claim exists yet and one is synthesized.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Status applied when the caller gives none (or a blank one):
    /// `pr_opened` as soon as any pull-request detail is present, else `done`.
    pub fn resolved_status(&self) -> ClaimStatus {
        match &self.status {
            Some(status) if !status.as_str().trim().is_empty() => status.clone(),
            _ if self.branch.is_some() || self.pr_number.is_some() || self.pr_url.is_some() => {
                ClaimStatus::PrOpened
            }
            _ => ClaimStatus::Done,
        }
    }
}

/// Parameters for [`Coordinator::status`](super::Coordinator::status).
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusRequest {
    /// Only return stale claims and stale lock files.
    pub stale_only: bool,
    /// Lease applied to every entry instead of its own.
    pub ttl_ms: Option<i64>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub state_path: PathBuf,
    pub backlog_file: PathBuf,
    pub total_items: usize,
    pub eligible_count: usize,
    /// Every skip reason, zero-filled.
    pub skipped: BTreeMap<SkipReason, usize>,
    pub synced_at_ms: i64,
    pub synced_at: String,
}

/// Per-reason counts of items passed over by a claim scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClaimSkips {
    pub ineligible: usize,
    pub claimed: usize,
    pub locked: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedItem {
    pub item_id: String,
    pub label: String,
    pub work_line: String,
    pub queue: String,
    pub session_key: String,
    pub lease_ms: i64,
    pub claimed_at_ms: i64,
    pub claimed_at: String,
    pub lock_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReport {
    pub claimed: bool,
    pub state_path: PathBuf,
    pub lock_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<ClaimedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<ClaimSkips>,
}

impl ClaimReport {
    pub const NO_ELIGIBLE_ITEMS: &'static str = "no_eligible_items";
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    pub state_path: PathBuf,
    pub item_id: String,
    pub session_key: String,
    pub lease_ms: i64,
    /// Time since the claim was taken.
    pub age_ms: i64,
    pub stale: bool,
    pub lock_path: PathBuf,
    pub lock_exists: bool,
    pub heartbeat_at_ms: i64,
    pub heartbeat_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteReport {
    pub state_path: PathBuf,
    pub lock_path: PathBuf,
    pub item_id: String,
    pub status: ClaimStatus,
    pub branch: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub completed_at_ms: i64,
    pub completed_at: String,
    /// False when the lock mirror could not be written; the ledger still is.
    pub lock_updated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTotals {
    pub claims: usize,
    pub stale_claims: usize,
    pub locks: usize,
    pub stale_locks: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub item_id: String,
    pub status: Option<ClaimStatus>,
    pub queue: Option<String>,
    pub label: Option<String>,
    pub session_key: Option<String>,
    pub claimed_at_ms: Option<i64>,
    pub heartbeat_at_ms: Option<i64>,
    pub lease_ms: i64,
    pub age_ms: Option<i64>,
    pub stale: bool,
    pub lock_path: PathBuf,
    pub lock_exists: bool,
    pub branch: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockView {
    pub item_id: String,
    pub lock_path: PathBuf,
    pub age_ms: i64,
    pub mtime_ms: i64,
    pub stale: bool,
    pub status: Option<String>,
    pub label: Option<String>,
    pub session_key: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state_path: PathBuf,
    pub lock_dir: PathBuf,
    pub now_ms: i64,
    pub now: String,
    /// Counts over all entries, regardless of `stale_only`.
    pub totals: StatusTotals,
    pub claims: Vec<ClaimView>,
    pub locks: Vec<LockView>,
}
