//! Backlog snapshot types produced by a sync.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Why a backlog item is not eligible for automatic claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Tag missing or different from the eligible queue.
    #[serde(alias = "not_zsc")]
    NotInQueue,
    /// Marked `**no-auto-start**`.
    NoAutoStart,
    /// Carries a `blocked-by:` marker.
    BlockedBy,
}

impl SkipReason {
    pub const ALL: [SkipReason; 3] = [
        SkipReason::NotInQueue,
        SkipReason::NoAutoStart,
        SkipReason::BlockedBy,
    ];
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::NotInQueue => "not_in_queue",
            SkipReason::NoAutoStart => "no_auto_start",
            SkipReason::BlockedBy => "blocked_by",
        };
        write!(f, "{s}")
    }
}

/// One candidate work item, derived from a single backlog line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogItem {
    /// Leading identifier token of the line (e.g. `12a`).
    pub item_id: String,
    /// Lowercased first `[tag]` on the line.
    #[serde(default)]
    pub queue_tag: Option<String>,
    /// Full trimmed source line.
    #[serde(default)]
    pub work_line: String,
    /// 1-based line number in the backlog document.
    #[serde(default)]
    pub line_number: usize,
    #[serde(default)]
    pub no_auto_start: bool,
    /// Gates merging downstream; never affects eligibility.
    #[serde(default)]
    pub no_auto_merge: bool,
    #[serde(default)]
    pub blocked_by: bool,
    #[serde(default)]
    pub eligible: bool,
    #[serde(default)]
    pub skip_reasons: Vec<SkipReason>,
}

/// The synced backlog snapshot stored in the state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlog {
    /// Absolute path of the backlog document last synced.
    #[serde(default, alias = "sourceFile")]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub synced_at_ms: Option<i64>,
    #[serde(default)]
    pub synced_at: Option<String>,
    #[serde(default)]
    pub items: Vec<BacklogItem>,
}

impl Backlog {
    /// Look up an item by id.
    pub fn item(&self, item_id: &str) -> Option<&BacklogItem> {
        self.items.iter().find(|it| it.item_id == item_id)
    }
}
