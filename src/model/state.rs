//! The persisted state document.

use super::backlog::Backlog;
use super::claim::Claim;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const STATE_VERSION: u32 = 1;

/// Singleton document holding the backlog snapshot and all claims.
///
/// Every write replaces the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub version: u32,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(default)]
    pub backlog: Backlog,
    #[serde(default)]
    pub claims: BTreeMap<String, Claim>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateDocument {
    /// Empty document stamped at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            version: STATE_VERSION,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            backlog: Backlog::default(),
            claims: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Advance `updated_at_ms` to `now_ms` without ever moving it backwards.
    /// Returns the stamp actually written.
    pub fn touch(&mut self, now_ms: i64) -> i64 {
        self.updated_at_ms = self.updated_at_ms.max(now_ms);
        self.updated_at_ms
    }

    /// Claim that still blocks re-claiming the item.
    pub fn active_claim(&self, item_id: &str) -> Option<&Claim> {
        self.claims.get(item_id).filter(|c| !c.is_terminal())
    }
}
