//! The coordinator owns the state store, the lock directory and the gate.
//!
//! Every mutating operation runs as: acquire gate, load, mutate, persist,
//! then mirror into the item's lock file, then release. The state document
//! is the ledger; lock files are a best-effort mirror and a failure to
//! update one never fails an operation that already committed the ledger.
//! Creating the lock file during `claim` is the exception: it is the
//! exclusive-create step that settles races for an item.

use crate::backlog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gate::{FileGate, Gate};
use crate::locks::{Acquire, ClaimLocks, lock_exists};
use crate::model::{Backlog, Claim, ClaimStatus, SkipReason, iso, local_stamp, now_ms};
use crate::storage::StateStore;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_claim_transition, start_command_span};
use opentelemetry::KeyValue;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{Instrument, info, warn};

use super::report::*;

pub struct Coordinator<G: Gate = FileGate> {
    pub(crate) store: StateStore,
    pub(crate) locks: ClaimLocks,
    gate: G,
    pub(crate) lease_ms: i64,
    pub(crate) queue: String,
}

impl Coordinator<FileGate> {
    /// Coordinator using the marker-file gate with the configured timings.
    pub fn new(config: &Config) -> Self {
        Self::with_gate(config, FileGate::new(config.gate))
    }
}

impl<G: Gate> Coordinator<G> {
    pub fn with_gate(config: &Config, gate: G) -> Self {
        Self {
            store: StateStore::new(&config.state_path),
            locks: ClaimLocks::new(&config.lock_dir),
            gate,
            lease_ms: config.lease_ms,
            queue: config.queue.to_lowercase(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn locks(&self) -> &ClaimLocks {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // sync
    // -----------------------------------------------------------------------

    /// Parse the backlog and replace the stored snapshot wholesale.
    /// Claims are left untouched.
    pub async fn sync_backlog(&self, backlog_file: &Path) -> Result<SyncReport> {
        let span = start_command_span("sync-backlog", None);
        self.sync_backlog_inner(backlog_file).instrument(span).await
    }

    async fn sync_backlog_inner(&self, backlog_file: &Path) -> Result<SyncReport> {
        let parsed = backlog::parse_file(backlog_file, &self.queue).await?;
        let parsed_ref = &parsed;

        let synced_at_ms = self
            .gate
            .with_exclusive_access(self.store.path(), || async move {
                let mut state = self.store.load().await?;
                let now = state.touch(now_ms());
                state.backlog = Backlog {
                    file: Some(parsed_ref.file.clone()),
                    synced_at_ms: Some(now),
                    synced_at: Some(iso(now)),
                    items: parsed_ref.items.clone(),
                };
                self.store.persist(&state).await?;
                Ok(now)
            })
            .await?;

        let mut skipped: BTreeMap<SkipReason, usize> =
            SkipReason::ALL.iter().map(|r| (*r, 0)).collect();
        for reason in parsed.items.iter().flat_map(|it| &it.skip_reasons) {
            *skipped.entry(*reason).or_default() += 1;
        }
        let eligible_count = parsed.items.iter().filter(|it| it.eligible).count();
        let total_items = parsed.items.len();

        metrics::backlog_items().add(eligible_count as u64, &[KeyValue::new("eligible", "true")]);
        metrics::backlog_items().add(
            (total_items - eligible_count) as u64,
            &[KeyValue::new("eligible", "false")],
        );
        info!(
            backlog = %parsed.file.display(),
            total_items,
            eligible_count,
            "backlog synced"
        );

        Ok(SyncReport {
            state_path: self.store.path().to_path_buf(),
            backlog_file: parsed.file,
            total_items,
            eligible_count,
            skipped,
            synced_at_ms,
            synced_at: iso(synced_at_ms),
        })
    }

    // -----------------------------------------------------------------------
    // claim
    // -----------------------------------------------------------------------

    /// Claim the first eligible, unclaimed, unlocked item of a queue, in
    /// document order. At most one item is claimed per call.
    ///
    /// A non-terminal claim blocks its item even once stale: staleness is
    /// reported by [`Coordinator::status`] for an operator to act on, never
    /// reclaimed here.
    pub async fn claim(&self, req: ClaimRequest) -> Result<ClaimReport> {
        validate_lease(req.lease_ms)?;
        let span = start_command_span("claim", None);
        let queue_owned = req
            .queue
            .as_deref()
            .unwrap_or(&self.queue)
            .to_lowercase();
        let session_owned = req.session_key.clone().unwrap_or_else(default_session_key);
        let lease_ms = req.lease_ms.unwrap_or(self.lease_ms);
        let (req, queue, session_key, span_ref) =
            (&req, queue_owned.as_str(), session_owned.as_str(), &span);

        let report = self
            .gate
            .with_exclusive_access(self.store.path(), || async move {
                let mut state = self.store.load().await?;
                if state.backlog.items.is_empty() {
                    return Err(Error::BacklogEmpty {
                        state_path: self.store.path().to_path_buf(),
                    });
                }

                let now = now_ms();
                let mut skipped = ClaimSkips::default();
                let mut chosen = None;

                for item in &state.backlog.items {
                    if item.queue_tag.as_deref() != Some(queue) || !item.eligible {
                        skipped.ineligible += 1;
                        continue;
                    }
                    if state.active_claim(&item.item_id).is_some() {
                        skipped.claimed += 1;
                        continue;
                    }
                    let lock_path = self.locks.path_for(&item.item_id);
                    if lock_exists(&lock_path).await {
                        skipped.locked += 1;
                        continue;
                    }

                    let label = req
                        .label
                        .clone()
                        .unwrap_or_else(|| build_label(queue, &item.item_id, now));
                    let payload = object(json!({
                        "ts": iso(now),
                        "itemId": item.item_id,
                        "label": label,
                        "workLine": item.work_line,
                        "queue": queue,
                        "status": ClaimStatus::Claimed,
                        "sessionKey": session_key,
                        "claimedAt": iso(now),
                        "heartbeatAt": iso(now),
                        "leaseMs": lease_ms,
                    }));

                    match self.locks.try_acquire(&item.item_id, &payload).await? {
                        // Lost the exclusive-create race to another process.
                        Acquire::AlreadyLocked(_) => {
                            skipped.locked += 1;
                        }
                        Acquire::Acquired(lock_path) => {
                            chosen = Some((item.clone(), label, lock_path));
                            break;
                        }
                    }
                }

                let Some((item, label, lock_path)) = chosen else {
                    return Ok(ClaimReport {
                        claimed: false,
                        state_path: self.store.path().to_path_buf(),
                        lock_dir: self.locks.dir().to_path_buf(),
                        item: None,
                        reason: Some(ClaimReport::NO_ELIGIBLE_ITEMS),
                        skipped: Some(skipped),
                    });
                };

                let previous = state
                    .claims
                    .get(&item.item_id)
                    .and_then(|c| c.status.clone())
                    .map_or_else(|| "unclaimed".to_string(), String::from);

                state.claims.insert(
                    item.item_id.clone(),
                    Claim {
                        item_id: item.item_id.clone(),
                        queue: Some(queue.to_string()),
                        label: Some(label.clone()),
                        work_line: Some(item.work_line.clone()),
                        session_key: Some(session_key.to_string()),
                        status: Some(ClaimStatus::Claimed),
                        lease_ms: Some(lease_ms),
                        lock_path: Some(lock_path.clone()),
                        claimed_at_ms: Some(now),
                        heartbeat_at_ms: Some(now),
                        created_at_ms: Some(now),
                        updated_at_ms: Some(now),
                        ..Claim::default()
                    },
                );
                state.touch(now);

                if let Err(e) = self.store.persist(&state).await {
                    // The ledger never recorded this claim; do not leave the
                    // item locked behind it.
                    let _ = tokio::fs::remove_file(&lock_path).await;
                    return Err(e);
                }

                record_claim_transition(span_ref, &item.item_id, &previous, "claimed");
                info!(
                    item_id = %item.item_id,
                    queue = %queue,
                    session_key = %session_key,
                    lease_ms,
                    "item claimed"
                );

                Ok(ClaimReport {
                    claimed: true,
                    state_path: self.store.path().to_path_buf(),
                    lock_dir: self.locks.dir().to_path_buf(),
                    item: Some(ClaimedItem {
                        item_id: item.item_id,
                        label,
                        work_line: item.work_line,
                        queue: queue.to_string(),
                        session_key: session_key.to_string(),
                        lease_ms,
                        claimed_at_ms: now,
                        claimed_at: iso(now),
                        lock_path,
                    }),
                    reason: None,
                    skipped: None,
                })
            })
            .instrument(span.clone())
            .await?;

        let result = if report.claimed { "claimed" } else { "none" };
        metrics::claims().add(
            1,
            &[
                KeyValue::new("queue", queue_owned),
                KeyValue::new("result", result),
            ],
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // heartbeat
    // -----------------------------------------------------------------------

    /// Refresh the lease of a claim owned by the caller's session.
    pub async fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatReport> {
        validate_item_id(&req.item_id)?;
        validate_lease(req.lease_ms)?;
        let span = start_command_span("heartbeat", Some(&req.item_id));
        let req = &req;

        let result = self
            .gate
            .with_exclusive_access(self.store.path(), || async move {
                let mut state = self.store.load().await?;
                let claim = state.claims.get_mut(&req.item_id).ok_or_else(|| Error::NotFound {
                    item_id: req.item_id.clone(),
                    state_path: self.store.path().to_path_buf(),
                })?;

                if claim.session_key.as_deref() != Some(req.session_key.as_str()) {
                    return Err(Error::SessionMismatch {
                        item_id: req.item_id.clone(),
                        expected: claim.session_key.clone(),
                        got: req.session_key.clone(),
                    });
                }

                let now = now_ms();
                claim.heartbeat_at_ms = Some(now);
                claim.updated_at_ms = Some(now);
                if let Some(lease_ms) = req.lease_ms {
                    claim.lease_ms = Some(lease_ms);
                }
                if claim.status.is_none() {
                    claim.status = Some(ClaimStatus::Claimed);
                }
                let claim = claim.clone();
                state.touch(now);
                self.store.persist(&state).await?;

                let lock_path = claim
                    .lock_path
                    .clone()
                    .unwrap_or_else(|| self.locks.path_for(&req.item_id));
                let lock_exists = lock_exists(&lock_path).await;
                if lock_exists {
                    let mut patch = object(json!({
                        "itemId": req.item_id,
                        "status": claim.status,
                        "sessionKey": claim.session_key,
                        "heartbeatAt": iso(now),
                        "leaseMs": claim.lease_ms,
                    }));
                    insert_some(&mut patch, "label", claim.label.as_deref());
                    insert_some(&mut patch, "workLine", claim.work_line.as_deref());
                    self.mirror(&lock_path, patch).await;
                }

                Ok(HeartbeatReport {
                    state_path: self.store.path().to_path_buf(),
                    item_id: req.item_id.clone(),
                    session_key: req.session_key.clone(),
                    lease_ms: claim.ttl_ms(None),
                    age_ms: now - claim.claimed_at_ms.unwrap_or(now),
                    stale: false,
                    lock_path,
                    lock_exists,
                    heartbeat_at_ms: now,
                    heartbeat_at: iso(now),
                })
            })
            .instrument(span)
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(Error::SessionMismatch { .. }) => "session_mismatch",
            Err(Error::NotFound { .. }) => "not_found",
            Err(_) => "error",
        };
        metrics::heartbeats().add(1, &[KeyValue::new("result", outcome)]);
        result
    }

    // -----------------------------------------------------------------------
    // complete
    // -----------------------------------------------------------------------

    /// Move an item's claim to a terminal status, synthesizing the claim
    /// from backlog metadata if it was never claimed through this tool.
    ///
    /// Repeating the call with the same arguments converges on the same
    /// claim and lock payload.
    pub async fn complete(&self, req: CompleteRequest) -> Result<CompleteReport> {
        validate_item_id(&req.item_id)?;
        let span = start_command_span("complete", Some(&req.item_id));
        let status_owned = req.resolved_status();
        let (req, status, span_ref) = (&req, &status_owned, &span);

        let report = self
            .gate
            .with_exclusive_access(self.store.path(), || async move {
                let mut state = self.store.load().await?;
                let now = now_ms();

                let mut claim = match state.claims.get(&req.item_id) {
                    Some(existing) => existing.clone(),
                    None => self.synthesize_claim(&state.backlog, &req, now),
                };

                if let (Some(got), Some(expected)) = (&req.session_key, &claim.session_key) {
                    if got != expected {
                        return Err(Error::SessionMismatch {
                            item_id: req.item_id.clone(),
                            expected: Some(expected.clone()),
                            got: got.clone(),
                        });
                    }
                }

                let previous = claim
                    .status
                    .clone()
                    .map_or_else(|| "unclaimed".to_string(), String::from);
                claim.status = Some(status.clone());
                claim.updated_at_ms = Some(now);
                claim.completed_at_ms = Some(now);
                if let Some(session_key) = &req.session_key {
                    claim.session_key = Some(session_key.clone());
                }
                if let Some(branch) = &req.branch {
                    claim.branch = Some(branch.clone());
                }
                if let Some(pr_number) = req.pr_number {
                    claim.pr_number = Some(pr_number);
                }
                if let Some(pr_url) = &req.pr_url {
                    claim.pr_url = Some(pr_url.clone());
                }

                state.claims.insert(req.item_id.clone(), claim.clone());
                state.touch(now);
                self.store.persist(&state).await?;
                record_claim_transition(span_ref, &req.item_id, &previous, status.as_str());

                let lock_path = claim
                    .lock_path
                    .clone()
                    .unwrap_or_else(|| self.locks.path_for(&req.item_id));
                let mut patch = object(json!({
                    "ts": iso(now),
                    "itemId": req.item_id,
                    "status": status,
                    "completedAt": iso(now),
                }));
                insert_some(&mut patch, "label", claim.label.as_deref());
                insert_some(&mut patch, "workLine", claim.work_line.as_deref());
                insert_some(&mut patch, "sessionKey", claim.session_key.as_deref());
                insert_some(&mut patch, "branch", req.branch.as_deref());
                insert_some(&mut patch, "prUrl", req.pr_url.as_deref());
                if let Some(pr_number) = req.pr_number {
                    patch.insert("prNumber".to_string(), Value::from(pr_number));
                }
                let lock_updated = self.mirror(&lock_path, patch).await;

                info!(item_id = %req.item_id, status = %status, "item completed");

                Ok(CompleteReport {
                    state_path: self.store.path().to_path_buf(),
                    lock_path,
                    item_id: req.item_id.clone(),
                    status: status.clone(),
                    branch: claim.branch,
                    pr_number: claim.pr_number,
                    pr_url: claim.pr_url,
                    completed_at_ms: now,
                    completed_at: iso(now),
                    lock_updated,
                })
            })
            .instrument(span.clone())
            .await?;

        metrics::completions().add(1, &[KeyValue::new("status", report.status.to_string())]);
        Ok(report)
    }

    fn synthesize_claim(&self, backlog: &Backlog, req: &CompleteRequest, now: i64) -> Claim {
        let from_backlog = backlog.item(&req.item_id);
        let queue = from_backlog
            .and_then(|it| it.queue_tag.clone())
            .unwrap_or_else(|| self.queue.clone());
        let label = req
            .label
            .clone()
            .unwrap_or_else(|| build_label(&queue, &req.item_id, now));

        Claim {
            item_id: req.item_id.clone(),
            queue: Some(queue),
            label: Some(label),
            work_line: from_backlog.map(|it| it.work_line.clone()),
            session_key: req.session_key.clone(),
            lock_path: Some(self.locks.path_for(&req.item_id)),
            claimed_at_ms: Some(now),
            heartbeat_at_ms: Some(now),
            created_at_ms: Some(now),
            ..Claim::default()
        }
    }

    /// Best-effort lock mirror update. Returns whether it was written.
    async fn mirror(&self, lock_path: &Path, patch: Map<String, Value>) -> bool {
        match self.locks.merge_update_at(lock_path, patch).await {
            Ok(_) => true,
            Err(e) => {
                warn!(lock = %lock_path.display(), "lock mirror update failed: {e}");
                false
            }
        }
    }
}

/// Session key used when a worker does not name itself.
pub fn default_session_key() -> String {
    format!("workq-{}-{}", std::process::id(), now_ms())
}

fn build_label(queue: &str, item_id: &str, now: i64) -> String {
    format!("{queue}-work-{item_id}-AUTO-{}", local_stamp(now))
}

/// Item ids name lock files, so they must stay a single plain path segment.
fn validate_item_id(item_id: &str) -> Result<()> {
    let valid = !item_id.is_empty()
        && !item_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '.' || c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(Error::usage_with(
            format!("invalid item id: {item_id:?}"),
            json!({ "itemId": item_id }),
        ))
    }
}

/// A lease of zero is honoured (the claim is stale as soon as time passes);
/// a negative one is an input error.
fn validate_lease(lease_ms: Option<i64>) -> Result<()> {
    match lease_ms {
        Some(ms) if ms < 0 => Err(Error::usage_with(
            format!("lease must be a non-negative number of ms, got {ms}"),
            json!({ "leaseMs": ms }),
        )),
        _ => Ok(()),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn insert_some(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        map.insert(key.to_string(), Value::from(v));
    }
}
