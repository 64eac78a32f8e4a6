//! Read-only status view of claims and lock files.
//!
//! Does not take the gate: a load never observes a partial document. Claim
//! staleness goes through [`Claim::is_stale`], the same rule the write path
//! applies, so a status inspector and a live coordinator agree on liveness.

use super::coordinator::Coordinator;
use super::report::{ClaimView, LockView, StatusReport, StatusRequest, StatusTotals};
use crate::config::DEFAULT_LEASE_MS;
use crate::error::Result;
use crate::gate::Gate;
use crate::locks::lock_exists;
use crate::model::{Claim, LockRecord, iso, lease_expired, now_ms};
use crate::telemetry::work::start_command_span;
use tracing::{Instrument, debug};

impl<G: Gate> Coordinator<G> {
    /// Per-claim and per-lock-file views, each independently flagged stale.
    pub async fn status(&self, req: StatusRequest) -> Result<StatusReport> {
        let span = start_command_span("status", None);
        self.status_inner(req).instrument(span).await
    }

    async fn status_inner(&self, req: StatusRequest) -> Result<StatusReport> {
        let state = self.store.load().await?;
        let now = now_ms();
        let ttl_override = req.ttl_ms.filter(|ms| *ms > 0);

        let mut claims = Vec::with_capacity(state.claims.len());
        for claim in state.claims.values() {
            let lock_path = claim
                .lock_path
                .clone()
                .unwrap_or_else(|| self.locks.path_for(&claim.item_id));
            claims.push(ClaimView {
                item_id: claim.item_id.clone(),
                status: claim.status.clone(),
                queue: claim.queue.clone(),
                label: claim.label.clone(),
                session_key: claim.session_key.clone(),
                claimed_at_ms: claim.claimed_at_ms,
                heartbeat_at_ms: claim.last_seen_ms(),
                lease_ms: claim.ttl_ms(ttl_override),
                age_ms: claim.claimed_at_ms.map(|at| now - at),
                stale: claim.is_stale(now, ttl_override),
                lock_exists: lock_exists(&lock_path).await,
                lock_path,
                branch: claim.branch.clone(),
                pr_number: claim.pr_number,
                pr_url: claim.pr_url.clone(),
            });
        }
        claims.sort_by(|a, b| a.item_id.cmp(&b.item_id));

        let locks: Vec<LockView> = self
            .locks
            .list_all()
            .await?
            .into_iter()
            .map(|lock| {
                let claim = state.claims.get(&lock.item_id);
                lock_view(lock, claim, now, ttl_override)
            })
            .collect();

        let totals = StatusTotals {
            claims: claims.len(),
            stale_claims: claims.iter().filter(|c| c.stale).count(),
            locks: locks.len(),
            stale_locks: locks.iter().filter(|l| l.stale).count(),
        };
        debug!(
            claims = totals.claims,
            stale_claims = totals.stale_claims,
            locks = totals.locks,
            stale_locks = totals.stale_locks,
            "status computed"
        );

        let (claims, locks) = if req.stale_only {
            (
                claims.into_iter().filter(|c| c.stale).collect(),
                locks.into_iter().filter(|l| l.stale).collect(),
            )
        } else {
            (claims, locks)
        };

        Ok(StatusReport {
            state_path: self.store.path().to_path_buf(),
            lock_dir: self.locks.dir().to_path_buf(),
            now_ms: now,
            now: iso(now),
            totals,
            claims,
            locks,
        })
    }
}

/// A lock file is stale when it is older than the lease and its claim is
/// absent or still open.
fn lock_view(lock: LockRecord, claim: Option<&Claim>, now: i64, ttl_override: Option<i64>) -> LockView {
    let ttl = match claim {
        Some(claim) => claim.ttl_ms(ttl_override),
        None => ttl_override.unwrap_or(DEFAULT_LEASE_MS),
    };
    let stale = lease_expired(lock.mtime_ms, now, ttl) && claim.is_none_or(|c| !c.is_terminal());

    LockView {
        status: lock.field("status").map(str::to_string),
        label: lock.field("label").map(str::to_string),
        session_key: lock.field("sessionKey").map(str::to_string),
        pr_number: lock
            .data
            .as_ref()
            .and_then(|d| d.get("prNumber"))
            .and_then(serde_json::Value::as_u64),
        pr_url: lock.field("prUrl").map(str::to_string),
        item_id: lock.item_id,
        lock_path: lock.lock_path,
        age_ms: lock.age_ms,
        mtime_ms: lock.mtime_ms,
        stale,
    }
}
