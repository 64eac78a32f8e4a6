//! Mutual exclusion for the state document.
//!
//! The coordinator only sees the [`Gate`] trait; [`FileGate`] is the
//! marker-file implementation with stale-holder takeover. Another backend
//! (a native file lock, a lock service) can be slotted in without touching
//! coordinator logic.

pub mod file;

pub use file::FileGate;

use crate::error::Result;
use std::future::Future;
use std::path::Path;

/// Serializes bodies that touch the same resource across cooperating processes.
#[allow(async_fn_in_trait)]
pub trait Gate {
    /// Run `body` while no other cooperating process runs a body for `resource`.
    ///
    /// Access is released on every exit path, including when `body` fails.
    async fn with_exclusive_access<T, F, Fut>(&self, resource: &Path, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>;
}
