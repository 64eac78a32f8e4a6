//! # workq
//!
//! Claim/lease coordination for independent agents pulling work from a
//! shared backlog over a shared filesystem.
//!
//! A JSON state document (guarded by a marker-file gate) is the ledger of
//! the backlog snapshot and of who owns which item; per-item lock files
//! mirror ownership for tools that never read the ledger. Leases expire
//! into a reported "stale" flag, never into automatic eviction.

pub mod backlog;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod locks;
pub mod model;
pub mod storage;
pub mod telemetry;
