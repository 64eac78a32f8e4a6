//! Coordinator: the claim/lease operations composed under the state gate.

pub mod coordinator;
pub mod report;
pub mod status;

pub use coordinator::{Coordinator, default_session_key};
pub use report::*;
