//! Span helpers for coordinator operations.

use tracing::Span;

/// Start a span for one coordinator command.
///
/// `workq.item` is declared empty when not known up front (e.g. `claim`)
/// and filled once an item is chosen.
pub fn start_command_span(command: &'static str, item_id: Option<&str>) -> Span {
    let span = tracing::info_span!(
        "workq.command",
        "workq.command" = command,
        "workq.item" = tracing::field::Empty,
    );
    if let Some(id) = item_id {
        span.record("workq.item", id);
    }
    span
}

/// Record a claim status change on the given span.
pub fn record_claim_transition(span: &Span, item_id: &str, from: &str, to: &str) {
    span.record("workq.item", item_id);
    span.in_scope(|| {
        tracing::info!(item_id, from, to, "claim_transition");
    });
}
