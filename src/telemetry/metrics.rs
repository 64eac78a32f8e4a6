//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: claim attempts.
/// Labels: `queue`, `result` ("claimed" | "none").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("workq.claims")
        .with_description("Claim attempts by outcome")
        .build()
}

/// Counter: heartbeats.
/// Labels: `result` ("ok" | "session_mismatch" | "not_found").
pub fn heartbeats() -> Counter<u64> {
    meter()
        .u64_counter("workq.heartbeats")
        .with_description("Heartbeats by outcome")
        .build()
}

/// Counter: completions.
/// Labels: `status`.
pub fn completions() -> Counter<u64> {
    meter()
        .u64_counter("workq.completions")
        .with_description("Claims moved to a terminal status")
        .build()
}

/// Counter: backlog items seen by a sync.
/// Labels: `eligible` ("true" | "false").
pub fn backlog_items() -> Counter<u64> {
    meter()
        .u64_counter("workq.backlog.items")
        .with_description("Backlog items parsed during sync")
        .build()
}

/// Histogram: time spent acquiring the state gate, in milliseconds.
/// Labels: `result` ("acquired" | "timeout").
pub fn gate_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.gate.wait_ms")
        .with_description("State gate acquisition wait")
        .with_unit("ms")
        .build()
}
