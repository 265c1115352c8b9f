// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for hierarchy-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `hierarchy_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: location, department
//! - `outcome`: success, failure, applied, skipped, ...
//! - `error_type`: see [`StreamError::kind`](crate::error::StreamError::kind)

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// CACHE - Bulk load and size
// ═══════════════════════════════════════════════════════════════════════════

/// Record one bulk load of an entity kind
pub fn record_load(kind: &str, success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "hierarchy_sync_loads_total",
        "kind" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "hierarchy_sync_load_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set current node count of a cache
pub fn set_cache_nodes(kind: &str, count: usize) {
    gauge!(
        "hierarchy_sync_cache_nodes",
        "kind" => kind.to_string()
    )
    .set(count as f64);
}

/// Record a full rebuild of derived indices and paths
pub fn record_rebuild(kind: &str, duration: Duration) {
    histogram!(
        "hierarchy_sync_rebuild_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a path rebuild that truncated at least one cyclic ancestry chain
pub fn record_cycle_detected(kind: &str) {
    counter!(
        "hierarchy_sync_cycles_detected_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// FEED - Frames and change events
// ═══════════════════════════════════════════════════════════════════════════

/// Record a received frame by command
pub fn record_frame(command: &str) {
    counter!(
        "hierarchy_sync_frames_total",
        "command" => command.to_string()
    )
    .increment(1);
}

/// Record a dispatched change event
pub fn record_event(kind: &str, outcome: &str) {
    counter!(
        "hierarchy_sync_events_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONNECTION - Lifecycle and failures
// ═══════════════════════════════════════════════════════════════════════════

/// Record a connection attempt failure by category
pub fn record_connection_error(error_type: &str) {
    counter!(
        "hierarchy_sync_connection_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a reconnection attempt
pub fn record_reconnect_attempt() {
    counter!("hierarchy_sync_reconnect_attempts_total").increment(1);
}

/// Set connection state (for monitoring state machine transitions)
pub fn set_connection_state(state: &str) {
    counter!(
        "hierarchy_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Set whether the feed is currently streaming
pub fn set_streaming(streaming: bool) {
    gauge!("hierarchy_sync_streaming").set(if streaming { 1.0 } else { 0.0 });
}

/// Record time from first attempt to streaming
pub fn record_establish_duration(duration: Duration) {
    histogram!("hierarchy_sync_establish_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records a rebuild on drop
pub struct RebuildTimer {
    kind: String,
    start: Instant,
}

impl RebuildTimer {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for RebuildTimer {
    fn drop(&mut self) {
        record_rebuild(&self.kind, self.start.elapsed());
    }
}
