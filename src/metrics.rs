//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Sync passes per node (attempts, outcomes, duration)
//! - Truths pushed to remote nodes
//! - Remote call latency
//! - Local store mutations and busy retries
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No recorder is installed by this crate. The embedding binary decides
//! where metrics go; without a recorder every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use truth_replication::metrics;
//! use std::time::Duration;
//!
//! metrics::record_sync_attempt(3);
//! metrics::record_sync_outcome(3, "success", 12, Duration::from_millis(250));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the start of a sync pass against a node.
pub fn record_sync_attempt(node_id: i64) {
    counter!("replication_sync_attempts_total", "node_id" => node_id.to_string()).increment(1);
}

/// Record the end of a sync pass.
///
/// `outcome` is one of `success`, `handshake_failed`, `fetch_failed`, `push_failed`.
pub fn record_sync_outcome(node_id: i64, outcome: &str, pushed: usize, duration: Duration) {
    let node = node_id.to_string();
    counter!("replication_sync_outcomes_total", "node_id" => node.clone(), "outcome" => outcome.to_string())
        .increment(1);
    counter!("replication_truths_pushed_total", "node_id" => node.clone()).increment(pushed as u64);
    histogram!("replication_sync_duration_seconds", "node_id" => node).record(duration.as_secs_f64());
}

/// Record the size of the remote snapshot taken during a sync.
pub fn record_remote_snapshot(node_id: i64, truths: usize, pages: usize) {
    let node = node_id.to_string();
    histogram!("replication_remote_snapshot_truths", "node_id" => node.clone()).record(truths as f64);
    histogram!("replication_remote_snapshot_pages", "node_id" => node).record(pages as f64);
}

/// Record latency of a single remote operation (handshake, fetch, push).
pub fn record_remote_op_latency(node_id: i64, operation: &str, duration: Duration) {
    histogram!(
        "replication_remote_op_duration_seconds",
        "node_id" => node_id.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a sync rejected because another pass holds the node.
pub fn record_sync_rejected(node_id: i64) {
    counter!("replication_sync_rejected_total", "node_id" => node_id.to_string()).increment(1);
}

/// Record time spent waiting for a global sync slot.
pub fn record_sync_slot_wait(duration: Duration) {
    histogram!("replication_sync_slot_wait_seconds").record(duration.as_secs_f64());
}

/// Set number of registered nodes.
pub fn set_registered_nodes(count: usize) {
    gauge!("replication_registered_nodes").set(count as f64);
}

/// Set number of sync passes currently running.
pub fn set_active_syncs(count: usize) {
    gauge!("replication_active_syncs").set(count as f64);
}

/// Record a mutation of the local truth store.
pub fn record_truth_mutation(operation: &str) {
    counter!("replication_truth_mutations_total", "operation" => operation.to_string()).increment(1);
}

/// Record truths received from a remote node.
pub fn record_truths_received(received: usize, created: usize) {
    counter!("replication_truths_received_total").increment(received as u64);
    counter!("replication_truths_received_created_total").increment(created as u64);
}

/// Record a SQLite busy retry.
pub fn record_store_retry(operation: &str) {
    counter!("replication_store_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record an error surfaced to a caller, by kind.
pub fn record_error(kind: &str) {
    counter!("replication_errors_total", "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The metrics crate uses global state and no recorder is installed in
    // unit tests, so these only verify the functions accept edge values.

    #[test]
    fn test_record_sync_lifecycle() {
        record_sync_attempt(1);
        record_sync_outcome(1, "success", 10, Duration::from_millis(50));
        record_sync_outcome(1, "push_failed", 0, Duration::ZERO);
        record_remote_snapshot(1, 0, 1);
    }

    #[test]
    fn test_record_remote_op_latency() {
        record_remote_op_latency(2, "handshake", Duration::from_millis(5));
        record_remote_op_latency(2, "fetch", Duration::from_secs(1));
        record_remote_op_latency(2, "push", Duration::from_micros(300));
    }

    #[test]
    fn test_gauges() {
        set_registered_nodes(0);
        set_registered_nodes(usize::MAX);
        set_active_syncs(3);
    }

    #[test]
    fn test_counters() {
        record_sync_rejected(-1);
        record_sync_slot_wait(Duration::ZERO);
        record_truth_mutation("add");
        record_truths_received(5, 2);
        record_store_retry("truth_add");
        record_error("validation");
    }
}
