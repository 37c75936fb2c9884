// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync store.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process chooses the exporter.
//!
//! # Metric Naming Convention
//! - `syncstore_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: get_digests, set_digest, insert_many, apply, ...
//! - `status`: success, error
//! - `table` / `phase`: garbage collection breakdown

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of a store operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "syncstore_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "syncstore_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record rows staged by a cache writer
pub fn record_rows_staged(count: usize) {
    counter!("syncstore_cache_rows_staged_total").increment(count as u64);
}

/// Record an applied cache writer
pub fn record_cache_applied(upserted: u64, deleted: u64) {
    counter!("syncstore_cache_applies_total").increment(1);
    counter!("syncstore_cache_rows_deleted_total").increment(deleted);
    histogram!("syncstore_cache_apply_rows").record(upserted as f64);
}

/// Record rows removed by the network sweep
pub fn record_gc_deleted(table: &str, rows: u64) {
    counter!(
        "syncstore_gc_deleted_rows_total",
        "table" => table.to_string()
    )
    .increment(rows);
}

/// Record a reaped cache writer
pub fn record_gc_reaped_writer() {
    counter!("syncstore_gc_reaped_writers_total").increment(1);
}

/// Record a failed garbage collection step
pub fn record_gc_failure(phase: &str) {
    counter!(
        "syncstore_gc_failures_total",
        "phase" => phase.to_string()
    )
    .increment(1);
}

/// Timer guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}

/// Record success/error for a finished operation and pass the result through
pub fn observe<T, E>(operation: &str, result: Result<T, E>) -> Result<T, E> {
    record_operation(operation, if result.is_ok() { "success" } else { "error" });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_gc_counters_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_gc_deleted("subscriber_digests", 3);
            record_gc_deleted("subscriber_digests", 2);
            record_gc_failure("lease_sweep");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let deleted = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "syncstore_gc_deleted_rows_total")
            .map(|(_, _, _, value)| value.clone());
        assert_eq!(deleted, Some(DebugValue::Counter(5)).as_ref());
        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "syncstore_gc_failures_total"));
    }

    #[test]
    fn test_observe_passes_result_through() {
        let ok: Result<u8, &str> = observe("get_digests", Ok(1));
        assert_eq!(ok, Ok(1));
        let err: Result<u8, &str> = observe("get_digests", Err("boom"));
        assert_eq!(err, Err("boom"));
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("apply");
            std::thread::sleep(Duration::from_millis(1));
        }
        record_rows_staged(10);
        record_cache_applied(10, 2);
        record_gc_reaped_writer();
    }
}
