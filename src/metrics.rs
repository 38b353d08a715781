// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the tenant sync layer.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `tenant_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `collection`: remote collection name
//! - `module`: business module name
//! - `phase`: scoped, fallback
//! - `status`: success, error, permission_denied, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a query cache lookup (`hit`, `miss`, `bypass`, `no_identity`)
pub fn record_cache_lookup(outcome: &'static str) {
    counter!(
        "tenant_sync_cache_lookups_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Set current query cache entry count
pub fn set_cache_entries(count: usize) {
    gauge!("tenant_sync_cache_entries").set(count as f64);
}

/// Record cache entries dropped (`ttl`, `invalidate`, `clear`)
pub fn record_cache_evictions(reason: &'static str, count: usize) {
    counter!(
        "tenant_sync_cache_evictions_total",
        "reason" => reason
    )
    .increment(count as u64);
}

/// Record a remote fetch attempt
pub fn record_remote_fetch(collection: &str, phase: &'static str, status: &'static str) {
    counter!(
        "tenant_sync_remote_fetches_total",
        "collection" => collection.to_string(),
        "phase" => phase,
        "status" => status
    )
    .increment(1);
}

/// Record remote fetch latency
pub fn record_remote_latency(collection: &str, duration: Duration) {
    histogram!(
        "tenant_sync_remote_fetch_seconds",
        "collection" => collection.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record records dropped by the in-memory tenant filter
pub fn record_tenant_filtered(collection: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "tenant_sync_tenant_filtered_total",
        "collection" => collection.to_string()
    )
    .increment(count as u64);
}

/// Record local mirror entries removed by garbage collection
pub fn record_gc_removed(count: usize) {
    counter!("tenant_sync_gc_removed_total").increment(count as u64);
}

/// Record a garbage collection pass
pub fn record_gc_run(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "tenant_sync_gc_runs_total",
        "status" => status
    )
    .increment(1);
}

/// Record mirror entries deleted by reconciliation
pub fn record_reconcile_removed(module: &str, count: usize) {
    counter!(
        "tenant_sync_reconcile_removed_total",
        "module" => module.to_string()
    )
    .increment(count as u64);
}

/// Set the inconsistency count of the last verification of a module
pub fn set_module_inconsistencies(module: &str, count: usize) {
    gauge!(
        "tenant_sync_module_inconsistencies",
        "module" => module.to_string()
    )
    .set(count as f64);
}

/// Record unparseable local mirror entries that were skipped
pub fn record_malformed_entries(count: usize) {
    if count == 0 {
        return;
    }
    counter!("tenant_sync_malformed_entries_total").increment(count as u64);
}

/// Record records evicted from a full mirror location
pub fn record_mirror_evictions(count: usize) {
    counter!("tenant_sync_mirror_evictions_total").increment(count as u64);
}

/// Set service state (for monitoring state transitions)
pub fn set_service_state(state: &str) {
    let state_value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "Stopped" => 2.0,
        _ => -1.0,
    };
    gauge!("tenant_sync_service_state").set(state_value);
}

/// A timing guard that records remote fetch latency on drop
pub struct LatencyTimer {
    collection: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_remote_latency(&self.collection, self.start.elapsed());
    }
}
