//! `metrics`-crate-backed adapter, enabled by the `metrics` feature.

use std::time::Duration;

use crate::{CacheMetrics, CacheOperation, EvictionReason};

/// Emits counters/histograms through the `metrics` crate's global recorder
/// facade, so any exporter (Prometheus, StatsD, ...) wired up by the host
/// application picks these up without vaultcache depending on a specific
/// backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCrateAdapter;

impl CacheMetrics for MetricsCrateAdapter {
    fn record_hit(&self, _key: &str) {
        metrics::counter!("vaultcache_hits_total").increment(1);
    }

    fn record_miss(&self, _key: &str) {
        metrics::counter!("vaultcache_misses_total").increment(1);
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        metrics::histogram!("vaultcache_operation_duration_seconds", "operation" => operation.as_str())
            .record(duration.as_secs_f64());
    }

    fn record_eviction(&self, reason: EvictionReason) {
        metrics::counter!("vaultcache_evictions_total", "reason" => reason.as_str()).increment(1);
    }

    fn record_drain(&self, batch_size: usize, emitted_ops: usize) {
        metrics::histogram!("vaultcache_drain_batch_size").record(batch_size as f64);
        metrics::histogram!("vaultcache_drain_emitted_ops").record(emitted_ops as f64);
    }
}
