//! `tracing`-backed metrics adapter, enabled by the `tracing` feature.

use std::time::Duration;

use crate::{CacheMetrics, CacheOperation, EvictionReason};

/// Emits `tracing` events instead of aggregating counters; useful when a
/// dedicated metrics backend isn't wired up but operators still want
/// cache behavior visible in logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl CacheMetrics for TracingMetrics {
    fn record_hit(&self, key: &str) {
        tracing::debug!(key, "cache hit");
    }

    fn record_miss(&self, key: &str) {
        tracing::debug!(key, "cache miss");
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        tracing::trace!(op = operation.as_str(), ?duration, "operation latency");
    }

    fn record_eviction(&self, reason: EvictionReason) {
        tracing::debug!(reason = reason.as_str(), "cache eviction");
    }

    fn record_drain(&self, batch_size: usize, emitted_ops: usize) {
        tracing::trace!(batch_size, emitted_ops, "drain coalesced");
    }
}
