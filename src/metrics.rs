//! Metrics as a capability.
//!
//! The façade reports cache events through a [`MetricsSink`] trait object
//! so that any metric system can be attached without the core depending
//! on one. [`NoopMetrics`] satisfies the interface when metrics are
//! absent, keeping every code path identical.

use std::time::Duration;

/// Receiver for cache events. All methods default to no-ops so sinks
/// implement only what they export.
pub trait MetricsSink: Send + Sync + 'static {
    /// A request was answered from cache.
    fn record_hit(&self, status: u16, bytes_saved: usize) {
        let _ = (status, bytes_saved);
    }

    /// A request went upstream.
    fn record_miss(&self) {}

    /// A cache-layer failure, labeled by kind (`corruption`,
    /// `read_failed`, `write_failed`, ...).
    fn record_error(&self, kind: &str) {
        let _ = kind;
    }

    /// A response was stored.
    fn record_write(&self) {}

    /// End-to-end façade latency, labeled `hit`, `hit_stale`, or `miss`.
    fn observe_latency(&self, operation: &str, elapsed: Duration) {
        let _ = (operation, elapsed);
    }
}

/// The sink used when no metric system is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}
