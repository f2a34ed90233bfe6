//! # Prometheus Metrics
//!
//! Operational counters for one repository: commit and rollback totals,
//! rows written, commit latency and how long writers queue for the lock.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so
//! several repositories in one process (header store, proven-header store,
//! ...) never collide in a global registry. The node scrapes them via
//! [`StoreMetrics::registry`] or renders them with [`StoreMetrics::encode`].

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};

/// Metric handles for one repository. Cheap to clone.
#[derive(Clone)]
pub struct StoreMetrics {
    registry: Registry,
    /// Transactions committed successfully.
    pub commits_total: IntCounter,
    /// Transactions rolled back, explicitly or by drop.
    pub rollbacks_total: IntCounter,
    /// Commits whose batch write failed.
    pub commit_failures_total: IntCounter,
    /// Physical puts applied by commits.
    pub rows_written_total: IntCounter,
    /// Physical deletes applied by commits (tombstones and table clears).
    pub rows_deleted_total: IntCounter,
    /// Number of registered tables.
    pub tables: IntGauge,
    /// Time spent building and writing commit batches.
    pub commit_duration_seconds: Histogram,
    /// Time `begin_write` spent waiting for the writer lock.
    pub writer_wait_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("metric creation");
    registry
        .register(Box::new(c.clone()))
        .expect("metric registration");
    c
}

fn histogram(registry: &Registry, name: &str, help: &str) -> Histogram {
    let h = Histogram::with_opts(HistogramOpts::new(name, help).buckets(vec![
        0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
    ]))
    .expect("metric creation");
    registry
        .register(Box::new(h.clone()))
        .expect("metric registration");
    h
}

impl StoreMetrics {
    /// Create and register every metric in a fresh registry.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("nova_store".into()), None)
            .expect("failed to create prometheus registry");

        let commits_total = counter(&registry, "commits_total", "Committed transactions");
        let rollbacks_total = counter(&registry, "rollbacks_total", "Rolled back transactions");
        let commit_failures_total = counter(
            &registry,
            "commit_failures_total",
            "Commits whose batch write failed",
        );
        let rows_written_total =
            counter(&registry, "rows_written_total", "Physical rows put by commits");
        let rows_deleted_total =
            counter(&registry, "rows_deleted_total", "Physical rows deleted by commits");

        let tables = IntGauge::new("tables", "Registered tables").expect("metric creation");
        registry
            .register(Box::new(tables.clone()))
            .expect("metric registration");

        let commit_duration_seconds = histogram(
            &registry,
            "commit_duration_seconds",
            "Time spent writing commit batches",
        );
        let writer_wait_seconds = histogram(
            &registry,
            "writer_wait_seconds",
            "Time spent waiting for the writer lock",
        );

        Self {
            registry,
            commits_total,
            rollbacks_total,
            commit_failures_total,
            rows_written_total,
            rows_deleted_total,
            tables,
            commit_duration_seconds,
            writer_wait_seconds,
        }
    }

    /// The registry holding every store metric, for exporters that gather
    /// from it directly instead of calling [`encode`](Self::encode).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if encoder.encode(&families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}
