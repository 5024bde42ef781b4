//! The counter-only metrics sink collaborator from `spec.md` §6 item 5.

use dashmap::DashMap;

/// Counter increments on named labels. The engine only ever increments
/// `comm.consume` and `comm.produce`; the trait is intentionally wider so a
/// host application can reuse it for its own counters.
pub trait MetricsSink: Send + Sync {
    /// Increment the named counter by one.
    fn incr(&self, label: &str);
}

/// A metrics sink that discards every increment. The default when no
/// metrics backend is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _label: &str) {}
}

/// An in-process counter table, useful for tests and for small deployments
/// that do not need an external metrics backend.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, u64>,
}

impl InMemoryMetrics {
    /// Create an empty counter table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `label`, or zero if it was never incremented.
    pub fn get(&self, label: &str) -> u64 {
        self.counters.get(label).map(|v| *v).unwrap_or(0)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr(&self, label: &str) {
        *self.counters.entry(label.to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_metrics_counts_increments() {
        let metrics = InMemoryMetrics::new();
        metrics.incr("comm.consume");
        metrics.incr("comm.consume");
        metrics.incr("comm.produce");
        assert_eq!(metrics.get("comm.consume"), 2);
        assert_eq!(metrics.get("comm.produce"), 1);
        assert_eq!(metrics.get("comm.unknown"), 0);
    }

    #[test]
    fn noop_metrics_never_panics() {
        let metrics = NoopMetrics;
        metrics.incr("anything");
    }
}
