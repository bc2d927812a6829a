//! Table counters
//!
//! Lock-free monotonic counters on the dispatch path, relaxed ordering
//! throughout. Eventually consistent when read concurrently.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct TableMetrics {
    /// Records suppressed by the blacklist
    num_blacklist: AtomicU64,
    /// Records that survived the pipeline but matched no route
    num_unroutable: AtomicU64,
}

impl TableMetrics {
    #[inline]
    pub(crate) fn record_blacklisted(&self) {
        self.num_blacklist.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_unroutable(&self) {
        self.num_unroutable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TableMetricsSnapshot {
        TableMetricsSnapshot {
            num_blacklist: self.num_blacklist.load(Ordering::Relaxed),
            num_unroutable: self.num_unroutable.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time table counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableMetricsSnapshot {
    /// Records suppressed by the blacklist
    pub num_blacklist: u64,
    /// Records that matched no route
    pub num_unroutable: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = TableMetrics::default();
        metrics.record_blacklisted();
        metrics.record_blacklisted();
        metrics.record_unroutable();

        let snap = metrics.snapshot();
        assert_eq!(snap.num_blacklist, 2);
        assert_eq!(snap.num_unroutable, 1);
    }
}
