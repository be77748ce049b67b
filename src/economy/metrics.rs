//! Economy Driver Metrics
//!
//! Lock-free counters for pool activity, read by the REST status endpoint
//! and the Prometheus exporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters for one economy driver instance
#[derive(Debug, Default)]
pub struct EconomyMetrics {
    pub flexvols_created: AtomicU64,
    pub flexvols_pruned: AtomicU64,
    pub qtrees_created: AtomicU64,
    pub qtrees_destroyed: AtomicU64,
    pub qtrees_reaped: AtomicU64,
    pub create_failures: AtomicU64,
    pub quota_resizes_started: AtomicU64,
    pub quota_resize_failures: AtomicU64,
    pub housekeeping_passes: AtomicU64,
    /// Unix millis of the last completed housekeeping pass
    last_pass_ms: AtomicI64,
}

impl EconomyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a finished housekeeping pass
    pub fn record_pass(&self) {
        Self::incr(&self.housekeeping_passes);
        self.last_pass_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> EconomyMetricsSnapshot {
        let last = self.last_pass_ms.load(Ordering::Relaxed);
        EconomyMetricsSnapshot {
            flexvols_created: self.flexvols_created.load(Ordering::Relaxed),
            flexvols_pruned: self.flexvols_pruned.load(Ordering::Relaxed),
            qtrees_created: self.qtrees_created.load(Ordering::Relaxed),
            qtrees_destroyed: self.qtrees_destroyed.load(Ordering::Relaxed),
            qtrees_reaped: self.qtrees_reaped.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            quota_resizes_started: self.quota_resizes_started.load(Ordering::Relaxed),
            quota_resize_failures: self.quota_resize_failures.load(Ordering::Relaxed),
            housekeeping_passes: self.housekeeping_passes.load(Ordering::Relaxed),
            last_housekeeping_pass: (last > 0)
                .then(|| DateTime::from_timestamp_millis(last))
                .flatten(),
        }
    }
}

/// Point-in-time copy of [`EconomyMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomyMetricsSnapshot {
    pub flexvols_created: u64,
    pub flexvols_pruned: u64,
    pub qtrees_created: u64,
    pub qtrees_destroyed: u64,
    pub qtrees_reaped: u64,
    pub create_failures: u64,
    pub quota_resizes_started: u64,
    pub quota_resize_failures: u64,
    pub housekeeping_passes: u64,
    pub last_housekeeping_pass: Option<DateTime<Utc>>,
}

impl EconomyMetricsSnapshot {
    /// Counters keyed by exporter-friendly names
    pub fn counters(&self) -> BTreeMap<String, u64> {
        [
            ("flexvols_created", self.flexvols_created),
            ("flexvols_pruned", self.flexvols_pruned),
            ("qtrees_created", self.qtrees_created),
            ("qtrees_destroyed", self.qtrees_destroyed),
            ("qtrees_reaped", self.qtrees_reaped),
            ("create_failures", self.create_failures),
            ("quota_resizes_started", self.quota_resizes_started),
            ("quota_resize_failures", self.quota_resize_failures),
            ("housekeeping_passes", self.housekeeping_passes),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = EconomyMetrics::new();
        assert!(metrics.snapshot().last_housekeeping_pass.is_none());

        EconomyMetrics::incr(&metrics.qtrees_created);
        EconomyMetrics::add(&metrics.qtrees_reaped, 3);
        metrics.record_pass();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.qtrees_created, 1);
        assert_eq!(snapshot.qtrees_reaped, 3);
        assert_eq!(snapshot.housekeeping_passes, 1);
        assert!(snapshot.last_housekeeping_pass.is_some());

        let counters = snapshot.counters();
        assert_eq!(counters["qtrees_reaped"], 3);
        assert_eq!(counters.len(), 9);
    }
}
