//! Garbage collection bookkeeping.
//!
//! Collection runs in two phases:
//!
//! 1. **Network sweep**: delete digest, cache and last-resync rows whose
//!    network is not tracked.
//! 2. **Lease sweep**: reap cache writers whose network is untracked or whose
//!    lease has expired. A writer's staging table is dropped first and its
//!    lease row removed only after the drop succeeds, so a lease row never
//!    disappears while its table may still exist.
//!
//! Each step runs in its own transaction and a failing step does not stop
//! the others. Whatever fails is retried on the next pass.

use std::collections::{BTreeMap, HashSet};

/// A recorded cache writer lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheWriterLease {
    pub writer_id: String,
    pub network: String,
    pub table_name: String,
    pub created_at: i64,
}

impl CacheWriterLease {
    /// Whether the lease sweep should reap this writer.
    pub fn is_reapable(&self, tracked: &HashSet<&str>, now: i64, valid_interval_secs: i64) -> bool {
        if !tracked.contains(self.network.as_str()) {
            return true;
        }
        now - self.created_at > valid_interval_secs
    }
}

/// Outcome of one garbage collection pass.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    /// Rows deleted per table by the network sweep.
    pub deleted_rows: BTreeMap<String, u64>,
    /// Cache writers whose staging table and lease were removed.
    pub reaped_writers: Vec<String>,
    /// One message per failed step.
    pub failures: Vec<String>,
}

impl GcReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn total_deleted_rows(&self) -> u64 {
        self.deleted_rows.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(network: &str, created_at: i64) -> CacheWriterLease {
        CacheWriterLease {
            writer_id: "w".into(),
            network: network.into(),
            table_name: "t".into(),
            created_at,
        }
    }

    #[test]
    fn test_untracked_network_always_reapable() {
        let tracked: HashSet<&str> = ["n1"].into_iter().collect();
        assert!(lease("n0", 1000).is_reapable(&tracked, 1000, 150));
    }

    #[test]
    fn test_tracked_network_reapable_only_after_interval() {
        let tracked: HashSet<&str> = ["n1"].into_iter().collect();
        let l = lease("n1", 1000);
        assert!(!l.is_reapable(&tracked, 1100, 150));
        assert!(!l.is_reapable(&tracked, 1150, 150));
        assert!(l.is_reapable(&tracked, 1151, 150));
    }

    #[test]
    fn test_report_totals() {
        let mut report = GcReport::default();
        report.deleted_rows.insert("digests".into(), 2);
        report.deleted_rows.insert("cache".into(), 5);
        assert_eq!(report.total_deleted_rows(), 7);
        assert!(report.is_clean());
    }
}
