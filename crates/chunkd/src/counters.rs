//! Replication engine counters.
//!
//! Dispatch counters (`replication_count`, `recovery_count`) count
//! requests as they are dispatched, including ones that fail
//! immediately; the error and canceled buckets are split by mode.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic accumulators, updated from replicator tasks.
#[derive(Debug, Default)]
pub struct Counters {
    replicator_count: AtomicU64,
    replication_count: AtomicU64,
    recovery_count: AtomicU64,
    replication_error_count: AtomicU64,
    replication_canceled_count: AtomicU64,
    recovery_error_count: AtomicU64,
    recovery_canceled_count: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    /// Replicators currently alive.
    pub replicator_count: u64,
    /// Direct replications dispatched.
    pub replication_count: u64,
    /// Recoveries dispatched.
    pub recovery_count: u64,
    pub replication_error_count: u64,
    pub replication_canceled_count: u64,
    pub recovery_error_count: u64,
    pub recovery_canceled_count: u64,
}

impl Counters {
    pub fn replicator_started(&self) {
        self.replicator_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replicator_finished(&self) {
        self.replicator_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn incr_replication(&self) {
        self.replication_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_recovery(&self) {
        self.recovery_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a terminal failure or cancellation in the bucket for the
    /// replication mode.
    pub fn count_terminal(&self, direct: bool, canceled: bool) {
        let bucket = match (direct, canceled) {
            (true, true) => &self.replication_canceled_count,
            (true, false) => &self.replication_error_count,
            (false, true) => &self.recovery_canceled_count,
            (false, false) => &self.recovery_error_count,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            replicator_count: self.replicator_count.load(Ordering::Relaxed),
            replication_count: self.replication_count.load(Ordering::Relaxed),
            recovery_count: self.recovery_count.load(Ordering::Relaxed),
            replication_error_count: self.replication_error_count.load(Ordering::Relaxed),
            replication_canceled_count: self.replication_canceled_count.load(Ordering::Relaxed),
            recovery_error_count: self.recovery_error_count.load(Ordering::Relaxed),
            recovery_canceled_count: self.recovery_canceled_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_buckets() {
        let c = Counters::default();
        c.count_terminal(true, false);
        c.count_terminal(true, true);
        c.count_terminal(false, false);
        c.count_terminal(false, false);
        c.count_terminal(false, true);
        let s = c.snapshot();
        assert_eq!(s.replication_error_count, 1);
        assert_eq!(s.replication_canceled_count, 1);
        assert_eq!(s.recovery_error_count, 2);
        assert_eq!(s.recovery_canceled_count, 1);
    }

    #[test]
    fn test_replicator_count_returns_to_zero() {
        let c = Counters::default();
        c.replicator_started();
        c.replicator_started();
        c.replicator_finished();
        c.replicator_finished();
        assert_eq!(c.snapshot().replicator_count, 0);
    }
}
