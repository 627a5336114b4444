//! Lock and transaction counters.
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │       LockMetrics        │   │      TransactionMetrics      │
//! │ - acquisitions           │   │ - commits                    │
//! │ - timeouts               │   │ - rollbacks                  │
//! │ - global_acquisitions    │   │ - forced_rollbacks           │
//! │ - illegal_releases       │   │ - remote_failures            │
//! └──────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! Counters are updated with relaxed atomics; snapshots are not taken
//! atomically across counters.

mod counters;

pub use counters::Counter;

/// Counters maintained by the striped lock manager.
#[derive(Debug)]
pub struct LockMetrics {
    /// Successful single-stripe acquisitions.
    pub acquisitions: Counter,
    /// Acquisitions (single or global) that gave up waiting.
    pub timeouts: Counter,
    /// Successful global acquisitions.
    pub global_acquisitions: Counter,
    /// Releases rejected because the owner did not hold the stripe in that mode.
    pub illegal_releases: Counter,
}

impl Default for LockMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LockMetrics {
    pub const fn new() -> Self {
        Self {
            acquisitions: Counter::new("lock_acquisitions"),
            timeouts: Counter::new("lock_timeouts"),
            global_acquisitions: Counter::new("lock_global_acquisitions"),
            illegal_releases: Counter::new("lock_illegal_releases"),
        }
    }

    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            acquisitions: self.acquisitions.get(),
            timeouts: self.timeouts.get(),
            global_acquisitions: self.global_acquisitions.get(),
            illegal_releases: self.illegal_releases.get(),
        }
    }
}

/// Point-in-time copy of [`LockMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockMetricsSnapshot {
    pub acquisitions: u64,
    pub timeouts: u64,
    pub global_acquisitions: u64,
    pub illegal_releases: u64,
}

impl LockMetricsSnapshot {
    /// Fraction of acquisition attempts that timed out.
    pub fn timeout_rate(&self) -> f64 {
        let attempts = self.acquisitions + self.global_acquisitions + self.timeouts;
        if attempts == 0 {
            0.0
        } else {
            self.timeouts as f64 / attempts as f64
        }
    }
}

/// Counters maintained by the transaction coordinator.
#[derive(Debug)]
pub struct TransactionMetrics {
    pub commits: Counter,
    pub rollbacks: Counter,
    /// Commits turned into rollbacks because the transaction was marked rollback-only.
    pub forced_rollbacks: Counter,
    /// Remote calls that failed either in transit or on the remote node.
    pub remote_failures: Counter,
}

impl Default for TransactionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionMetrics {
    pub const fn new() -> Self {
        Self {
            commits: Counter::new("tx_commits"),
            rollbacks: Counter::new("tx_rollbacks"),
            forced_rollbacks: Counter::new("tx_forced_rollbacks"),
            remote_failures: Counter::new("tx_remote_failures"),
        }
    }

    pub fn snapshot(&self) -> TransactionMetricsSnapshot {
        TransactionMetricsSnapshot {
            commits: self.commits.get(),
            rollbacks: self.rollbacks.get(),
            forced_rollbacks: self.forced_rollbacks.get(),
            remote_failures: self.remote_failures.get(),
        }
    }
}

/// Point-in-time copy of [`TransactionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionMetricsSnapshot {
    pub commits: u64,
    pub rollbacks: u64,
    pub forced_rollbacks: u64,
    pub remote_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_metrics_snapshot() {
        let metrics = LockMetrics::new();
        metrics.acquisitions.inc_by(3);
        metrics.timeouts.inc();

        let snap = metrics.snapshot();
        assert_eq!(snap.acquisitions, 3);
        assert_eq!(snap.timeouts, 1);
        assert!((snap.timeout_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(LockMetricsSnapshot::default().timeout_rate(), 0.0);
    }

    #[test]
    fn test_transaction_metrics_snapshot() {
        let metrics = TransactionMetrics::new();
        metrics.rollbacks.inc();
        metrics.forced_rollbacks.inc();
        assert_eq!(
            metrics.snapshot(),
            TransactionMetricsSnapshot {
                commits: 0,
                rollbacks: 1,
                forced_rollbacks: 1,
                remote_failures: 0,
            }
        );
    }
}
