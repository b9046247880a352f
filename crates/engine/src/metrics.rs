use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking engine outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct WardenMetrics {
    /// Restrictions written to the ledger.
    pub issued: AtomicU64,
    /// Records deactivated by explicit lifts.
    pub lifted: AtomicU64,
    /// Issuances refused because the actor's quota was used up.
    pub quota_exhausted: AtomicU64,
    /// Quota units handed back after a failed issuance.
    pub refunded: AtomicU64,
    /// Storage calls that failed or timed out.
    pub storage_errors: AtomicU64,
    /// Completed bulk counter resets.
    pub resets: AtomicU64,
}

impl WardenMetrics {
    pub fn increment_issued(&self) {
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_lifted(&self, count: u64) {
        self.lifted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_quota_exhausted(&self) {
        self.quota_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refunded(&self) {
        self.refunded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_storage_errors(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_resets(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            issued: self.issued.load(Ordering::Relaxed),
            lifted: self.lifted.load(Ordering::Relaxed),
            quota_exhausted: self.quota_exhausted.load(Ordering::Relaxed),
            refunded: self.refunded.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`WardenMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub issued: u64,
    pub lifted: u64,
    pub quota_exhausted: u64,
    pub refunded: u64,
    pub storage_errors: u64,
    pub resets: u64,
}
