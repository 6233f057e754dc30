//! Running counters for one tracker.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct TrackerStats {
    accepted: AtomicU64,
    persisted: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed_flushes: AtomicU64,
}

/// Point-in-time copy of the counters.
///
/// Every accepted payload ends up persisted, rejected, or dropped; every
/// persisted row ends up delivered, evicted, or still pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Payloads `process` returned true for.
    pub accepted: u64,
    /// Rows written to the store.
    pub persisted: u64,
    /// Rows deleted to respect the queue limit.
    pub evicted: u64,
    /// Payloads refused because the queue was full.
    pub rejected: u64,
    /// Payloads lost because the store could not be written.
    pub dropped: u64,
    /// Rows removed after a successful delivery.
    pub delivered: u64,
    pub failed_flushes: u64,
}

impl TrackerStats {
    pub(crate) fn add_accepted(&self, n: usize) {
        self.accepted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_persisted(&self, n: usize) {
        self.persisted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_evicted(&self, n: usize) {
        self.evicted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_rejected(&self, n: usize) {
        self.rejected.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: usize) {
        self.dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_delivered(&self, n: usize) {
        self.delivered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_failed_flush(&self) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
        }
    }
}
