//! Transfer counters for diagnostics.
//!
//! Updated by the protocol, readable from any task.

use core::sync::atomic::{AtomicU32, Ordering};

/// Session counters since boot.
pub struct TransferStats {
    /// Sessions started (requests accepted).
    opened: AtomicU32,

    /// Sessions finished. Equals `opened` whenever the protocol is idle.
    closed: AtomicU32,

    /// Sessions that committed a valid dataset.
    succeeded: AtomicU32,

    /// Sessions that ended in Finished-Failure.
    failed: AtomicU32,

    /// Default datasets programmed (startup or post-commit).
    self_heals: AtomicU32,
}

impl TransferStats {
    pub const fn new() -> Self {
        Self {
            opened: AtomicU32::new(0),
            closed: AtomicU32::new(0),
            succeeded: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            self_heals: AtomicU32::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_close(&self, success: bool) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.closed.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub(crate) fn record_self_heal(&self) {
        self.self_heals.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::Acquire)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> TransferStatsSnapshot {
        TransferStatsSnapshot {
            opened: self.opened(),
            closed: self.closed(),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            self_heals: self.self_heals.load(Ordering::Relaxed),
        }
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStatsSnapshot {
    pub opened: u32,
    pub closed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub self_heals: u32,
}
