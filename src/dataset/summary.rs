//! Cached dataset size and hash.
//!
//! Written only when a transfer session finishes (and at startup), read by
//! any consumer at any time. Readers may see the previous values while a
//! session is in progress.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Lock-free summary of the committed dataset.
pub struct DatasetSummary {
    /// True if the header passed validation at the last refresh.
    valid: AtomicBool,

    /// Payload size in bytes (0 when invalid).
    size: AtomicU32,

    /// Payload hash (0 when invalid).
    hash: AtomicU32,

    /// Number of refreshes since boot.
    generation: AtomicU32,
}

impl DatasetSummary {
    pub const fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            size: AtomicU32::new(0),
            hash: AtomicU32::new(0),
            generation: AtomicU32::new(0),
        }
    }

    /// Publish freshly computed values.
    #[inline]
    pub fn publish(&self, valid: bool, size: u32, hash: u32) {
        self.size.store(size, Ordering::Release);
        self.hash.store(hash, Ordering::Release);
        self.valid.store(valid, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        self.hash.load(Ordering::Acquire)
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Get a snapshot of the current values.
    #[inline]
    pub fn snapshot(&self) -> SummarySnapshot {
        SummarySnapshot {
            valid: self.is_valid(),
            size: self.size(),
            hash: self.hash(),
            generation: self.generation(),
        }
    }
}

impl Default for DatasetSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary values at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SummarySnapshot {
    pub valid: bool,
    pub size: u32,
    pub hash: u32,
    pub generation: u32,
}
