//! Flash driver contract.
//!
//! Erase and write are asynchronous: `begin_*` starts the operation and
//! returns at once, the result is picked up later with
//! [`FlashDriver::poll_completion`]. At most one operation may be in flight;
//! starting another before the first completes is a caller bug.
//!
//! Reads go through the memory-mapped view and never block.

pub mod ram;

pub use ram::{FlashOp, RamFlash};

use thiserror::Error;

/// Flash driver failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum FlashError {
    /// F01: Erase did not complete
    #[error("F01: erase failed at 0x{address:08x}")]
    EraseFailed { address: u32 },
    /// F02: Write did not complete
    #[error("F02: write failed at 0x{address:08x}")]
    WriteFailed { address: u32 },
    /// F03: Address range outside the flash part
    #[error("F03: range 0x{address:08x}+{len} out of bounds")]
    OutOfBounds { address: u32, len: u32 },
    /// F04: Another operation is still pending
    #[error("F04: flash busy")]
    Busy,
}

impl FlashError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::EraseFailed { .. } => "F01",
            Self::WriteFailed { .. } => "F02",
            Self::OutOfBounds { .. } => "F03",
            Self::Busy => "F04",
        }
    }
}

/// Which operation a completion belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashCompletion {
    Erased { address: u32, pages: u32 },
    Written { address: u32, len: u32 },
}

/// Asynchronous erase/write primitives plus a mapped read view.
pub trait FlashDriver {
    /// Erase granularity in bytes.
    fn page_size(&self) -> u32;

    /// Memory-mapped read. Panics if the range is outside the part.
    fn read(&self, address: u32, len: usize) -> &[u8];

    /// Start erasing `pages` pages from the page-aligned `address`.
    fn begin_erase(&mut self, address: u32, pages: u32) -> Result<(), FlashError>;

    /// Start writing `data` at `address`.
    ///
    /// The driver copies `data` (or finishes with it) before returning.
    fn begin_write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Result of the last started operation, once it has finished.
    ///
    /// Returns `None` while it is still running or if nothing was started.
    fn poll_completion(&mut self) -> Option<Result<FlashCompletion, FlashError>>;

    /// Bytes needed to hold `bytes`, rounded up to whole pages.
    #[inline]
    fn flash_byte_size(&self, bytes: u32) -> u32 {
        flash_byte_size(bytes, self.page_size())
    }

    /// Number of pages spanned by `bytes` (rounded up).
    #[inline]
    fn bytes_to_pages(&self, bytes: u32) -> u32 {
        bytes_to_pages(bytes, self.page_size())
    }
}

/// Round `bytes` up to a whole number of `page_size` pages.
#[inline]
pub const fn flash_byte_size(bytes: u32, page_size: u32) -> u32 {
    bytes_to_pages(bytes, page_size) * page_size
}

/// Pages needed for `bytes`.
#[inline]
pub const fn bytes_to_pages(bytes: u32, page_size: u32) -> u32 {
    (bytes + page_size - 1) / page_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(bytes_to_pages(0, 4096), 0);
        assert_eq!(bytes_to_pages(1, 4096), 1);
        assert_eq!(bytes_to_pages(4096, 4096), 1);
        assert_eq!(bytes_to_pages(4097, 4096), 2);
        assert_eq!(flash_byte_size(4097, 4096), 8192);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(FlashError::Busy.code(), "F04");
        assert_eq!(FlashError::EraseFailed { address: 0 }.code(), "F01");
    }
}
