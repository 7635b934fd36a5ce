//! RAM-backed flash with NOR semantics.
//!
//! Erase sets bytes to `0xFF`, writes can only clear bits (`old & new`), like
//! the real part. Operations complete on the next
//! [`poll_completion`](FlashDriver::poll_completion), which makes the
//! asynchronous flow of the transfer protocol fully testable on host.
//! [`RamFlash::defer_completion`] holds results back for a number of polls
//! to mimic a part that is still busy.

use alloc::vec;
use alloc::vec::Vec;

use super::{FlashCompletion, FlashDriver, FlashError};

/// Operation recorded by [`RamFlash`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlashOp {
    Erase { address: u32, pages: u32 },
    Write { address: u32, len: u32 },
}

/// Simulated flash part starting at address 0.
pub struct RamFlash {
    memory: Vec<u8>,
    page_size: u32,
    pending: Option<Result<FlashCompletion, FlashError>>,
    ops: Vec<FlashOp>,
    fail_next_erase: bool,
    fail_write_in: Option<u32>,
    drop_next_write: bool,
    /// Polls answered with `None` before each result is released.
    completion_delay: u32,
    polls_left: u32,
}

impl RamFlash {
    /// Create an erased part of `pages` pages.
    pub fn new(page_size: u32, pages: u32) -> Self {
        Self {
            memory: vec![0xFF; (page_size * pages) as usize],
            page_size,
            pending: None,
            ops: Vec::new(),
            fail_next_erase: false,
            fail_write_in: None,
            drop_next_write: false,
            completion_delay: 0,
            polls_left: 0,
        }
    }

    /// Make the next erase report failure (memory untouched).
    pub fn fail_next_erase(&mut self) {
        self.fail_next_erase = true;
    }

    /// Make the next write report failure (memory untouched).
    pub fn fail_next_write(&mut self) {
        self.fail_write_in = Some(0);
    }

    /// Let `n` writes succeed, then fail the one after.
    pub fn fail_write_after(&mut self, n: u32) {
        self.fail_write_in = Some(n);
    }

    /// Make the next write report success without storing anything.
    pub fn drop_next_write(&mut self) {
        self.drop_next_write = true;
    }

    /// Report every later operation as still running for `polls` polls.
    pub fn defer_completion(&mut self, polls: u32) {
        self.completion_delay = polls;
    }

    /// Every erase/write started so far, in order.
    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// True while an operation waits for `poll_completion`.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Program bytes directly, bypassing the async path.
    ///
    /// Used to preload images in tests and host tools.
    pub fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let range = self.range(address, data.len())?;
        for (dst, src) in self.memory[range].iter_mut().zip(data) {
            *dst &= *src;
        }
        Ok(())
    }

    /// Overwrite bytes regardless of NOR rules (fault injection).
    pub fn corrupt(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let range = self.range(address, data.len())?;
        self.memory[range].copy_from_slice(data);
        Ok(())
    }

    /// Whole part contents.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn range(&self, address: u32, len: usize) -> Result<core::ops::Range<usize>, FlashError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.memory.len() => Ok(start..end),
            _ => Err(FlashError::OutOfBounds {
                address,
                len: len as u32,
            }),
        }
    }
}

impl FlashDriver for RamFlash {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read(&self, address: u32, len: usize) -> &[u8] {
        let start = address as usize;
        &self.memory[start..start + len]
    }

    fn begin_erase(&mut self, address: u32, pages: u32) -> Result<(), FlashError> {
        if self.pending.is_some() {
            return Err(FlashError::Busy);
        }
        if address % self.page_size != 0 {
            return Err(FlashError::EraseFailed { address });
        }
        let range = self.range(address, (pages * self.page_size) as usize)?;
        self.ops.push(FlashOp::Erase { address, pages });
        self.polls_left = self.completion_delay;

        if self.fail_next_erase {
            self.fail_next_erase = false;
            self.pending = Some(Err(FlashError::EraseFailed { address }));
        } else {
            self.memory[range].fill(0xFF);
            self.pending = Some(Ok(FlashCompletion::Erased { address, pages }));
        }
        Ok(())
    }

    fn begin_write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.pending.is_some() {
            return Err(FlashError::Busy);
        }
        let range = self.range(address, data.len())?;
        let len = data.len() as u32;
        self.ops.push(FlashOp::Write { address, len });
        self.polls_left = self.completion_delay;

        let fail = match self.fail_write_in {
            Some(0) => {
                self.fail_write_in = None;
                true
            }
            Some(n) => {
                self.fail_write_in = Some(n - 1);
                false
            }
            None => false,
        };

        if fail {
            self.pending = Some(Err(FlashError::WriteFailed { address }));
            return Ok(());
        }
        if self.drop_next_write {
            self.drop_next_write = false;
        } else {
            for (dst, src) in self.memory[range].iter_mut().zip(data) {
                *dst &= *src;
            }
        }
        self.pending = Some(Ok(FlashCompletion::Written { address, len }));
        Ok(())
    }

    fn poll_completion(&mut self) -> Option<Result<FlashCompletion, FlashError>> {
        if self.pending.is_some() && self.polls_left > 0 {
            self.polls_left -= 1;
            return None;
        }
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_then_write() {
        let mut flash = RamFlash::new(256, 4);
        flash.begin_erase(256, 1).unwrap();
        assert!(flash.is_busy());
        assert_eq!(
            flash.poll_completion(),
            Some(Ok(FlashCompletion::Erased { address: 256, pages: 1 }))
        );

        flash.begin_write(256, &[1, 2, 3]).unwrap();
        assert!(flash.poll_completion().unwrap().is_ok());
        assert_eq!(flash.read(256, 4), &[1, 2, 3, 0xFF]);
    }

    #[test]
    fn test_write_only_clears_bits() {
        let mut flash = RamFlash::new(256, 1);
        flash.program(0, &[0b1010_1010]).unwrap();
        flash.program(0, &[0b1100_1100]).unwrap();
        assert_eq!(flash.read(0, 1), &[0b1000_1000]);
    }

    #[test]
    fn test_second_operation_while_busy() {
        let mut flash = RamFlash::new(256, 2);
        flash.begin_erase(0, 1).unwrap();
        assert_eq!(flash.begin_write(0, &[0]), Err(FlashError::Busy));
    }

    #[test]
    fn test_injected_failures() {
        let mut flash = RamFlash::new(256, 2);
        flash.program(0, &[0x00]).unwrap();
        flash.fail_next_erase();
        flash.begin_erase(0, 1).unwrap();
        assert_eq!(
            flash.poll_completion(),
            Some(Err(FlashError::EraseFailed { address: 0 }))
        );
        assert_eq!(flash.read(0, 1), &[0x00]);

        flash.fail_write_after(1);
        flash.begin_write(16, &[0]).unwrap();
        assert!(flash.poll_completion().unwrap().is_ok());
        flash.begin_write(17, &[0]).unwrap();
        assert!(flash.poll_completion().unwrap().is_err());
        assert_eq!(flash.read(17, 1), &[0xFF]);
    }

    #[test]
    fn test_deferred_completion() {
        let mut flash = RamFlash::new(256, 2);
        flash.defer_completion(2);
        flash.begin_write(0, &[0x12]).unwrap();
        assert_eq!(flash.poll_completion(), None);
        assert_eq!(flash.poll_completion(), None);
        assert!(flash.is_busy());
        assert_eq!(flash.begin_erase(0, 1), Err(FlashError::Busy));
        assert!(flash.poll_completion().unwrap().is_ok());
        assert!(!flash.is_busy());
        assert_eq!(flash.poll_completion(), None);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut flash = RamFlash::new(256, 1);
        assert!(matches!(
            flash.begin_write(250, &[0; 8]),
            Err(FlashError::OutOfBounds { .. })
        ));
        assert!(flash.ops().is_empty());
    }
}
