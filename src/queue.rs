//! Interrupt-safe FIFO of variable-length BLE messages.
//!
//! Every outbound radio message, including the dataset transfer's Ack and
//! Finished notifications, is queued here before the radio pump sends it.
//!
//! # Layout
//!
//! ```text
//! [size:u32][stride:u32][payload...pad] [size][stride][payload...] ...
//!  └──────────── stride ─────────────┘
//! ```
//!
//! `stride = round_up_4(8 + size)`. A record with `size == 0` is a wrap
//! filler: it covers the unusable bytes at the physical end of the buffer
//! and tells the reader to continue at offset 0. A tail shorter than the
//! envelope header cannot hold a filler and is skipped implicitly.
//!
//! # Concurrency
//!
//! Application code and radio interrupt handlers share one queue. Every
//! operation runs inside a critical section (`CriticalSectionRawMutex`), so
//! no caller can observe a half-updated buffer. Work inside the critical
//! section is a few index updates plus the payload copy.
//!
//! Nothing here logs: callers in task context read [`MessageQueue::dropped`]
//! and report it.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::blocking_mutex::Mutex;

use crate::config::OUTBOUND_QUEUE_SIZE;

/// Bytes taken by `size` and `stride` in front of every payload.
pub const ENVELOPE_HEADER_SIZE: usize = 8;

/// Queue used for all outbound BLE traffic.
pub type OutboundQueue = MessageQueue<OUTBOUND_QUEUE_SIZE>;

/// Total bytes one message of `payload_size` bytes occupies in the ring.
#[inline]
pub const fn compute_stride(payload_size: usize) -> usize {
    (ENVELOPE_HEADER_SIZE + payload_size + 3) & !3
}

/// Ring state. Only ever touched with the critical section held.
struct QueueState<const N: usize> {
    data: [u8; N],
    count: usize,
    reader: usize,
    writer: usize,
}

impl<const N: usize> QueueState<N> {
    const fn new() -> Self {
        Self {
            data: [0; N],
            count: 0,
            reader: 0,
            writer: 0,
        }
    }

    #[inline]
    fn read_u32(&self, at: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[at..at + 4]);
        u32::from_le_bytes(raw)
    }

    #[inline]
    fn write_envelope(&mut self, at: usize, size: usize, stride: usize) {
        self.data[at..at + 4].copy_from_slice(&(size as u32).to_le_bytes());
        self.data[at + 4..at + 8].copy_from_slice(&(stride as u32).to_le_bytes());
    }

    #[inline]
    fn put(&mut self, at: usize, payload: &[u8], stride: usize) {
        self.write_envelope(at, payload.len(), stride);
        let start = at + ENVELOPE_HEADER_SIZE;
        self.data[start..start + payload.len()].copy_from_slice(payload);
    }

    /// Offset of the oldest record, skipping a wrap filler.
    #[inline]
    fn head(&self) -> usize {
        let r = self.reader;
        if N - r < ENVELOPE_HEADER_SIZE || self.read_u32(r) == 0 {
            0
        } else {
            r
        }
    }

    fn enqueue(&mut self, payload: &[u8]) -> bool {
        // Zero size is reserved for fillers
        if payload.is_empty() {
            return false;
        }
        let stride = compute_stride(payload.len());
        if stride > N {
            return false;
        }
        if self.count == 0 {
            // Nothing unread: restart at the front
            self.reader = 0;
            self.writer = 0;
        }

        if self.count == 0 || self.writer > self.reader {
            // [...RMMMMW...]
            if self.writer + stride <= N {
                let at = self.writer;
                self.put(at, payload, stride);
                self.writer += stride;
                if self.writer == N {
                    self.writer = 0;
                }
                self.count += 1;
                true
            } else if stride <= self.reader {
                // Skip the tail, restart at the front
                let tail = N - self.writer;
                if tail >= ENVELOPE_HEADER_SIZE {
                    let at = self.writer;
                    self.write_envelope(at, 0, tail);
                }
                self.put(0, payload, stride);
                self.writer = stride;
                self.count += 1;
                true
            } else {
                false
            }
        } else if self.reader != self.writer && self.writer + stride <= self.reader {
            // [MMMW...RMMM]
            let at = self.writer;
            self.put(at, payload, stride);
            self.writer += stride;
            self.count += 1;
            true
        } else {
            // [MMMRMMM] with W == R: full
            false
        }
    }

    fn dequeue(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        let at = self.head();
        let stride = self.read_u32(at + 4) as usize;
        self.reader = at + stride;
        if self.reader == N {
            self.reader = 0;
        }
        self.count -= 1;
        true
    }

    fn used_bytes(&self) -> usize {
        if self.count == 0 {
            0
        } else if self.writer > self.reader {
            self.writer - self.reader
        } else {
            N - self.reader + self.writer
        }
    }
}

/// One queued record as seen by [`MessageQueue::debug_dump`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordInfo {
    pub offset: usize,
    pub size: usize,
    pub stride: usize,
}

/// Bounded FIFO of opaque variable-length messages.
///
/// `N` is the ring size in bytes. The queue never grows, never compacts,
/// never overwrites unread data and never blocks: a full queue makes
/// [`enqueue`](Self::enqueue) return `false` and the caller decides whether
/// to drop or retry.
///
/// # Example
///
/// ```
/// use die_firmware::queue::MessageQueue;
///
/// static QUEUE: MessageQueue<64> = MessageQueue::new();
///
/// assert!(QUEUE.enqueue(&[0x08]));
/// let first = QUEUE.peek_next(|msg| msg[0]);
/// assert_eq!(first, Some(0x08));
/// assert!(QUEUE.dequeue());
/// assert!(QUEUE.is_empty());
/// ```
pub struct MessageQueue<const N: usize, R: RawMutex = CriticalSectionRawMutex> {
    state: Mutex<R, RefCell<QueueState<N>>>,
    dropped: AtomicU32,
}

impl<const N: usize, R: RawMutex> MessageQueue<N, R> {
    /// Create an empty queue.
    pub const fn new() -> Self {
        const {
            assert!(N % 4 == 0, "Queue size must be a multiple of 4");
            assert!(N >= ENVELOPE_HEADER_SIZE + 4, "Queue too small for one message");
            assert!(N <= u32::MAX as usize, "Queue size must fit in u32");
        };

        Self {
            state: Mutex::new(RefCell::new(QueueState::new())),
            dropped: AtomicU32::new(0),
        }
    }

    /// Append a message.
    ///
    /// Returns `false` if there is no room (or the payload is empty) and
    /// leaves the queue untouched.
    ///
    /// # Timing
    ///
    /// O(1) bookkeeping plus one copy of `payload`, all inside the critical
    /// section. Safe to call from interrupt context.
    pub fn enqueue(&self, payload: &[u8]) -> bool {
        let ok = self.state.lock(|cell| cell.borrow_mut().enqueue(payload));
        if !ok {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Look at the oldest message without removing it.
    ///
    /// `f` runs with the critical section held: copy the bytes out, don't
    /// do radio work in it.
    pub fn peek_next<T>(&self, f: impl FnOnce(&[u8]) -> T) -> Option<T> {
        self.state.lock(|cell| {
            let state = cell.borrow();
            if state.count == 0 {
                return None;
            }
            let at = state.head();
            let size = state.read_u32(at) as usize;
            let start = at + ENVELOPE_HEADER_SIZE;
            Some(f(&state.data[start..start + size]))
        })
    }

    /// Drop the oldest message. Returns `false` if the queue was empty.
    pub fn dequeue(&self) -> bool {
        self.state.lock(|cell| cell.borrow_mut().dequeue())
    }

    /// Reset to empty. Initialization only: discards queued messages.
    pub fn clear(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.count = 0;
            state.reader = 0;
            state.writer = 0;
        });
    }

    /// Number of queued messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.state.lock(|cell| cell.borrow().count)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring bytes currently unavailable to writers, fillers included.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.state.lock(|cell| cell.borrow().used_bytes())
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Count of rejected enqueues since boot (or the last reset).
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reset_dropped(&self) {
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Log the ring layout. Task context only.
    ///
    /// Records are collected under the critical section (at most 16) and
    /// logged after it is released.
    pub fn debug_dump(&self) {
        let mut records: heapless::Vec<RecordInfo, 16> = heapless::Vec::new();
        let (count, reader, writer) = self.state.lock(|cell| {
            let state = cell.borrow();
            let mut current = state.reader;
            for _ in 0..state.count {
                if N - current < ENVELOPE_HEADER_SIZE || state.read_u32(current) == 0 {
                    current = 0;
                }
                let info = RecordInfo {
                    offset: current,
                    size: state.read_u32(current) as usize,
                    stride: state.read_u32(current + 4) as usize,
                };
                if records.push(info).is_err() {
                    break;
                }
                current += info.stride;
                if current == N {
                    current = 0;
                }
            }
            (state.count, state.reader, state.writer)
        });

        log::debug!("Message queue has {} messages", count);
        log::debug!("Reader: {}, Writer: {}", reader, writer);
        for (i, record) in records.iter().enumerate() {
            log::debug!(
                " [{}] Offset {}, size {}, stride {}",
                i,
                record.offset,
                record.size,
                record.stride
            );
        }
    }
}

impl<const N: usize, R: RawMutex> Default for MessageQueue<N, R> {
    fn default() -> Self {
        Self::new()
    }
}
