//! # die-firmware
//!
//! Dataset storage and over-the-air dataset transfer for a connected die.
//!
//! ## Architecture
//!
//! - [`queue::MessageQueue`]: interrupt-safe ring buffer of outbound BLE messages
//! - [`dataset::DatasetStore`]: the animation/behavior dataset in flash, read in place
//! - [`transfer::TransferProtocol`]: erase, stream, commit and validate a new dataset
//! - [`flash::FlashDriver`]: asynchronous erase/write contract, with a RAM part for host
//!
//! The transfer protocol is the only writer of the dataset region. Readers
//! register a programming listener and stop using the dataset between
//! `Begin` and `End`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod dataset;
pub mod flash;
pub mod hal;
pub mod messages;
pub mod queue;
pub mod transfer;

pub use config::FirmwareConfig;
pub use dataset::{DatasetStore, DatasetView};
pub use flash::{FlashDriver, FlashError, RamFlash};
pub use messages::{MessageType, Outbox};
pub use queue::{MessageQueue, OutboundQueue};
pub use transfer::{ProgrammingEvent, TransferError, TransferOutcome, TransferProtocol};

/// Firmware version string stamped by the build script.
pub const VERSION: &str = env!("VERSION_STRING");
