//! Hardware Abstraction Layer for the die firmware.
//!
//! Thin wrappers around ESP-IDF peripherals.
//! Business logic stays in core modules, HAL is just I/O.

#[cfg(target_os = "espidf")]
pub mod flash;

#[cfg(target_os = "espidf")]
pub use flash::{PartitionError, PartitionFlash};
