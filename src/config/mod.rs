//! Module: config
//!
//! Purpose: Compile-time firmware configuration.
//!
//! Architecture:
//! - `FirmwareConfig::DEFAULT` is the single source of truth for the flash map
//! - Board code may build its own config and must pass it through `validate()`
//! - Format constants (markers, version) are not configurable: the app relies on them
//!
//! Safety: Plain `Copy` data, freely shared.

use thiserror::Error;

/// Marker stored at both ends of a committed dataset header.
pub const DATASET_VALID_KEY: u32 = 0x600D_F00D;

/// Dataset format version. Bump when any record or header layout changes.
pub const DATASET_VERSION: u32 = 4;

/// Outbound BLE message queue capacity in bytes.
pub const OUTBOUND_QUEUE_SIZE: usize = 1024;

/// Maximum number of programming-event listeners.
pub const MAX_PROGRAMMING_LISTENERS: usize = 2;

/// Flash map and geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirmwareConfig {
    /// Address of the dataset header. Must be page aligned.
    pub dataset_base: u32,

    /// Bytes reserved for header + payload, starting at `dataset_base`.
    pub dataset_region_size: u32,

    /// Erase granularity of the flash part.
    pub flash_page_size: u32,
}

/// Configuration rejected by [`FirmwareConfig::validate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("flash page size must be a non-zero power of two, got {0}")]
    BadPageSize(u32),
    #[error("dataset base 0x{0:08x} is not page aligned")]
    UnalignedBase(u32),
    #[error("dataset region of {0} bytes cannot hold a header")]
    RegionTooSmall(u32),
    #[error("flash driver page size {flash} differs from configured {configured}")]
    PageSizeMismatch { configured: u32, flash: u32 },
}

impl FirmwareConfig {
    /// Layout used by the production board: 16 pages right after the settings page.
    pub const DEFAULT: FirmwareConfig = FirmwareConfig {
        dataset_base: 0x1000,
        dataset_region_size: 16 * 4096,
        flash_page_size: 4096,
    };

    /// Check that the flash map is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flash_page_size == 0 || !self.flash_page_size.is_power_of_two() {
            return Err(ConfigError::BadPageSize(self.flash_page_size));
        }
        if self.dataset_base % self.flash_page_size != 0 {
            return Err(ConfigError::UnalignedBase(self.dataset_base));
        }
        if (self.dataset_region_size as usize) < crate::dataset::HEADER_SIZE {
            return Err(ConfigError::RegionTooSmall(self.dataset_region_size));
        }
        Ok(())
    }

    /// Address of the first payload byte (just past the header).
    #[inline]
    pub const fn payload_base(&self) -> u32 {
        self.dataset_base + crate::dataset::HEADER_SIZE as u32
    }

    /// First address past the dataset region.
    #[inline]
    pub const fn region_end(&self) -> u32 {
        self.dataset_base + self.dataset_region_size
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
