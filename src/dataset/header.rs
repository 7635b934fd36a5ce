//! Fixed-size dataset header.
//!
//! The header sits at the dataset base address and locates every section of
//! the payload that follows it. Locations are byte offsets from the payload
//! base, never absolute pointers, so an image stays meaningful wherever the
//! region is mapped.

use core::mem::size_of;

use bytemuck::{Pod, Zeroable};

use super::records::{Behavior, Keyframe, RgbKeyframe, RgbTrack, Rule, Track};
use super::round_up_4;
use crate::config::{DATASET_VALID_KEY, DATASET_VERSION};

/// Size of [`DatasetHeader`] in flash.
pub const HEADER_SIZE: usize = size_of::<DatasetHeader>();

/// A table of fixed-size records.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TableRef {
    /// Offset of the first record from the payload base.
    pub offset: u32,
    /// Record count (byte count for the palette).
    pub count: u16,
    pub reserved: u16,
}

/// A u16 offset table followed by the blob it indexes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BlobRef {
    /// Offset of the u16 offset table from the payload base.
    pub offsets_offset: u32,
    pub count: u16,
    pub reserved: u16,
    /// Offset of the blob from the payload base.
    pub blob_offset: u32,
    /// Blob size in bytes.
    pub blob_size: u32,
}

impl BlobRef {
    /// Bytes taken by the offset table, padding included.
    #[inline]
    pub fn offsets_table_size(&self) -> u32 {
        round_up_4(self.count as u32 * size_of::<u16>() as u32)
    }
}

/// The committed description of a dataset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DatasetHeader {
    pub head_marker: u32,
    pub version: u32,

    pub palette: TableRef,
    pub rgb_keyframes: TableRef,
    pub rgb_tracks: TableRef,
    pub keyframes: TableRef,
    pub tracks: TableRef,

    pub animations: BlobRef,
    pub conditions: BlobRef,
    pub actions: BlobRef,

    pub rules: TableRef,
    pub behaviors: TableRef,

    pub heat_track_index: u16,
    pub reserved: u16,

    pub tail_marker: u32,
}

impl DatasetHeader {
    /// Header with valid markers and no sections.
    pub fn empty() -> Self {
        Self {
            head_marker: DATASET_VALID_KEY,
            version: DATASET_VERSION,
            tail_marker: DATASET_VALID_KEY,
            ..Self::zeroed()
        }
    }

    /// Decode a header from flash bytes (no alignment requirement).
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is not exactly [`HEADER_SIZE`] long.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Markers and version all match.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.head_marker == DATASET_VALID_KEY
            && self.version == DATASET_VERSION
            && self.tail_marker == DATASET_VALID_KEY
    }

    /// Total payload bytes described by this header.
    ///
    /// Saturates at `u32::MAX` for a corrupted header.
    pub fn payload_size(&self) -> u32 {
        let table = |t: &TableRef, element: usize| t.count as u64 * element as u64;
        let blob = |b: &BlobRef| b.offsets_table_size() as u64 + b.blob_size as u64;

        let total = table(&self.palette, size_of::<u8>())
            + table(&self.rgb_keyframes, size_of::<RgbKeyframe>())
            + table(&self.rgb_tracks, size_of::<RgbTrack>())
            + table(&self.keyframes, size_of::<Keyframe>())
            + table(&self.tracks, size_of::<Track>())
            + blob(&self.animations)
            + blob(&self.actions)
            + blob(&self.conditions)
            + table(&self.rules, size_of::<Rule>())
            + table(&self.behaviors, size_of::<Behavior>());
        u32::try_from(total).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 120);
        assert_eq!(HEADER_SIZE % 4, 0);
    }

    #[test]
    fn test_bytes_roundtrip_keeps_markers() {
        let header = DatasetHeader::empty();
        let decoded = DatasetHeader::from_bytes(header.as_bytes());
        assert!(decoded.is_valid());
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_erased_flash_is_invalid() {
        let header = DatasetHeader::from_bytes(&[0xFF; HEADER_SIZE]);
        assert!(!header.is_valid());
    }

    #[test]
    fn test_wrong_version_is_invalid() {
        let header = DatasetHeader {
            version: DATASET_VERSION + 1,
            ..DatasetHeader::empty()
        };
        assert!(!header.is_valid());
    }

    #[test]
    fn test_offsets_table_padding() {
        let blob = BlobRef {
            count: 3,
            ..Default::default()
        };
        assert_eq!(blob.offsets_table_size(), 8);
    }
}
