//! Read model of the flash-resident dataset.
//!
//! [`DatasetStore`] owns the flash driver and the cached summary. Consumers
//! get a [`DatasetView`] through [`DatasetStore::data`], which checks the
//! header first: reading a dataset that is not valid is a programmer error
//! and panics, it is not a runtime condition to recover from.

use core::mem::size_of;

use bytemuck::Pod;

use super::header::{BlobRef, DatasetHeader, TableRef, HEADER_SIZE};
use super::records::{
    to_color, Behavior, BlobRecord, Keyframe, RgbKeyframe, RgbTrack, Rule, Track, INVALID_COLOR,
};
use super::summary::DatasetSummary;
use super::compute_hash;
use crate::config::{ConfigError, FirmwareConfig};
use crate::flash::FlashDriver;

/// Single owner of the dataset region.
///
/// Lifecycle: [`new`](Self::new) at boot, replaced in place by the transfer
/// protocol, [`into_flash`](Self::into_flash) to tear down.
pub struct DatasetStore<F: FlashDriver> {
    flash: F,
    config: FirmwareConfig,
    summary: DatasetSummary,
}

impl<F: FlashDriver> DatasetStore<F> {
    /// Wrap `flash`. Does not touch flash content; call
    /// [`refresh_summary`](Self::refresh_summary) or start the transfer
    /// protocol to validate it.
    pub fn new(flash: F, config: FirmwareConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if flash.page_size() != config.flash_page_size {
            return Err(ConfigError::PageSizeMismatch {
                configured: config.flash_page_size,
                flash: flash.page_size(),
            });
        }
        Ok(Self {
            flash,
            config,
            summary: DatasetSummary::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &FirmwareConfig {
        &self.config
    }

    #[inline]
    pub fn flash(&self) -> &F {
        &self.flash
    }

    #[inline]
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Release the flash driver.
    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Header as currently stored, valid or not.
    pub fn header(&self) -> DatasetHeader {
        DatasetHeader::from_bytes(self.flash.read(self.config.dataset_base, HEADER_SIZE))
    }

    /// Markers and version match. No side effects.
    #[inline]
    pub fn check_valid(&self) -> bool {
        self.header().is_valid()
    }

    /// View of a valid dataset, `None` otherwise.
    ///
    /// A header whose payload would run past the dataset region is treated
    /// as not readable.
    pub fn try_data(&self) -> Option<DatasetView<'_>> {
        let header = self.header();
        if !header.is_valid() {
            return None;
        }
        let payload_size = header.payload_size();
        let payload_base = self.config.payload_base();
        if payload_base as u64 + payload_size as u64 > self.config.region_end() as u64 {
            return None;
        }
        Some(DatasetView {
            header,
            payload_base,
            payload: self.flash.read(payload_base, payload_size as usize),
        })
    }

    /// View of the dataset.
    ///
    /// # Panics
    ///
    /// Panics if the dataset is not valid.
    pub fn data(&self) -> DatasetView<'_> {
        match self.try_data() {
            Some(view) => view,
            None => panic!("dataset accessed while invalid"),
        }
    }

    /// Payload size described by the stored header, 0 if invalid.
    pub fn compute_size(&self) -> u32 {
        self.try_data().map_or(0, |view| view.payload.len() as u32)
    }

    /// Hash of the payload bytes (header excluded), 0 if invalid.
    pub fn compute_hash(&self) -> u32 {
        self.try_data().map_or(0, |view| compute_hash(view.payload))
    }

    /// Recompute size and hash from flash and publish them.
    pub fn refresh_summary(&self) {
        let (valid, size, hash) = match self.try_data() {
            Some(view) => (true, view.payload.len() as u32, compute_hash(view.payload)),
            None => (false, 0, 0),
        };
        self.summary.publish(valid, size, hash);
        log::info!("Dataset size=0x{:x}, hash=0x{:08x}", size, hash);
    }

    /// Cached payload size.
    #[inline]
    pub fn size(&self) -> u32 {
        self.summary.size()
    }

    /// Cached payload hash.
    #[inline]
    pub fn hash(&self) -> u32 {
        self.summary.hash()
    }

    #[inline]
    pub fn summary(&self) -> &DatasetSummary {
        &self.summary
    }

    /// Log the stored section sizes (debug aid).
    pub fn log_layout(&self) {
        match self.try_data() {
            Some(view) => super::DatasetLayout {
                header: view.header,
                payload_size: view.payload.len() as u32,
            }
            .log(),
            None => log::warn!("Dataset not valid, no layout to print"),
        }
    }
}

/// Borrowed view of a validated dataset.
///
/// Indexed accessors assert `index < count`. Blob records are located
/// through their offset table only: there is no per-record length.
#[derive(Clone, Copy)]
pub struct DatasetView<'a> {
    header: DatasetHeader,
    payload_base: u32,
    payload: &'a [u8],
}

impl<'a> DatasetView<'a> {
    #[inline]
    pub fn header(&self) -> &DatasetHeader {
        &self.header
    }

    /// Payload bytes, header excluded.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Absolute flash address of a payload offset.
    #[inline]
    pub fn address_of(&self, offset: u32) -> u32 {
        self.payload_base + offset
    }

    fn record<T: Pod>(&self, table: &TableRef, index: usize) -> T {
        assert!(index < table.count as usize, "record index {} out of range", index);
        let start = table.offset as usize + index * size_of::<T>();
        bytemuck::pod_read_unaligned(&self.payload[start..start + size_of::<T>()])
    }

    fn records_from<T: Pod>(&self, table: TableRef, start: usize) -> impl Iterator<Item = T> + 'a {
        assert!(start < table.count as usize, "record index {} out of range", start);
        let payload = self.payload;
        (start..table.count as usize).map(move |i| {
            let at = table.offset as usize + i * size_of::<T>();
            bytemuck::pod_read_unaligned(&payload[at..at + size_of::<T>()])
        })
    }

    fn blob_offset(&self, blob: &BlobRef, index: usize) -> usize {
        let at = blob.offsets_offset as usize + index * size_of::<u16>();
        u16::from_le_bytes([self.payload[at], self.payload[at + 1]]) as usize
    }

    fn blob_record(&self, blob: &BlobRef, index: usize) -> BlobRecord<'a> {
        assert!(index < blob.count as usize, "record index {} out of range", index);
        let base = blob.blob_offset as usize;
        let blob_end = base + blob.blob_size as usize;
        let start = (base + self.blob_offset(blob, index)).min(blob_end);
        let end = if index + 1 < blob.count as usize {
            let next = base + self.blob_offset(blob, index + 1);
            if next >= start { next.min(blob_end) } else { blob_end }
        } else {
            blob_end
        };
        BlobRecord::new(&self.payload[start..end])
    }

    // Palette

    /// Palette size in bytes.
    #[inline]
    pub fn palette_size(&self) -> u16 {
        self.header.palette.count
    }

    /// Color `index` as `0x00RRGGBB`, [`INVALID_COLOR`] past the palette.
    pub fn palette_color(&self, index: u16) -> u32 {
        if index < self.header.palette.count / 3 {
            let at = self.header.palette.offset as usize + index as usize * 3;
            to_color(self.payload[at], self.payload[at + 1], self.payload[at + 2])
        } else {
            INVALID_COLOR
        }
    }

    // RGB animation curves

    #[inline]
    pub fn rgb_keyframe_count(&self) -> u16 {
        self.header.rgb_keyframes.count
    }

    pub fn rgb_keyframe(&self, index: u16) -> RgbKeyframe {
        self.record(&self.header.rgb_keyframes, index as usize)
    }

    #[inline]
    pub fn rgb_track_count(&self) -> u16 {
        self.header.rgb_tracks.count
    }

    pub fn rgb_track(&self, index: u16) -> RgbTrack {
        self.record(&self.header.rgb_tracks, index as usize)
    }

    /// Tracks `start..count`, for animations that own a run of tracks.
    pub fn rgb_tracks_from(&self, start: u16) -> impl Iterator<Item = RgbTrack> + 'a {
        self.records_from(self.header.rgb_tracks, start as usize)
    }

    /// Track used to render the "heat" special color.
    pub fn heat_track(&self) -> RgbTrack {
        self.rgb_track(self.header.heat_track_index)
    }

    // Intensity curves

    #[inline]
    pub fn keyframe_count(&self) -> u16 {
        self.header.keyframes.count
    }

    pub fn keyframe(&self, index: u16) -> Keyframe {
        self.record(&self.header.keyframes, index as usize)
    }

    #[inline]
    pub fn track_count(&self) -> u16 {
        self.header.tracks.count
    }

    pub fn track(&self, index: u16) -> Track {
        self.record(&self.header.tracks, index as usize)
    }

    pub fn tracks_from(&self, start: u16) -> impl Iterator<Item = Track> + 'a {
        self.records_from(self.header.tracks, start as usize)
    }

    // Animations, conditions and actions

    #[inline]
    pub fn animation_count(&self) -> u16 {
        self.header.animations.count
    }

    #[inline]
    pub fn animations_size(&self) -> u32 {
        self.header.animations.blob_size
    }

    pub fn animation(&self, index: u16) -> BlobRecord<'a> {
        self.blob_record(&self.header.animations, index as usize)
    }

    #[inline]
    pub fn condition_count(&self) -> u16 {
        self.header.conditions.count
    }

    #[inline]
    pub fn conditions_size(&self) -> u32 {
        self.header.conditions.blob_size
    }

    pub fn condition(&self, index: u16) -> BlobRecord<'a> {
        self.blob_record(&self.header.conditions, index as usize)
    }

    #[inline]
    pub fn action_count(&self) -> u16 {
        self.header.actions.count
    }

    #[inline]
    pub fn actions_size(&self) -> u32 {
        self.header.actions.blob_size
    }

    pub fn action(&self, index: u16) -> BlobRecord<'a> {
        self.blob_record(&self.header.actions, index as usize)
    }

    // Behaviors

    #[inline]
    pub fn rule_count(&self) -> u16 {
        self.header.rules.count
    }

    pub fn rule(&self, index: u16) -> Rule {
        self.record(&self.header.rules, index as usize)
    }

    #[inline]
    pub fn behavior_count(&self) -> u16 {
        self.header.behaviors.count
    }

    pub fn behavior(&self, index: u16) -> Behavior {
        self.record(&self.header.behaviors, index as usize)
    }
}
