//! Section placement for a new dataset.
//!
//! Sections are laid out back to back in canonical order starting at payload
//! offset 0. Offset tables are padded to a multiple of 4 bytes before their
//! blob begins. Record sizes are such that this matches the read side's
//! `DatasetHeader::payload_size` exactly.

use core::mem::size_of;

use super::header::{BlobRef, DatasetHeader, TableRef};
use super::records::{Behavior, Keyframe, RgbKeyframe, RgbTrack, Rule, Track};
use super::round_up_4;

/// Counts and blob sizes of every section, as announced by the app.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DatasetShape {
    /// Palette size in bytes (3 per color).
    pub palette_size: u16,
    pub rgb_keyframe_count: u16,
    pub rgb_track_count: u16,
    pub keyframe_count: u16,
    pub track_count: u16,
    pub animation_count: u16,
    /// Animation blob size in bytes.
    pub animation_size: u16,
    pub condition_count: u16,
    pub condition_size: u16,
    pub action_count: u16,
    pub action_size: u16,
    pub rule_count: u16,
    pub behavior_count: u16,
    pub heat_track_index: u16,
}

/// Header with every offset resolved plus the payload size it describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatasetLayout {
    pub header: DatasetHeader,
    pub payload_size: u32,
}

struct Cursor(u32);

impl Cursor {
    fn table(&mut self, count: u16, element_size: usize) -> TableRef {
        let table = TableRef {
            offset: self.0,
            count,
            reserved: 0,
        };
        self.0 += count as u32 * element_size as u32;
        table
    }

    fn blob(&mut self, count: u16, blob_size: u16) -> BlobRef {
        let offsets_offset = self.0;
        self.0 += round_up_4(count as u32 * size_of::<u16>() as u32);
        let blob_offset = self.0;
        self.0 += blob_size as u32;
        BlobRef {
            offsets_offset,
            count,
            reserved: 0,
            blob_offset,
            blob_size: blob_size as u32,
        }
    }
}

impl DatasetLayout {
    /// Place every section of `shape` and build the header to commit.
    pub fn from_shape(shape: &DatasetShape) -> Self {
        let mut cursor = Cursor(0);

        let palette = cursor.table(shape.palette_size, size_of::<u8>());
        let rgb_keyframes = cursor.table(shape.rgb_keyframe_count, size_of::<RgbKeyframe>());
        let rgb_tracks = cursor.table(shape.rgb_track_count, size_of::<RgbTrack>());
        let keyframes = cursor.table(shape.keyframe_count, size_of::<Keyframe>());
        let tracks = cursor.table(shape.track_count, size_of::<Track>());
        let animations = cursor.blob(shape.animation_count, shape.animation_size);
        let conditions = cursor.blob(shape.condition_count, shape.condition_size);
        let actions = cursor.blob(shape.action_count, shape.action_size);
        let rules = cursor.table(shape.rule_count, size_of::<Rule>());
        let behaviors = cursor.table(shape.behavior_count, size_of::<Behavior>());

        let header = DatasetHeader {
            palette,
            rgb_keyframes,
            rgb_tracks,
            keyframes,
            tracks,
            animations,
            conditions,
            actions,
            rules,
            behaviors,
            heat_track_index: shape.heat_track_index,
            ..DatasetHeader::empty()
        };

        Self {
            header,
            payload_size: cursor.0,
        }
    }

    /// Header plus payload, in bytes.
    #[inline]
    pub fn total_size(&self) -> u32 {
        super::HEADER_SIZE as u32 + self.payload_size
    }

    /// Log each section as `count * element size`.
    pub fn log(&self) {
        let h = &self.header;
        log::debug!("Palette: {} * {}", h.palette.count, size_of::<u8>());
        log::debug!("RGB Keyframes: {} * {}", h.rgb_keyframes.count, size_of::<RgbKeyframe>());
        log::debug!("RGB Tracks: {} * {}", h.rgb_tracks.count, size_of::<RgbTrack>());
        log::debug!("Keyframes: {} * {}", h.keyframes.count, size_of::<Keyframe>());
        log::debug!("Tracks: {} * {}", h.tracks.count, size_of::<Track>());
        log::debug!("Animation Offsets: {} * {}", h.animations.count, size_of::<u16>());
        log::debug!("Animations: {}", h.animations.blob_size);
        log::debug!("Condition Offsets: {} * {}", h.conditions.count, size_of::<u16>());
        log::debug!("Conditions: {}", h.conditions.blob_size);
        log::debug!("Action Offsets: {} * {}", h.actions.count, size_of::<u16>());
        log::debug!("Actions: {}", h.actions.blob_size);
        log::debug!("Rules: {} * {}", h.rules.count, size_of::<Rule>());
        log::debug!("Behaviors: {} * {}", h.behaviors.count, size_of::<Behavior>());
    }
}

impl DatasetHeader {
    /// Counts and sizes described by this header.
    pub fn shape(&self) -> DatasetShape {
        DatasetShape {
            palette_size: self.palette.count,
            rgb_keyframe_count: self.rgb_keyframes.count,
            rgb_track_count: self.rgb_tracks.count,
            keyframe_count: self.keyframes.count,
            track_count: self.tracks.count,
            animation_count: self.animations.count,
            animation_size: self.animations.blob_size as u16,
            condition_count: self.conditions.count,
            condition_size: self.conditions.blob_size as u16,
            action_count: self.actions.count,
            action_size: self.actions.blob_size as u16,
            rule_count: self.rules.count,
            behavior_count: self.behaviors.count,
            heat_track_index: self.heat_track_index,
        }
    }
}
