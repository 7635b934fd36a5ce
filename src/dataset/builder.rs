//! Assemble a complete dataset image in RAM.
//!
//! Used for the compiled-in default dataset and by host tools and tests.
//! Section placement comes from [`DatasetLayout`], the same code that lays
//! out an image announced over the air.

use alloc::vec;
use alloc::vec::Vec;

use bytemuck::Pod;
use thiserror::Error;

use super::header::{BlobRef, TableRef, HEADER_SIZE};
use super::layout::{DatasetLayout, DatasetShape};
use super::records::{Behavior, Keyframe, RgbKeyframe, RgbTrack, Rule, Track};

/// A section does not fit the 16-bit counts of the wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("section {0} too large")]
pub struct BuildError(pub &'static str);

#[derive(Default)]
struct BlobSection {
    offsets: Vec<u16>,
    bytes: Vec<u8>,
}

impl BlobSection {
    fn push(&mut self, record: &[u8]) {
        self.offsets.push(self.bytes.len() as u16);
        self.bytes.extend_from_slice(record);
    }
}

/// Collects records, then lays them out into header + payload.
#[derive(Default)]
pub struct DatasetBuilder {
    palette: Vec<u8>,
    rgb_keyframes: Vec<RgbKeyframe>,
    rgb_tracks: Vec<RgbTrack>,
    keyframes: Vec<Keyframe>,
    tracks: Vec<Track>,
    animations: BlobSection,
    conditions: BlobSection,
    actions: BlobSection,
    rules: Vec<Rule>,
    behaviors: Vec<Behavior>,
    heat_track_index: u16,
}

fn count(name: &'static str, n: usize) -> Result<u16, BuildError> {
    u16::try_from(n).map_err(|_| BuildError(name))
}

fn put_table<T: Pod>(payload: &mut [u8], table: &TableRef, records: &[T]) {
    let bytes: &[u8] = bytemuck::cast_slice(records);
    let at = table.offset as usize;
    payload[at..at + bytes.len()].copy_from_slice(bytes);
}

fn put_blob(payload: &mut [u8], blob: &BlobRef, section: &BlobSection) {
    let mut at = blob.offsets_offset as usize;
    for offset in &section.offsets {
        payload[at..at + 2].copy_from_slice(&offset.to_le_bytes());
        at += 2;
    }
    let at = blob.blob_offset as usize;
    payload[at..at + section.bytes.len()].copy_from_slice(&section.bytes);
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an RGB palette entry. Returns its index.
    pub fn palette_color(&mut self, r: u8, g: u8, b: u8) -> u16 {
        self.palette.extend_from_slice(&[r, g, b]);
        (self.palette.len() / 3 - 1) as u16
    }

    pub fn rgb_keyframe(&mut self, keyframe: RgbKeyframe) -> u16 {
        self.rgb_keyframes.push(keyframe);
        (self.rgb_keyframes.len() - 1) as u16
    }

    pub fn rgb_track(&mut self, track: RgbTrack) -> u16 {
        self.rgb_tracks.push(track);
        (self.rgb_tracks.len() - 1) as u16
    }

    pub fn keyframe(&mut self, keyframe: Keyframe) -> u16 {
        self.keyframes.push(keyframe);
        (self.keyframes.len() - 1) as u16
    }

    pub fn track(&mut self, track: Track) -> u16 {
        self.tracks.push(track);
        (self.tracks.len() - 1) as u16
    }

    pub fn animation(&mut self, record: &[u8]) -> u16 {
        self.animations.push(record);
        (self.animations.offsets.len() - 1) as u16
    }

    pub fn condition(&mut self, record: &[u8]) -> u16 {
        self.conditions.push(record);
        (self.conditions.offsets.len() - 1) as u16
    }

    pub fn action(&mut self, record: &[u8]) -> u16 {
        self.actions.push(record);
        (self.actions.offsets.len() - 1) as u16
    }

    pub fn rule(&mut self, rule: Rule) -> u16 {
        self.rules.push(rule);
        (self.rules.len() - 1) as u16
    }

    pub fn behavior(&mut self, behavior: Behavior) -> u16 {
        self.behaviors.push(behavior);
        (self.behaviors.len() - 1) as u16
    }

    pub fn heat_track(&mut self, index: u16) {
        self.heat_track_index = index;
    }

    /// Counts and sizes of what has been collected.
    pub fn shape(&self) -> Result<DatasetShape, BuildError> {
        Ok(DatasetShape {
            palette_size: count("palette", self.palette.len())?,
            rgb_keyframe_count: count("rgb keyframes", self.rgb_keyframes.len())?,
            rgb_track_count: count("rgb tracks", self.rgb_tracks.len())?,
            keyframe_count: count("keyframes", self.keyframes.len())?,
            track_count: count("tracks", self.tracks.len())?,
            animation_count: count("animations", self.animations.offsets.len())?,
            animation_size: count("animations", self.animations.bytes.len())?,
            condition_count: count("conditions", self.conditions.offsets.len())?,
            condition_size: count("conditions", self.conditions.bytes.len())?,
            action_count: count("actions", self.actions.offsets.len())?,
            action_size: count("actions", self.actions.bytes.len())?,
            rule_count: count("rules", self.rules.len())?,
            behavior_count: count("behaviors", self.behaviors.len())?,
            heat_track_index: self.heat_track_index,
        })
    }

    /// Layout plus payload bytes (header not included).
    pub fn build_parts(&self) -> Result<(DatasetLayout, Vec<u8>), BuildError> {
        let layout = DatasetLayout::from_shape(&self.shape()?);
        let header = &layout.header;
        let mut payload = vec![0u8; layout.payload_size as usize];

        put_table(&mut payload, &header.palette, &self.palette);
        put_table(&mut payload, &header.rgb_keyframes, &self.rgb_keyframes);
        put_table(&mut payload, &header.rgb_tracks, &self.rgb_tracks);
        put_table(&mut payload, &header.keyframes, &self.keyframes);
        put_table(&mut payload, &header.tracks, &self.tracks);
        put_blob(&mut payload, &header.animations, &self.animations);
        put_blob(&mut payload, &header.conditions, &self.conditions);
        put_blob(&mut payload, &header.actions, &self.actions);
        put_table(&mut payload, &header.rules, &self.rules);
        put_table(&mut payload, &header.behaviors, &self.behaviors);

        Ok((layout, payload))
    }

    /// Complete flash image: header followed by payload.
    ///
    /// # Panics
    ///
    /// Panics if a section overflows the wire format; use
    /// [`build_parts`](Self::build_parts) to handle that case.
    pub fn build(&self) -> Vec<u8> {
        let (layout, payload) = match self.build_parts() {
            Ok(parts) => parts,
            Err(e) => panic!("{}", e),
        };
        let mut image = Vec::with_capacity(HEADER_SIZE + payload.len());
        image.extend_from_slice(layout.header.as_bytes());
        image.extend_from_slice(&payload);
        image
    }
}
