//! Fixed-size records stored in the dataset tables.
//!
//! All records are `#[repr(C)]` without padding so their flash image is
//! exactly their in-memory image (little-endian target). They are read out
//! of flash by copy, since table addresses carry no alignment guarantee.

use bytemuck::{Pod, Zeroable};

/// Keyframe time unit in milliseconds.
pub const KEYFRAME_TIME_UNIT_MS: u16 = 20;

/// Largest keyframe time the 9-bit time field holds (511 units).
pub const KEYFRAME_MAX_TIME_MS: u16 = 0x1FF * KEYFRAME_TIME_UNIT_MS;

/// Time field bits 15..7 for `time_ms`, clamped to [`KEYFRAME_MAX_TIME_MS`].
#[inline]
const fn time_bits(time_ms: u16) -> u16 {
    let time_ms = if time_ms > KEYFRAME_MAX_TIME_MS {
        KEYFRAME_MAX_TIME_MS
    } else {
        time_ms
    };
    (time_ms / KEYFRAME_TIME_UNIT_MS) << 7
}

/// Palette color returned for an index past the palette.
pub const INVALID_COLOR: u32 = 0xFFFF_FFFF;

/// Pack 8-bit channels into `0x00RRGGBB`.
#[inline]
pub const fn to_color(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// Palette-indexed color keyframe.
///
/// Bits 15..7: time in 20 ms units, bits 6..0: palette index.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RgbKeyframe {
    pub time_and_color: u16,
}

impl RgbKeyframe {
    /// Times past [`KEYFRAME_MAX_TIME_MS`] are clamped.
    pub const fn new(time_ms: u16, color_index: u8) -> Self {
        Self {
            time_and_color: time_bits(time_ms) | (color_index as u16 & 0x7F),
        }
    }

    #[inline]
    pub fn time_ms(&self) -> u16 {
        (self.time_and_color >> 7) * KEYFRAME_TIME_UNIT_MS
    }

    #[inline]
    pub fn color_index(&self) -> u8 {
        (self.time_and_color & 0x7F) as u8
    }
}

/// Intensity keyframe.
///
/// Bits 15..7: time in 20 ms units, bits 6..0: intensity / 2.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Keyframe {
    pub time_and_intensity: u16,
}

impl Keyframe {
    /// Times past [`KEYFRAME_MAX_TIME_MS`] are clamped.
    pub const fn new(time_ms: u16, intensity: u8) -> Self {
        Self {
            time_and_intensity: time_bits(time_ms) | (intensity as u16 / 2),
        }
    }

    #[inline]
    pub fn time_ms(&self) -> u16 {
        (self.time_and_intensity >> 7) * KEYFRAME_TIME_UNIT_MS
    }

    #[inline]
    pub fn intensity(&self) -> u8 {
        ((self.time_and_intensity & 0x7F) * 2) as u8
    }
}

/// An animation curve (a run of RGB keyframes) applied to a set of LEDs.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RgbTrack {
    /// Index of the first keyframe in the global RGB keyframe table.
    pub keyframes_offset: u16,
    pub keyframe_count: u8,
    pub padding: u8,
    /// Bit n set: LED n is driven by this track.
    pub led_mask: u32,
}

/// Same shape as [`RgbTrack`], indexing intensity keyframes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Track {
    pub keyframes_offset: u16,
    pub keyframe_count: u8,
    pub padding: u8,
    pub led_mask: u32,
}

macro_rules! impl_led_indices {
    ($ty:ty) => {
        impl $ty {
            /// Write the indices of driven LEDs into `out`, return how many.
            pub fn led_indices(&self, out: &mut [u8]) -> usize {
                let mut n = 0;
                for led in 0..32u8 {
                    if self.led_mask & (1 << led) != 0 && n < out.len() {
                        out[n] = led;
                        n += 1;
                    }
                }
                n
            }
        }
    };
}

impl_led_indices!(RgbTrack);
impl_led_indices!(Track);

/// Condition → actions binding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Rule {
    pub condition: u16,
    pub action_offset: u16,
    pub action_count: u16,
    pub padding: u16,
}

/// A named set of rules.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Behavior {
    pub rules_offset: u16,
    pub rule_count: u16,
}

/// One variable-length record of an offset-addressed blob.
///
/// Byte 0 is the record type, the rest is type specific. The slice runs
/// to the next record (or the blob end), which may include padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobRecord<'a> {
    bytes: &'a [u8],
}

impl<'a> BlobRecord<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Record type tag, 0 for an empty record.
    #[inline]
    pub fn kind(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(0)
    }

    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}
