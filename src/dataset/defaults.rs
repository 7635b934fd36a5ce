//! Compiled-in fallback dataset.
//!
//! Programmed at boot when flash holds no valid dataset, and after a
//! transfer whose committed header fails validation. It only needs to be
//! enough for the die to show it is alive and to keep the heat track
//! accessor meaningful.

use alloc::vec::Vec;

use super::builder::{BuildError, DatasetBuilder};
use super::layout::DatasetLayout;
use super::records::{Behavior, RgbKeyframe, RgbTrack, Rule};

/// All 20 face LEDs.
const ALL_LEDS: u32 = 0x000F_FFFF;

const ANIMATION_KEYFRAMED: u8 = 1;
const CONDITION_HELLO_GOODBYE: u8 = 1;
const CONDITION_FLAG_HELLO: u8 = 1;
const ACTION_PLAY_ANIMATION: u8 = 1;

/// Keyframed animation record: type, padding, duration, special color,
/// tracks offset, track count, 2 bytes padding.
fn keyframed_animation(duration_ms: u16, tracks_offset: u16, track_count: u16) -> [u8; 11] {
    let mut record = [0u8; 11];
    record[0] = ANIMATION_KEYFRAMED;
    record[2..4].copy_from_slice(&duration_ms.to_le_bytes());
    record[5..7].copy_from_slice(&tracks_offset.to_le_bytes());
    record[7..9].copy_from_slice(&track_count.to_le_bytes());
    record
}

fn builder() -> DatasetBuilder {
    let mut b = DatasetBuilder::new();

    let black = b.palette_color(0, 0, 0) as u8;
    let blue = b.palette_color(0, 0, 255) as u8;
    let red = b.palette_color(255, 0, 0) as u8;

    // Heat track: cold blue to hot red
    let heat_start = b.rgb_keyframe(RgbKeyframe::new(0, blue));
    b.rgb_keyframe(RgbKeyframe::new(1000, red));
    let heat = b.rgb_track(RgbTrack {
        keyframes_offset: heat_start,
        keyframe_count: 2,
        padding: 0,
        led_mask: ALL_LEDS,
    });
    b.heat_track(heat);

    // Hello: short blue flash on all faces
    let flash_start = b.rgb_keyframe(RgbKeyframe::new(0, black));
    b.rgb_keyframe(RgbKeyframe::new(200, blue));
    b.rgb_keyframe(RgbKeyframe::new(400, black));
    let flash = b.rgb_track(RgbTrack {
        keyframes_offset: flash_start,
        keyframe_count: 3,
        padding: 0,
        led_mask: ALL_LEDS,
    });
    let hello = b.animation(&keyframed_animation(400, flash, 1));

    let condition = b.condition(&[CONDITION_HELLO_GOODBYE, CONDITION_FLAG_HELLO]);
    let action = b.action(&[ACTION_PLAY_ANIMATION, hello as u8, 0xFF, 1]);
    let rule = b.rule(Rule {
        condition,
        action_offset: action,
        action_count: 1,
        padding: 0,
    });
    b.behavior(Behavior {
        rules_offset: rule,
        rule_count: 1,
    });

    b
}

/// Layout and payload of the fallback dataset.
pub fn default_dataset() -> Result<(DatasetLayout, Vec<u8>), BuildError> {
    builder().build_parts()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dataset_is_consistent() {
        let (layout, payload) = default_dataset().unwrap();
        assert!(layout.header.is_valid());
        assert_eq!(payload.len() as u32, layout.payload_size);
        assert_eq!(layout.header.payload_size(), layout.payload_size);
        assert_eq!(layout.header.rgb_tracks.count, 2);
        assert_eq!(layout.header.heat_track_index, 0);
    }
}
