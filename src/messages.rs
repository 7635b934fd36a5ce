//! BLE messages handled by the dataset transfer.
//!
//! Every message starts with a one-byte type. Control messages (Ack,
//! Finished) are the type byte alone. The TransferAnimSet request carries
//! the dataset shape as 14 little-endian u16 fields.

use embassy_sync::blocking_mutex::raw::RawMutex;
use thiserror::Error;

use crate::dataset::DatasetShape;
use crate::queue::MessageQueue;

/// Message type identifiers shared with the app.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// App → die: announce a new dataset.
    TransferAnimSet = 9,
    /// Die → app: flash erased, start streaming the payload.
    TransferAnimSetAck = 10,
    /// Die → app: session over (success or failure).
    TransferAnimSetFinished = 11,
}

impl MessageType {
    /// Convert from raw u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            9 => Some(Self::TransferAnimSet),
            10 => Some(Self::TransferAnimSetAck),
            11 => Some(Self::TransferAnimSetFinished),
            _ => None,
        }
    }
}

/// Number of u16 fields in a TransferAnimSet request.
const TRANSFER_ANIM_SET_FIELDS: usize = 14;

/// Encoded size of a TransferAnimSet request.
pub const TRANSFER_ANIM_SET_SIZE: usize = 1 + TRANSFER_ANIM_SET_FIELDS * 2;

/// Inbound message that could not be decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MessageError {
    /// M01: Zero-length message
    #[error("M01: empty message")]
    Empty,
    /// M02: Type byte not handled here
    #[error("M02: unknown message type {0}")]
    UnknownType(u8),
    /// M03: Shorter than its type requires
    #[error("M03: message truncated ({got} of {expected} bytes)")]
    Truncated { expected: usize, got: usize },
}

impl MessageError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty => "M01",
            Self::UnknownType(_) => "M02",
            Self::Truncated { .. } => "M03",
        }
    }
}

/// Read the type byte.
pub fn message_type(bytes: &[u8]) -> Result<MessageType, MessageError> {
    let first = *bytes.first().ok_or(MessageError::Empty)?;
    MessageType::from_u8(first).ok_or(MessageError::UnknownType(first))
}

/// Decode a TransferAnimSet request. Trailing bytes are ignored.
pub fn decode_transfer_anim_set(bytes: &[u8]) -> Result<DatasetShape, MessageError> {
    match message_type(bytes)? {
        MessageType::TransferAnimSet => {}
        other => return Err(MessageError::UnknownType(other as u8)),
    }
    if bytes.len() < TRANSFER_ANIM_SET_SIZE {
        return Err(MessageError::Truncated {
            expected: TRANSFER_ANIM_SET_SIZE,
            got: bytes.len(),
        });
    }

    let mut fields = [0u16; TRANSFER_ANIM_SET_FIELDS];
    for (field, pair) in fields.iter_mut().zip(bytes[1..].chunks_exact(2)) {
        *field = u16::from_le_bytes([pair[0], pair[1]]);
    }
    let [
        palette_size,
        rgb_keyframe_count,
        rgb_track_count,
        keyframe_count,
        track_count,
        animation_count,
        animation_size,
        condition_count,
        condition_size,
        action_count,
        action_size,
        rule_count,
        behavior_count,
        heat_track_index,
    ] = fields;

    Ok(DatasetShape {
        palette_size,
        rgb_keyframe_count,
        rgb_track_count,
        keyframe_count,
        track_count,
        animation_count,
        animation_size,
        condition_count,
        condition_size,
        action_count,
        action_size,
        rule_count,
        behavior_count,
        heat_track_index,
    })
}

/// Encode a TransferAnimSet request (app side, host tools and tests).
pub fn encode_transfer_anim_set(shape: &DatasetShape) -> [u8; TRANSFER_ANIM_SET_SIZE] {
    let fields = [
        shape.palette_size,
        shape.rgb_keyframe_count,
        shape.rgb_track_count,
        shape.keyframe_count,
        shape.track_count,
        shape.animation_count,
        shape.animation_size,
        shape.condition_count,
        shape.condition_size,
        shape.action_count,
        shape.action_size,
        shape.rule_count,
        shape.behavior_count,
        shape.heat_track_index,
    ];
    let mut out = [0u8; TRANSFER_ANIM_SET_SIZE];
    out[0] = MessageType::TransferAnimSet as u8;
    for (pair, field) in out[1..].chunks_exact_mut(2).zip(fields) {
        pair.copy_from_slice(&field.to_le_bytes());
    }
    out
}

/// Sink for outbound messages.
///
/// Never blocks: returns `false` when the message could not be queued.
pub trait Outbox {
    fn send(&self, message: &[u8]) -> bool;

    /// Send a type-only control message.
    fn send_control(&self, kind: MessageType) -> bool {
        self.send(&[kind as u8])
    }
}

impl<const N: usize, R: RawMutex> Outbox for MessageQueue<N, R> {
    #[inline]
    fn send(&self, message: &[u8]) -> bool {
        self.enqueue(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_field_order() {
        let mut bytes = [0u8; TRANSFER_ANIM_SET_SIZE];
        bytes[0] = MessageType::TransferAnimSet as u8;
        for i in 0..TRANSFER_ANIM_SET_FIELDS {
            bytes[1 + i * 2] = i as u8 + 1;
        }
        let shape = decode_transfer_anim_set(&bytes).unwrap();
        assert_eq!(shape.palette_size, 1);
        assert_eq!(shape.animation_size, 7);
        assert_eq!(shape.heat_track_index, 14);
        assert_eq!(encode_transfer_anim_set(&shape), bytes);
    }

    #[test]
    fn test_truncated_request() {
        let bytes = [MessageType::TransferAnimSet as u8, 0, 0];
        assert_eq!(
            decode_transfer_anim_set(&bytes),
            Err(MessageError::Truncated {
                expected: TRANSFER_ANIM_SET_SIZE,
                got: 3
            })
        );
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(message_type(&[]), Err(MessageError::Empty));
        assert_eq!(message_type(&[200]), Err(MessageError::UnknownType(200)));
        assert_eq!(MessageError::Empty.code(), "M01");
    }

    #[test]
    fn test_control_message_through_queue() {
        let queue: MessageQueue<64> = MessageQueue::new();
        assert!(queue.send_control(MessageType::TransferAnimSetAck));
        assert_eq!(queue.peek_next(|m| m.to_vec()), Some(vec![10]));
    }
}
