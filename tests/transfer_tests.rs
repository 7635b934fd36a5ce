//! Dataset transfer protocol tests
//!
//! Flash is a `RamFlash`: unless deferred, every operation completes on the
//! next poll, so each `poll()` call advances the protocol by exactly one
//! flash step.

use std::cell::RefCell;

use die_firmware::config::FirmwareConfig;
use die_firmware::dataset::records::{Behavior, RgbKeyframe, RgbTrack, Rule};
use die_firmware::dataset::{compute_hash, default_dataset, DatasetBuilder, DatasetStore};
use die_firmware::flash::{FlashError, FlashOp, RamFlash};
use die_firmware::messages::{encode_transfer_anim_set, MessageType};
use die_firmware::queue::MessageQueue;
use die_firmware::transfer::{
    ListenerError, ProgrammingEvent, TransferError, TransferOutcome, TransferPhase,
    TransferProtocol,
};

const CONFIG: FirmwareConfig = FirmwareConfig {
    dataset_base: 0x400,
    dataset_region_size: 0x800,
    flash_page_size: 0x100,
};

const ACK: u8 = MessageType::TransferAnimSetAck as u8;
const FINISHED: u8 = MessageType::TransferAnimSetFinished as u8;

type Queue = MessageQueue<256>;

thread_local! {
    static EVENTS: RefCell<Vec<(usize, ProgrammingEvent)>> = const { RefCell::new(Vec::new()) };
}

fn record_event(token: usize, event: ProgrammingEvent) {
    EVENTS.with(|e| e.borrow_mut().push((token, event)));
}

fn ignore_event(_token: usize, _event: ProgrammingEvent) {}

fn events() -> Vec<(usize, ProgrammingEvent)> {
    EVENTS.with(|e| e.borrow().clone())
}

fn store() -> DatasetStore<RamFlash> {
    DatasetStore::new(RamFlash::new(0x100, 16), CONFIG).unwrap()
}

fn sent(queue: &Queue) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(kind) = queue.peek_next(|m| m[0]) {
        assert!(queue.dequeue());
        out.push(kind);
    }
    out
}

fn sample() -> DatasetBuilder {
    let mut b = DatasetBuilder::new();
    let red = b.palette_color(255, 0, 0) as u8;
    let blue = b.palette_color(0, 0, 255) as u8;
    b.rgb_keyframe(RgbKeyframe::new(0, red));
    b.rgb_keyframe(RgbKeyframe::new(640, blue));
    b.rgb_track(RgbTrack {
        keyframes_offset: 0,
        keyframe_count: 2,
        padding: 0,
        led_mask: 0xF,
    });
    b.animation(&[1, 0, 0x80, 0x02, 0, 0, 0, 1, 0, 0, 0]);
    b.condition(&[1, 1]);
    b.action(&[1, 0, 0xFF, 1]);
    b.rule(Rule {
        condition: 0,
        action_offset: 0,
        action_count: 1,
        padding: 0,
    });
    b.behavior(Behavior {
        rules_offset: 0,
        rule_count: 1,
    });
    b
}

/// Announce `builder`'s dataset and get through the erase.
fn open_session(
    protocol: &mut TransferProtocol<'_, Queue>,
    store: &mut DatasetStore<RamFlash>,
    builder: &DatasetBuilder,
) {
    let request = encode_transfer_anim_set(&builder.shape().unwrap());
    protocol.handle_message(store, &request).unwrap();
    assert_eq!(protocol.phase(), TransferPhase::Erasing);
    protocol.poll(store);
}

/// Stream `payload` in `chunk`-byte pieces, polling after each.
fn stream(
    protocol: &mut TransferProtocol<'_, Queue>,
    store: &mut DatasetStore<RamFlash>,
    payload: &[u8],
    chunk: usize,
) {
    for (i, piece) in payload.chunks(chunk).enumerate() {
        protocol.on_payload_chunk(store, (i * chunk) as u32, piece).unwrap();
        protocol.poll(store);
    }
}

fn header_writes(store: &DatasetStore<RamFlash>) -> usize {
    store
        .flash()
        .ops()
        .iter()
        .filter(|op| matches!(op, FlashOp::Write { address, .. } if *address == CONFIG.dataset_base))
        .count()
}

#[test]
fn test_successful_transfer() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);
    protocol.register_listener(7, record_event).unwrap();

    let builder = sample();
    let (layout, payload) = builder.build_parts().unwrap();

    open_session(&mut protocol, &mut store, &builder);
    assert_eq!(protocol.phase(), TransferPhase::StreamingPayload);
    assert_eq!(sent(&queue), vec![ACK]);

    stream(&mut protocol, &mut store, &payload, 16);
    assert_eq!(protocol.phase(), TransferPhase::WritingHeader);
    protocol.poll(&mut store);

    assert_eq!(protocol.phase(), TransferPhase::Idle);
    assert!(!protocol.has_session());
    assert_eq!(sent(&queue), vec![FINISHED]);
    assert_eq!(
        events(),
        vec![
            (7, ProgrammingEvent::Begin),
            (7, ProgrammingEvent::End(TransferOutcome::Committed))
        ]
    );

    assert!(store.check_valid());
    assert_eq!(store.header(), layout.header);
    assert_eq!(store.data().payload(), &payload[..]);
    assert_eq!(store.size(), layout.payload_size);
    assert_eq!(store.hash(), compute_hash(&payload));

    // Erase covers header + payload, rounded to pages
    assert_eq!(
        store.flash().ops()[0],
        FlashOp::Erase {
            address: CONFIG.dataset_base,
            pages: (layout.total_size() + 0xFF) / 0x100,
        }
    );
    assert_eq!(header_writes(&store), 1);

    let stats = protocol.stats().snapshot();
    assert_eq!((stats.opened, stats.closed, stats.succeeded), (1, 1, 1));
}

#[test]
fn test_erase_failure_finishes_once() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);
    protocol.register_listener(1, record_event).unwrap();

    store.flash_mut().fail_next_erase();
    open_session(&mut protocol, &mut store, &sample());

    assert_eq!(protocol.phase(), TransferPhase::Idle);
    assert!(!protocol.has_session());
    assert_eq!(sent(&queue), vec![FINISHED]);
    assert!(store
        .flash()
        .ops()
        .iter()
        .all(|op| matches!(op, FlashOp::Erase { .. })));
    assert_eq!(
        events(),
        vec![
            (1, ProgrammingEvent::Begin),
            (1, ProgrammingEvent::End(TransferOutcome::Failed))
        ]
    );

    // Nothing left to drive
    protocol.poll(&mut store);
    assert!(sent(&queue).is_empty());

    let stats = protocol.stats().snapshot();
    assert_eq!((stats.opened, stats.closed, stats.failed), (1, 1, 1));
}

#[test]
fn test_erase_failure_keeps_previous_dataset() {
    let queue = Queue::new();
    let mut store = store();
    let previous = sample().build();
    store.flash_mut().program(CONFIG.dataset_base, &previous).unwrap();
    let mut protocol = TransferProtocol::new(&queue);

    let mut next = sample();
    next.palette_color(1, 2, 3);
    store.flash_mut().fail_next_erase();
    open_session(&mut protocol, &mut store, &next);

    assert!(store.check_valid());
    assert_eq!(store.hash(), compute_hash(&previous[120..]));
}

#[test]
fn test_payload_write_failure() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let builder = sample();
    let (_, payload) = builder.build_parts().unwrap();
    open_session(&mut protocol, &mut store, &builder);
    assert_eq!(sent(&queue), vec![ACK]);

    store.flash_mut().fail_write_after(1);
    protocol.on_payload_chunk(&mut store, 0, &payload[..8]).unwrap();
    protocol.poll(&mut store);
    protocol.on_payload_chunk(&mut store, 8, &payload[8..16]).unwrap();
    protocol.poll(&mut store);

    assert_eq!(protocol.phase(), TransferPhase::Idle);
    assert_eq!(sent(&queue), vec![FINISHED]);
    assert_eq!(header_writes(&store), 0);
    assert!(!store.check_valid());
    assert_eq!((store.size(), store.hash()), (0, 0));

    // Late chunks are refused
    assert_eq!(
        protocol.on_payload_chunk(&mut store, 16, &payload[16..24]),
        Err(TransferError::NotStreaming)
    );
}

#[test]
fn test_header_write_failure() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let builder = sample();
    let (_, payload) = builder.build_parts().unwrap();
    open_session(&mut protocol, &mut store, &builder);

    let chunks = payload.len().div_ceil(32) as u32;
    store.flash_mut().fail_write_after(chunks);
    stream(&mut protocol, &mut store, &payload, 32);
    protocol.poll(&mut store);

    assert_eq!(protocol.phase(), TransferPhase::Idle);
    assert_eq!(sent(&queue), vec![ACK, FINISHED]);
    assert!(!store.check_valid());
    assert_eq!(protocol.stats().snapshot().failed, 1);
}

#[test]
fn test_invalid_commit_restores_defaults() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);
    protocol.register_listener(3, record_event).unwrap();

    let builder = sample();
    let (_, payload) = builder.build_parts().unwrap();
    open_session(&mut protocol, &mut store, &builder);

    let (last, rest) = payload.chunks(16).enumerate().last().map(|(i, c)| (i * 16, c)).unwrap();
    stream(&mut protocol, &mut store, &payload[..last], 16);
    protocol.on_payload_chunk(&mut store, last as u32, rest).unwrap();
    // The header write reports success but never lands
    store.flash_mut().drop_next_write();
    protocol.poll(&mut store);
    protocol.poll(&mut store);
    assert_eq!(protocol.phase(), TransferPhase::SelfHealing);

    while protocol.is_busy() {
        protocol.poll(&mut store);
    }

    let (default_layout, default_payload) = default_dataset().unwrap();
    assert!(store.check_valid());
    assert_eq!(store.header(), default_layout.header);
    assert_eq!(store.data().payload(), &default_payload[..]);
    assert_eq!(store.hash(), compute_hash(&default_payload));
    assert_eq!(sent(&queue), vec![ACK, FINISHED]);
    assert_eq!(
        events().last(),
        Some(&(3, ProgrammingEvent::End(TransferOutcome::RestoredDefaults)))
    );
    assert_eq!(protocol.stats().snapshot().self_heals, 1);
    assert!(!protocol.has_session());
}

#[test]
fn test_request_while_busy_is_rejected() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let builder = sample();
    open_session(&mut protocol, &mut store, &builder);
    let request = encode_transfer_anim_set(&builder.shape().unwrap());
    assert_eq!(
        protocol.handle_message(&mut store, &request),
        Err(TransferError::Busy)
    );
    assert_eq!(protocol.phase(), TransferPhase::StreamingPayload);
    assert_eq!(sent(&queue), vec![ACK]);
    assert_eq!(protocol.stats().opened(), 1);
}

#[test]
fn test_oversized_request_rejected_before_erase() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let mut builder = DatasetBuilder::new();
    builder.action(&[0u8; 0x800]);
    let request = encode_transfer_anim_set(&builder.shape().unwrap());

    assert!(matches!(
        protocol.handle_message(&mut store, &request),
        Err(TransferError::TooLarge { .. })
    ));
    assert!(store.flash().ops().is_empty());
    assert_eq!(sent(&queue), vec![FINISHED]);
    assert!(!protocol.is_busy());
}

#[test]
fn test_chunk_rules() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let builder = sample();
    let request = encode_transfer_anim_set(&builder.shape().unwrap());
    protocol.handle_message(&mut store, &request).unwrap();

    // Erase still pending
    assert_eq!(
        protocol.on_payload_chunk(&mut store, 0, &[0; 4]),
        Err(TransferError::NotStreaming)
    );
    protocol.poll(&mut store);

    protocol.on_payload_chunk(&mut store, 0, &[0; 4]).unwrap();
    assert_eq!(
        protocol.on_payload_chunk(&mut store, 4, &[0; 4]),
        Err(TransferError::Flash(FlashError::Busy))
    );
    protocol.poll(&mut store);
    assert_eq!(protocol.phase(), TransferPhase::StreamingPayload);

    let size = builder.build_parts().unwrap().0.payload_size;
    assert_eq!(
        protocol.on_payload_chunk(&mut store, size, &[0; 1]),
        Err(TransferError::ChunkOutOfRange {
            offset: size,
            len: 1,
            size
        })
    );
    assert_eq!(protocol.phase(), TransferPhase::Idle);
    assert_eq!(sent(&queue), vec![ACK, FINISHED]);
}

#[test]
fn test_aborted_stream() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);
    protocol.register_listener(9, record_event).unwrap();

    open_session(&mut protocol, &mut store, &sample());
    protocol.on_payload_chunk(&mut store, 0, &[0; 8]).unwrap();
    protocol.on_payload_aborted(&mut store);

    // The chunk write is still pending
    assert_eq!(protocol.phase(), TransferPhase::Aborting);
    assert_eq!(sent(&queue), vec![ACK]);
    protocol.poll(&mut store);

    assert!(!protocol.is_busy());
    assert!(!protocol.has_session());
    assert_eq!(sent(&queue), vec![FINISHED]);
    assert_eq!(
        events().last(),
        Some(&(9, ProgrammingEvent::End(TransferOutcome::Failed)))
    );

    // A second abort has nothing to close
    protocol.on_payload_aborted(&mut store);
    assert!(sent(&queue).is_empty());
}

#[test]
fn test_abort_waits_for_slow_write() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let builder = sample();
    open_session(&mut protocol, &mut store, &builder);
    assert_eq!(sent(&queue), vec![ACK]);

    store.flash_mut().defer_completion(1);
    protocol.on_payload_chunk(&mut store, 0, &[0; 8]).unwrap();
    protocol.on_payload_aborted(&mut store);
    assert!(protocol.is_busy());

    // Write still running
    protocol.poll(&mut store);
    assert_eq!(protocol.phase(), TransferPhase::Aborting);
    assert!(sent(&queue).is_empty());

    protocol.poll(&mut store);
    assert_eq!(protocol.phase(), TransferPhase::Idle);
    assert!(!store.flash().is_busy());
    assert_eq!(sent(&queue), vec![FINISHED]);

    // The next transfer goes through
    let (layout, payload) = builder.build_parts().unwrap();
    let request = encode_transfer_anim_set(&builder.shape().unwrap());
    protocol.handle_message(&mut store, &request).unwrap();
    while protocol.phase() == TransferPhase::Erasing {
        protocol.poll(&mut store);
    }
    assert_eq!(protocol.phase(), TransferPhase::StreamingPayload);
    for (i, piece) in payload.chunks(32).enumerate() {
        protocol.on_payload_chunk(&mut store, (i * 32) as u32, piece).unwrap();
        protocol.poll(&mut store);
        protocol.poll(&mut store);
    }
    while protocol.is_busy() {
        protocol.poll(&mut store);
    }
    assert!(store.check_valid());
    assert_eq!(store.header(), layout.header);
    assert_eq!(store.hash(), compute_hash(&payload));
    assert_eq!(sent(&queue), vec![ACK, FINISHED]);
}

#[test]
fn test_resent_chunk_does_not_complete_payload() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let mut builder = sample();
    for i in 0..3 {
        builder.rule(Rule {
            condition: 0,
            action_offset: i,
            action_count: 1,
            padding: 0,
        });
    }
    let (layout, payload) = builder.build_parts().unwrap();
    let half = payload.len() / 2;
    open_session(&mut protocol, &mut store, &builder);

    // First half twice
    stream(&mut protocol, &mut store, &payload[..half], half);
    protocol.on_payload_chunk(&mut store, 0, &payload[..half]).unwrap();
    protocol.poll(&mut store);
    assert_eq!(protocol.phase(), TransferPhase::StreamingPayload);
    assert_eq!(header_writes(&store), 0);

    // Skipping ahead leaves a gap
    let last = payload.len() - 4;
    assert_eq!(
        protocol.on_payload_chunk(&mut store, last as u32, &payload[last..]),
        Err(TransferError::ChunkOutOfOrder {
            offset: last as u32,
            expected: half as u32,
        })
    );
    assert_eq!(protocol.phase(), TransferPhase::StreamingPayload);
    assert!(!store.check_valid());

    // Overlapping resend only writes the new bytes
    let from = half - 4;
    store.flash_mut().clear_ops();
    protocol.on_payload_chunk(&mut store, from as u32, &payload[from..]).unwrap();
    assert_eq!(
        store.flash().ops(),
        &[FlashOp::Write {
            address: CONFIG.payload_base() + half as u32,
            len: (payload.len() - half) as u32,
        }]
    );
    protocol.poll(&mut store);
    protocol.poll(&mut store);

    assert_eq!(protocol.phase(), TransferPhase::Idle);
    assert!(store.check_valid());
    assert_eq!(store.header(), layout.header);
    assert_eq!(store.data().payload(), &payload[..]);
    assert_eq!(sent(&queue), vec![ACK, FINISHED]);
}

#[test]
fn test_empty_dataset_commits_header_only() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    open_session(&mut protocol, &mut store, &DatasetBuilder::new());
    assert_eq!(protocol.phase(), TransferPhase::WritingHeader);
    protocol.poll(&mut store);

    assert!(store.check_valid());
    assert_eq!(store.size(), 0);
    assert_eq!(store.hash(), 5381);
    assert_eq!(sent(&queue), vec![ACK, FINISHED]);
}

#[test]
fn test_ack_dropped_fails_session() {
    let queue: MessageQueue<16> = MessageQueue::new();
    assert!(queue.enqueue(&[0; 8]));
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let request = encode_transfer_anim_set(&sample().shape().unwrap());
    protocol.handle_message(&mut store, &request).unwrap();
    protocol.poll(&mut store);

    assert_eq!(protocol.phase(), TransferPhase::Idle);
    assert_eq!(protocol.stats().snapshot().failed, 1);
    assert!(queue.dropped() >= 1);
}

#[test]
fn test_startup_programs_defaults() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);
    protocol.register_listener(4, record_event).unwrap();

    protocol.start_up(&mut store).unwrap();
    assert_eq!(protocol.phase(), TransferPhase::SelfHealing);
    while protocol.is_busy() {
        protocol.poll(&mut store);
    }

    let (_, payload) = default_dataset().unwrap();
    assert!(store.check_valid());
    assert_eq!(store.hash(), compute_hash(&payload));
    // Boot-time heal is silent
    assert!(sent(&queue).is_empty());
    assert!(events().is_empty());

    // Valid flash: nothing to do
    store.flash_mut().clear_ops();
    protocol.start_up(&mut store).unwrap();
    assert!(!protocol.is_busy());
    assert!(store.flash().ops().is_empty());
}

#[test]
fn test_startup_erase_failure_leaves_invalid() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    store.flash_mut().fail_next_erase();
    protocol.start_up(&mut store).unwrap();
    protocol.poll(&mut store);

    assert!(!protocol.is_busy());
    assert!(!store.check_valid());
    assert_eq!(store.summary().generation(), 1);
}

#[test]
fn test_unknown_message() {
    let queue = Queue::new();
    let mut store = store();
    let mut protocol = TransferProtocol::new(&queue);

    let err = protocol
        .handle_message(&mut store, &[MessageType::TransferAnimSetAck as u8])
        .unwrap_err();
    assert_eq!(err.code(), "T02");
    assert!(protocol.handle_message(&mut store, &[]).is_err());
    assert!(store.flash().ops().is_empty());
}

#[test]
fn test_listener_table() {
    let queue = Queue::new();
    let mut protocol = TransferProtocol::new(&queue);

    protocol.register_listener(1, record_event).unwrap();
    protocol.register_listener(2, ignore_event).unwrap();
    assert_eq!(
        protocol.register_listener(3, ignore_event),
        Err(ListenerError::Full(2))
    );

    assert!(protocol.unregister_listener(ignore_event));
    assert!(protocol.unregister_listener_token(1));
    assert!(protocol.listeners().is_empty());
    assert!(!protocol.unregister_listener(record_event));
}
