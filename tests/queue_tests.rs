//! Message queue tests

use std::collections::VecDeque;

use die_firmware::queue::{compute_stride, MessageQueue};
use proptest::prelude::*;

fn pop<const N: usize>(queue: &MessageQueue<N>) -> Option<Vec<u8>> {
    let msg = queue.peek_next(|m| m.to_vec());
    if msg.is_some() {
        assert!(queue.dequeue());
    }
    msg
}

#[test]
fn test_fill_reject_then_wrap() {
    let queue: MessageQueue<64> = MessageQueue::new();

    assert!(queue.enqueue(b"message 01"));
    assert!(queue.enqueue(b"message 02"));
    assert!(queue.enqueue(b"message 03"));
    assert!(!queue.enqueue(b"message 04"));
    assert_eq!(queue.len(), 3);

    assert_eq!(pop(&queue).as_deref(), Some(&b"message 01"[..]));
    assert!(queue.enqueue(b"message 04"));

    assert_eq!(pop(&queue).as_deref(), Some(&b"message 02"[..]));
    assert_eq!(pop(&queue).as_deref(), Some(&b"message 03"[..]));
    assert_eq!(pop(&queue).as_deref(), Some(&b"message 04"[..]));
    assert!(queue.is_empty());
}

#[test]
fn test_outbound_queue_size() {
    let queue = die_firmware::OutboundQueue::new();
    assert_eq!(queue.capacity(), 1024);
    assert!(queue.enqueue(&[0u8; 1016]));
    assert!(!queue.enqueue(&[0u8; 1]));
}

#[test]
fn test_dropped_counter() {
    let queue: MessageQueue<16> = MessageQueue::new();
    assert!(queue.enqueue(&[1; 8]));
    assert!(!queue.enqueue(&[2; 1]));
    assert!(!queue.enqueue(&[]));
    assert_eq!(queue.dropped(), 2);
    queue.reset_dropped();
    assert_eq!(queue.dropped(), 0);
}

#[derive(Clone, Debug)]
enum Op {
    Enqueue(Vec<u8>),
    Dequeue,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::collection::vec(any::<u8>(), 1..48).prop_map(Op::Enqueue),
        2 => Just(Op::Dequeue),
    ]
}

proptest! {
    #[test]
    fn prop_queue_matches_fifo_model(ops in prop::collection::vec(op(), 1..200)) {
        let queue: MessageQueue<128> = MessageQueue::new();
        let mut model: VecDeque<Vec<u8>> = VecDeque::new();

        for op in ops {
            match op {
                Op::Enqueue(payload) => {
                    let len = queue.len();
                    let used = queue.used_bytes();
                    if queue.enqueue(&payload) {
                        model.push_back(payload);
                    } else {
                        prop_assert_eq!(queue.len(), len);
                        prop_assert_eq!(queue.used_bytes(), used);
                    }
                }
                Op::Dequeue => {
                    let got = pop(&queue);
                    prop_assert_eq!(got, model.pop_front());
                }
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert!(queue.used_bytes() <= queue.capacity());
            let payload_bytes: usize = model.iter().map(|m| compute_stride(m.len())).sum();
            prop_assert!(payload_bytes <= queue.used_bytes());
        }

        while let Some(expected) = model.pop_front() {
            prop_assert_eq!(pop(&queue), Some(expected));
        }
        prop_assert!(queue.is_empty());
    }

    #[test]
    fn prop_single_message_always_fits_empty_queue(len in 1usize..=56) {
        let queue: MessageQueue<64> = MessageQueue::new();
        prop_assert!(queue.enqueue(&vec![0xA5; len]));
        prop_assert_eq!(pop(&queue), Some(vec![0xA5; len]));
    }
}
