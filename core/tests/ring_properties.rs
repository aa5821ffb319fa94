//! Property tests for the per-signal ring and the thread-level bookkeeping
//! layered on top of it.

use proptest::prelude::*;
use sigcore::process::{spawn_thread, ThreadSignalState};
use sigcore::signal::{SignalNumber, SignalRecord};
use sigcore::signal::ring::{SignalRing, RING_CAPACITY};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

fn record(tag: i32) -> Box<SignalRecord> {
    Box::new(SignalRecord::from_sender(SignalNumber::new(1 + (tag.rem_euclid(31))).unwrap(), tag as u32))
}

proptest! {
    /// For any interleaving of N producers enqueueing distinct records
    /// (within capacity) and one consumer dequeueing after they finish,
    /// the multiset of dequeued records equals the enqueued multiset.
    #[test]
    fn enqueue_dequeue_preserves_multiset(tags in prop::collection::vec(0i32..1000, 1..(RING_CAPACITY - 1))) {
        let ring = Arc::new(SignalRing::new());
        let mut handles = Vec::new();
        for &tag in &tags {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                let _ = ring.enqueue(record(tag));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut seen: HashMap<u32, usize> = HashMap::new();
        while let Some(rec) = ring.dequeue() {
            *seen.entry(rec.sender_pid).or_insert(0) += 1;
        }

        let mut expected: HashMap<u32, usize> = HashMap::new();
        for &tag in &tags {
            *expected.entry(tag as u32).or_insert(0) += 1;
        }
        prop_assert_eq!(seen, expected);
    }

    /// The ring never holds more than C-1 records: the Cth concurrent
    /// enqueue against an already-full ring always fails.
    #[test]
    fn capacity_bound_holds(extra in 0usize..8) {
        let ring = SignalRing::new();
        let mut accepted = 0;
        for i in 0..(RING_CAPACITY + extra) {
            if ring.enqueue(record(i as i32)).is_ok() {
                accepted += 1;
            }
        }
        prop_assert_eq!(accepted, RING_CAPACITY - 1);
        prop_assert_eq!(ring.len(), RING_CAPACITY - 1);
    }
}

/// `has_signal() == 0` implies every per-signal ring for that thread is
/// empty, checked once producers have quiesced.
#[test]
fn has_signal_zero_implies_all_rings_empty() {
    let state = spawn_thread();
    for n in 1..=31 {
        let sig = SignalNumber::new(n).unwrap();
        state.enqueue(Box::new(SignalRecord::from_sender(sig, 0))).unwrap();
    }
    for n in 1..=31 {
        let sig = SignalNumber::new(n).unwrap();
        state.drain(sig);
    }
    assert_eq!(state.has_signal(), 0);
    for n in 1..=31 {
        let sig = SignalNumber::new(n).unwrap();
        assert!(state.ring(sig).is_empty());
    }
}

/// SIGKILL and SIGSTOP can never end up masked, regardless of what a
/// caller tries to feed into the mask.
#[test]
fn sigkill_and_sigstop_are_never_maskable() {
    let state = Arc::new(ThreadSignalState::new(sigcore::process::alloc_tid()));
    let everything = sigcore::signal::SigSet::full();
    state.change_mask(sigcore::process::MaskHow::Set, everything);

    let kill = SignalNumber::new(9).unwrap();
    let stop = SignalNumber::new(19).unwrap();
    assert!(!state.is_masked(kill));
    assert!(!state.is_masked(stop));
}
