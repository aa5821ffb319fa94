//! Fixed-capacity, lock-free per-signal ring.
//!
//! Uses a tagged-index CAS-with-restore-on-failure approach instead of a
//! spinlock: the producer side has to stay safe to call from a signal
//! upcall, where blocking on a lock held by the very thread the upcall
//! interrupted would deadlock. Enqueue is safe for multiple concurrent
//! producers (a cross-thread send can race with the owning thread's own
//! delivery of a different signal); dequeue has exactly one caller per
//! thread (that thread's own delivery scheduler).

use std::boxed::Box;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use super::types::SignalRecord;

/// Ring capacity. 16 gives standard signals plenty of headroom before the
/// queued-signals-exceeded loss policy kicks in.
pub const RING_CAPACITY: usize = 16;

pub struct SignalRing {
    head: AtomicUsize,
    tail: AtomicUsize,
    slots: [AtomicPtr<SignalRecord>; RING_CAPACITY],
}

impl Default for SignalRing {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRing {
    pub fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            slots: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
        }
    }

    fn wrap(i: usize) -> usize {
        i % RING_CAPACITY
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Reserves a slot and publishes `record`. Returns `Err(record)` if the
    /// ring is full so the caller can free it and log the drop.
    pub fn enqueue(&self, record: Box<SignalRecord>) -> Result<(), Box<SignalRecord>> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);

            // Invariant (ii): (tail+1) mod C == head means full.
            if Self::wrap(tail + 1) == Self::wrap(head) {
                return Err(record);
            }

            if self
                .tail
                .compare_exchange_weak(tail, tail + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let slot = &self.slots[Self::wrap(tail)];
                let raw = Box::into_raw(record);
                slot.store(raw, Ordering::Release);
                return Ok(());
            }
            // Lost the CAS race for the slot reservation; retry. No slot
            // was written, so nothing to roll back.
        }
    }

    /// Dequeues one record, or `None` if the ring is transiently or truly
    /// empty. Rolls back the slot (re-publishes the pointer) if it loses
    /// the head-advance CAS,
    pub fn dequeue(&self) -> Option<Box<SignalRecord>> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            if head == tail {
                return None;
            }

            let slot = &self.slots[Self::wrap(head)];
            let raw = slot.load(Ordering::Acquire);
            if raw.is_null() {
                // Producer reserved the slot via the tail CAS but has not
                // published the pointer yet; treat as transiently empty.
                return None;
            }

            slot.store(ptr::null_mut(), Ordering::Release);

            match self
                .head
                .compare_exchange_weak(head, head + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(unsafe { Box::from_raw(raw) }),
                Err(_) => {
                    // Lost the race with a concurrent fetcher; restore the
                    // slot pointer and retry.
                    slot.store(raw, Ordering::Release);
                }
            }
        }
    }

    /// Drains and frees every remaining record, used when a signal is
    /// being discarded as ignored-while-masked.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while self.dequeue().is_some() {
            count += 1;
        }
        count
    }
}

impl Drop for SignalRing {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}

// SAFETY: the slots only ever hold pointers produced by `Box::into_raw` on
// `SignalRecord`, which is `Send`; the ring's own synchronization makes
// sharing it across threads sound.
unsafe impl Send for SignalRing {}
unsafe impl Sync for SignalRing {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::types::{SigCode, SignalNumber};

    fn record(n: i32) -> Box<SignalRecord> {
        Box::new(SignalRecord::fault(
            SignalNumber::new(n).unwrap(),
            SigCode::MapErr,
            0,
        ))
    }

    #[test]
    fn round_trips_fifo() {
        let ring = SignalRing::new();
        for i in 1..=5 {
            ring.enqueue(record(i)).unwrap();
        }
        for i in 1..=5 {
            let got = ring.dequeue().unwrap();
            assert_eq!(got.signo.get(), i);
        }
        assert!(ring.dequeue().is_none());
    }

    #[test]
    fn never_exceeds_capacity_minus_one() {
        let ring = SignalRing::new();
        let mut accepted = 0;
        for _ in 0..RING_CAPACITY + 4 {
            if ring.enqueue(record(1)).is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, RING_CAPACITY - 1);
        assert_eq!(ring.drain(), RING_CAPACITY - 1);
    }

    #[test]
    fn concurrent_producers_preserve_multiset() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(SignalRing::new());
        let producers = 4;
        let per_producer = 3; // keep total under RING_CAPACITY - 1

        let mut handles = Vec::new();
        for p in 0..producers {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    let _ = ring.enqueue(record(1 + ((p * per_producer + i) % 31) as i32));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut count = 0;
        while ring.dequeue().is_some() {
            count += 1;
        }
        assert_eq!(count, producers * per_producer);
    }
}
