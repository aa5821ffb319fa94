//! Per-thread signal state: one struct per OS thread's signal-handling
//! state, built from atomics for the hot fields and a `Mutex`-guarded
//! sub-state for the rest.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::signal::disposition::DispositionTable;
use crate::signal::ring::SignalRing;
use crate::signal::types::{SigSet, SignalNumber, SIGNAL_COUNT};

/// Thread ID, a thin newtype over the underlying OS thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single-slot, owning-thread-only probe record: the thread-local landing
/// pad a memory probe installs before touching untrusted memory.
/// Not wrapped in a lock: the only other actor that touches it is the
/// memory-fault upcall running synchronously on this same OS thread, so
/// there is no cross-thread race to guard against.
#[derive(Debug, Clone, Copy)]
pub struct TestRange {
    pub start: usize,
    pub end: usize,
    pub cont_addr: usize,
    pub has_fault: bool,
}

impl TestRange {
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Alternate stack descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AltStack {
    pub base: usize,
    pub size: usize,
    pub enabled: bool,
}

impl AltStack {
    pub fn top(&self) -> usize {
        self.base + self.size
    }
}

/// Everything the signal core needs for one thread. Rings are lock-free on
/// their own; the mask and alt stack are plain atomics/cells since they're
/// read far more than written and written only by this thread or by
/// `sigaction`/`sigaltstack` calls serialized through the owning thread's
/// syscall path.
pub struct ThreadSignalState {
    pub tid: ThreadId,
    rings: [SignalRing; SIGNAL_COUNT],
    has_signal: AtomicUsize,
    mask: Mutex<SigSet>,
    pub dispositions: DispositionTable,
    alt_stack: Mutex<AltStack>,
    /// Consulted by the syscall epilogue.
    may_deliver: AtomicBool,
    probe_range: Mutex<Option<TestRange>>,
    /// Whether this is a library-OS-internal worker thread. Faults here
    /// are always fatal bugs, never delivered as guest signals.
    pub is_internal: bool,
}

impl ThreadSignalState {
    pub fn new(tid: ThreadId) -> Self {
        Self {
            tid,
            rings: std::array::from_fn(|_| SignalRing::new()),
            has_signal: AtomicUsize::new(0),
            mask: Mutex::new(SigSet::empty()),
            dispositions: DispositionTable::new(),
            alt_stack: Mutex::new(AltStack::default()),
            may_deliver: AtomicBool::new(false),
            probe_range: Mutex::new(None),
            is_internal: false,
        }
    }

    pub fn internal(tid: ThreadId) -> Self {
        let mut s = Self::new(tid);
        s.is_internal = true;
        s
    }

    pub fn ring(&self, sig: SignalNumber) -> &SignalRing {
        &self.rings[sig.index()]
    }

    pub fn has_signal(&self) -> usize {
        self.has_signal.load(Ordering::Acquire)
    }

    pub(crate) fn bump_has_signal(&self, delta: isize) {
        if delta >= 0 {
            self.has_signal.fetch_add(delta as usize, Ordering::AcqRel);
        } else {
            self.has_signal
                .fetch_sub((-delta) as usize, Ordering::AcqRel);
        }
    }

    pub fn mask(&self) -> SigSet {
        *self.mask.lock()
    }

    /// `sigprocmask`-shaped mutation. `how` follows the
    /// conventional POSIX three verbs.
    pub fn change_mask(&self, how: MaskHow, set: SigSet) -> SigSet {
        let mut guard = self.mask.lock();
        let old = *guard;
        *guard = match how {
            MaskHow::Block => old.union(set),
            MaskHow::Unblock => old.difference(set),
            MaskHow::Set => set.union(SigSet::empty()),
        };
        old
    }

    pub fn is_masked(&self, sig: SignalNumber) -> bool {
        self.mask.lock().contains(sig)
    }

    pub fn alt_stack(&self) -> AltStack {
        *self.alt_stack.lock()
    }

    pub fn set_alt_stack(&self, stack: AltStack) {
        *self.alt_stack.lock() = stack;
    }

    pub fn may_deliver(&self) -> bool {
        self.may_deliver.load(Ordering::Acquire)
    }

    pub fn set_may_deliver(&self, value: bool) {
        self.may_deliver.store(value, Ordering::Release);
    }

    pub fn set_probe_range(&self, range: Option<TestRange>) {
        *self.probe_range.lock() = range;
    }

    pub fn with_probe_range<T>(&self, f: impl FnOnce(Option<&TestRange>) -> T) -> T {
        f(self.probe_range.lock().as_ref())
    }

    /// Enqueues `record`, bumping `has_signal` and the may-deliver bit on
    /// success. On overflow the record is dropped and the
    /// overflow is logged; the signal number is returned
    /// so the caller can log it without re-reading the dropped record.
    pub fn enqueue(
        &self,
        record: Box<crate::signal::types::SignalRecord>,
    ) -> Result<(), crate::signal::types::SignalRecord> {
        let sig = record.signo;
        match self.ring(sig).enqueue(record) {
            Ok(()) => {
                self.bump_has_signal(1);
                self.set_may_deliver(true);
                Ok(())
            }
            Err(dropped) => {
                log::warn!(
                    "signal {sig} dropped for thread {}: per-signal ring full",
                    self.tid
                );
                Err(*dropped)
            }
        }
    }

    pub fn dequeue(&self, sig: SignalNumber) -> Option<Box<crate::signal::types::SignalRecord>> {
        let record = self.ring(sig).dequeue();
        if record.is_some() {
            self.bump_has_signal(-1);
        }
        record
    }

    /// Drains every queued record for `sig` (used when delivery resolves
    /// to "ignored while masked") and reconciles `has_signal`.
    pub fn drain(&self, sig: SignalNumber) -> usize {
        let drained = self.ring(sig).drain();
        if drained > 0 {
            self.bump_has_signal(-(drained as isize));
        }
        drained
    }

    /// Lowest-numbered signal with both a pending record and no mask bit
    /// set, or `None`. Used by the scheduler core.
    pub fn lowest_unmasked_pending(&self) -> Option<SignalNumber> {
        let mask = self.mask();
        for n in crate::signal::types::MIN_SIGNUM..=crate::signal::types::MAX_SIGNUM {
            let sig = SignalNumber::new(n).unwrap();
            if !mask.contains(sig) && !self.ring(sig).is_empty() {
                return Some(sig);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskHow {
    Block,
    Unblock,
    Set,
}
