//! Error types for the signal delivery core.
//!
//! One variant per failure family, struct-like payloads instead of string
//! formatting, scoped to the failures this crate actually produces:
//! internal fault, queue overflow, allocation failure, probe fault, and
//! discarded-ignored-signal. Probe faults and discarded-ignored signals are
//! not `Result`s in this crate: they are expected outcomes encoded in the
//! return type of the function that can produce them (`bool` for probes,
//! silent drop for discards) — upcall code never returns an error to the
//! PAL, it resumes, terminates, or pauses.

use core::fmt;

/// Errors surfaced by the parts of the core that *can* report failure to a
/// caller (as opposed to the upcall paths, which only resume, terminate, or
/// pause).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "signal core errors must be handled, not silently discarded"]
pub enum SignalError {
    /// `sigaction`/`sigprocmask`-style call named a signal outside 1..=31.
    InvalidSignal { signo: i32 },
    /// Caller attempted to mask, ignore, or retarget SIGKILL or SIGSTOP.
    UnmaskableSignal { signo: i32 },
    /// The target thread is not registered in the global thread table.
    ThreadNotFound { tid: u64 },
    /// Per-signal ring for this thread is at capacity (loss
    /// policy: dropped and logged, but a caller that wants to observe this
    /// rather than have it only logged can use the fallible enqueue path).
    QueueFull { signo: i32 },
    /// Heap allocation for a signal record failed. Perthis is
    /// intentionally silent on the async append path; it is only surfaced
    /// here for the synchronous, non-upcall constructors.
    AllocationFailed,
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::InvalidSignal { signo } => {
                write!(f, "signal number {signo} is outside the supported 1..=31 range")
            }
            SignalError::UnmaskableSignal { signo } => {
                write!(f, "signal {signo} is SIGKILL or SIGSTOP and cannot be masked, ignored, or redirected")
            }
            SignalError::ThreadNotFound { tid } => write!(f, "thread {tid} is not registered"),
            SignalError::QueueFull { signo } => {
                write!(f, "per-signal ring for signal {signo} is full")
            }
            SignalError::AllocationFailed => write!(f, "failed to allocate a signal record"),
        }
    }
}

impl std::error::Error for SignalError {}

/// A fatal internal fault: a hardware exception with an instruction pointer
/// inside library-OS or PAL text, or a fault on an internal VMA.
/// Reported to stderr by the caller and then the process pauses; it is not
/// a `SignalError` because there is no recovery path to return one on.
#[derive(Debug, Clone, Copy)]
pub struct InternalFault {
    pub site: usize,
    pub reason: InternalFaultReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalFaultReason {
    FaultInLibOsText,
    FaultInPalText,
    FaultOnInternalVma,
    FaultOnInternalThread,
}

impl fmt::Display for InternalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "internal fault at {:#x}: {:?}",
            self.site, self.reason
        )
    }
}
