//! Host-side signal delivery core for a library-OS/PAL style runtime:
//! per-thread signal queues, fault classification, memory probes,
//! disposition resolution, signal-frame construction, syscall-boundary
//! emulation, and the scheduler that ties those into the three points a
//! PAL integration calls into it from.
//!
//! [`pal`] defines the boundary a host integration implements;
//! [`process`] holds the thread table and per-thread state; [`signal`]
//! holds everything about turning a pending signal into a rewritten
//! execution context. [`pal::unix`] is the one concrete PAL this crate
//! ships, backed by the host's own `libc` signal machinery.

pub mod error;
pub mod pal;
pub mod process;
pub mod signal;

pub use error::{InternalFault, InternalFaultReason, SignalError};
