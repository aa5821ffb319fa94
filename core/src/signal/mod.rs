//! Signal delivery: number/record/mask types, the per-signal queues, the
//! disposition table, the fault classifier, memory probes, frame
//! construction, syscall-boundary emulation, and the scheduler that ties
//! all of it together.

pub mod boundary;
pub mod classifier;
pub mod disposition;
pub mod frame;
pub mod probe;
pub mod ring;
pub mod scheduler;
pub mod types;

pub use boundary::{emulate as emulate_boundary, SavedSyscallState, StubWindow, StubWindows};
pub use classifier::{classify, classify_control, Classified, ControlOutcome, EventArg};
pub use disposition::DispositionTable;
pub use frame::{build as build_frame, layout_for, select_stack, FrameLayout};
pub use probe::{probe_buffer_byte_touch, probe_buffer_vma_walk, probe_cstring_vma_walk, MemoryProbe, ProbeStep};
pub use ring::SignalRing;
pub use scheduler::{append_signal, on_sigreturn, on_syscall_return, on_upcall_tail, user_signal, SchedulerOutcome};
pub use types::{
    default_disposition, encode_wait_status, Disposition, HandleEntry, SaFlags, SigCode, SigSet,
    SignalNumber, SignalRecord, UContextFlags,
};
