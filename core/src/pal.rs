//! Interfaces this crate consumes from the platform abstraction layer.
//!
//! Everything in this module is a boundary the core reads or calls but does
//! not implement the "real" version of — the PAL upcall registration
//! interface, thread-resume/yield, and the VMA map are out-of-scope
//! collaborators. A host integration provides a concrete
//! [`PalOps`]/[`PalContext`]/[`VmaLookup`] triple; [`unix`] ships the one
//! reference implementation this crate tests against.

use std::ops::Range;

pub mod unix;

/// The six upcall classes the core registers handlers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTag {
    Arith,
    MemFault,
    Illegal,
    Quit,
    Suspend,
    Resume,
}

/// Which concrete PAL the core is running under. Selected once per process
/// and cached, rather than re-matched against a host-type string on every
/// fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PalHostKind {
    /// Ordinary Linux host PAL: the fault address is exposed to the
    /// exception handler, so the byte-touch probe strategy applies.
    Linux,
    /// Enclave-backed PAL (e.g. an SGX host): the fault address is not
    /// exposed, so the probe must fall back to walking the VMA map.
    LinuxSgx,
}

impl PalHostKind {
    /// Whether the syscall-boundary emulation should run on this host.
    /// Left off even on hosts where it would theoretically apply until it
    /// has test coverage.
    pub fn emulates_syscalls(self) -> bool {
        false
    }

    pub fn uses_byte_touch_probe(self) -> bool {
        matches!(self, PalHostKind::Linux)
    }
}

/// General-purpose register file, laid out the way the frame builder wants
/// to copy it: bitwise, field for field, into a `ucontext`'s machine
/// context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct GpRegs {
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rsp: u64,
    pub rip: u64,
    pub eflags: u64,
}

/// The PAL's view of an interrupted register file and FPU area. Both the
/// classifier and the frame builder read and rewrite this in place; the
/// saved context is an in/out parameter, not a snapshot.
pub trait PalContext {
    fn gp_regs(&self) -> GpRegs;
    fn set_gp_regs(&mut self, regs: GpRegs);

    fn instruction_pointer(&self) -> usize {
        self.gp_regs().rip as usize
    }
    fn set_instruction_pointer(&mut self, ip: usize) {
        let mut regs = self.gp_regs();
        regs.rip = ip as u64;
        self.set_gp_regs(regs);
    }

    fn stack_pointer(&self) -> usize {
        self.gp_regs().rsp as usize
    }
    fn set_stack_pointer(&mut self, sp: usize) {
        let mut regs = self.gp_regs();
        regs.rsp = sp as u64;
        self.set_gp_regs(regs);
    }

    /// Raw extended FPU save area, if the context carries one. `None` means
    /// legacy FPU-only state: the frame builder falls back to
    /// [`crate::signal::frame::LEGACY_FPU_SIZE`].
    fn fpu_state(&self) -> Option<&[u8]>;

    /// Set the FPU-state pointer register the handler entry convention
    /// expects to be nil.
    fn clear_fpu_pointer(&mut self);

    /// Set the syscall return-value register (used by the syscall-return
    /// entry point, so the handler's `ucontext` shows the completed
    /// result).
    fn set_return_value(&mut self, value: i64);

    /// First three argument registers, for entering the handler with
    /// `(signo, &siginfo, &ucontext)`.
    fn set_handler_args(&mut self, signo: u64, siginfo_ptr: usize, ucontext_ptr: usize) {
        let mut regs = self.gp_regs();
        regs.rdi = signo;
        regs.rsi = siginfo_ptr as u64;
        regs.rdx = ucontext_ptr as u64;
        regs.rax = 0;
        self.set_gp_regs(regs);
    }
}

/// A memory region the VMA map can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmaInfo {
    pub start: usize,
    pub end: usize,
    pub writable: bool,
    pub internal: bool,
    pub file_backed: bool,
    /// End of the file's projection into this VMA, if file-backed.
    pub file_end: Option<usize>,
}

impl VmaInfo {
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// The VMA map, consumed read-only by the classifier and the VMA-walk probe
/// strategy.
pub trait VmaLookup: Send + Sync {
    fn lookup(&self, addr: usize) -> Option<VmaInfo>;
}

/// Operations the core calls on the PAL.
pub trait PalOps: Send + Sync {
    fn host_kind(&self) -> PalHostKind;

    /// Text range owned by this library OS; a fault here is an internal bug.
    fn libos_text_range(&self) -> Range<usize>;
    /// Text range owned by the PAL itself; same treatment.
    fn pal_text_range(&self) -> Range<usize>;

    fn thread_resume(&self, tid: u64);
    fn thread_yield(&self);

    /// Resume execution after the handler finishes processing the event.
    fn exception_return(&self);
}
