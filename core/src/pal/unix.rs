//! Reference PAL implementation backed by the host's own `libc` signal
//! machinery.
//!
//! This is the one concrete [`PalOps`]/[`PalContext`] pair this crate
//! ships, used by the integration tests in `tests/end_to_end.rs` to prove
//! the frame builder and scheduler interoperate with a real
//! `sigaction`/`ucontext_t`: translate a genuine host signal into the
//! crate's own upcall shape.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{GpRegs, PalContext, PalHostKind, PalOps};

/// Wraps a `libc::ucontext_t` so the core can read/write it through
/// [`PalContext`] without every call site reaching for raw `libc` types.
pub struct UnixContext {
    inner: *mut libc::ucontext_t,
}

impl UnixContext {
    /// # Safety
    /// `ctx` must point to a valid, live `ucontext_t` for the duration of
    /// this wrapper's use, as guaranteed by the signal handler that
    /// received it from the kernel.
    pub unsafe fn new(ctx: *mut libc::ucontext_t) -> Self {
        Self { inner: ctx }
    }

    fn mcontext(&self) -> &libc::mcontext_t {
        unsafe { &(*self.inner).uc_mcontext }
    }

    fn mcontext_mut(&mut self) -> &mut libc::mcontext_t {
        unsafe { &mut (*self.inner).uc_mcontext }
    }
}

#[cfg(target_arch = "x86_64")]
impl PalContext for UnixContext {
    fn gp_regs(&self) -> GpRegs {
        let gregs = &self.mcontext().gregs;
        GpRegs {
            r8: gregs[libc::REG_R8 as usize] as u64,
            r9: gregs[libc::REG_R9 as usize] as u64,
            r10: gregs[libc::REG_R10 as usize] as u64,
            r11: gregs[libc::REG_R11 as usize] as u64,
            r12: gregs[libc::REG_R12 as usize] as u64,
            r13: gregs[libc::REG_R13 as usize] as u64,
            r14: gregs[libc::REG_R14 as usize] as u64,
            r15: gregs[libc::REG_R15 as usize] as u64,
            rdi: gregs[libc::REG_RDI as usize] as u64,
            rsi: gregs[libc::REG_RSI as usize] as u64,
            rbp: gregs[libc::REG_RBP as usize] as u64,
            rbx: gregs[libc::REG_RBX as usize] as u64,
            rdx: gregs[libc::REG_RDX as usize] as u64,
            rax: gregs[libc::REG_RAX as usize] as u64,
            rcx: gregs[libc::REG_RCX as usize] as u64,
            rsp: gregs[libc::REG_RSP as usize] as u64,
            rip: gregs[libc::REG_RIP as usize] as u64,
            eflags: gregs[libc::REG_EFL as usize] as u64,
        }
    }

    fn set_gp_regs(&mut self, regs: GpRegs) {
        let gregs = &mut self.mcontext_mut().gregs;
        gregs[libc::REG_R8 as usize] = regs.r8 as i64;
        gregs[libc::REG_R9 as usize] = regs.r9 as i64;
        gregs[libc::REG_R10 as usize] = regs.r10 as i64;
        gregs[libc::REG_R11 as usize] = regs.r11 as i64;
        gregs[libc::REG_R12 as usize] = regs.r12 as i64;
        gregs[libc::REG_R13 as usize] = regs.r13 as i64;
        gregs[libc::REG_R14 as usize] = regs.r14 as i64;
        gregs[libc::REG_R15 as usize] = regs.r15 as i64;
        gregs[libc::REG_RDI as usize] = regs.rdi as i64;
        gregs[libc::REG_RSI as usize] = regs.rsi as i64;
        gregs[libc::REG_RBP as usize] = regs.rbp as i64;
        gregs[libc::REG_RBX as usize] = regs.rbx as i64;
        gregs[libc::REG_RDX as usize] = regs.rdx as i64;
        gregs[libc::REG_RAX as usize] = regs.rax as i64;
        gregs[libc::REG_RCX as usize] = regs.rcx as i64;
        gregs[libc::REG_RSP as usize] = regs.rsp as i64;
        gregs[libc::REG_RIP as usize] = regs.rip as i64;
        gregs[libc::REG_EFL as usize] = regs.eflags as i64;
    }

    fn fpu_state(&self) -> Option<&[u8]> {
        let fpregs = self.mcontext().fpregs;
        if fpregs.is_null() {
            return None;
        }
        // `_libc_fpstate` on x86_64 Linux; treated as an opaque byte blob,
        // sized the way the classic (non-xsave) FXSAVE area is.
        const LEGACY_FPU_SIZE: usize = 512;
        Some(unsafe { std::slice::from_raw_parts(fpregs as *const u8, LEGACY_FPU_SIZE) })
    }

    fn clear_fpu_pointer(&mut self) {
        self.mcontext_mut().fpregs = std::ptr::null_mut();
    }

    fn set_return_value(&mut self, value: i64) {
        self.mcontext_mut().gregs[libc::REG_RAX as usize] = value;
    }
}

/// Minimal host-side [`PalOps`]. `libos_text_range`/`pal_text_range`
/// default to empty so tests (which run entirely in "guest" code as far as
/// the classifier is concerned) never classify their own faults as
/// internal.
pub struct UnixHost {
    libos_text: Range<usize>,
    pal_text: Range<usize>,
    resumed: AtomicUsize,
}

impl Default for UnixHost {
    fn default() -> Self {
        Self {
            libos_text: 0..0,
            pal_text: 0..0,
            resumed: AtomicUsize::new(0),
        }
    }
}

impl UnixHost {
    pub fn new(libos_text: Range<usize>, pal_text: Range<usize>) -> Self {
        Self {
            libos_text,
            pal_text,
            resumed: AtomicUsize::new(0),
        }
    }

    /// Number of times `exception_return` has been invoked; exposed for
    /// tests that want to confirm the upcall protocol was honored.
    pub fn exception_return_count(&self) -> usize {
        self.resumed.load(Ordering::Relaxed)
    }
}

impl PalOps for UnixHost {
    fn host_kind(&self) -> PalHostKind {
        PalHostKind::Linux
    }

    fn libos_text_range(&self) -> Range<usize> {
        self.libos_text.clone()
    }

    fn pal_text_range(&self) -> Range<usize> {
        self.pal_text.clone()
    }

    fn thread_resume(&self, _tid: u64) {
        // Host threads are already running; nothing to do beyond the
        // wait/condvar wake performed by the append path.
    }

    fn thread_yield(&self) {
        std::thread::yield_now();
    }

    fn exception_return(&self) {
        self.resumed.fetch_add(1, Ordering::Relaxed);
    }
}
