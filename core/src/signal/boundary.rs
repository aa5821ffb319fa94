//! Syscall-boundary emulation.
//!
//! An async upcall can interrupt the syscall stub while it is still inside
//! one of two narrow assembly windows: the register-restore epilogue that
//! pops the guest's saved GP register block back into the live context, or
//! the tight loop that checks for a pending signal right before returning
//! to the application. If the fault happens to land there, the interrupted
//! context does not yet look like "back in the app" — it is mid-epilogue
//! or mid-loop — so normal delivery (the upcall-tail entry point) would
//! build a frame on top of a state the application never actually reached.
//!
//! This module rewrites that context into the equivalent post-syscall
//! state before handing off to the scheduler, so delivery proceeds as if
//! the syscall had already completed.

use crate::pal::{GpRegs, PalContext};

/// The two windows the syscall stub can be interrupted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubWindow {
    /// Inside the block that restores the guest's saved GP registers.
    RegisterRestoreEpilogue,
    /// Inside the final "is a signal pending" check before `ret`.
    SigpendingCheck,
}

/// Boundaries of the two windows, as reported by the syscall stub. Both are
/// `[start, end)` instruction-pointer ranges.
#[derive(Debug, Clone)]
pub struct StubWindows {
    pub epilogue: std::ops::Range<usize>,
    pub sigpending_check: std::ops::Range<usize>,
}

impl StubWindows {
    pub fn classify(&self, ip: usize) -> Option<StubWindow> {
        if self.epilogue.contains(&ip) {
            Some(StubWindow::RegisterRestoreEpilogue)
        } else if self.sigpending_check.contains(&ip) {
            Some(StubWindow::SigpendingCheck)
        } else {
            None
        }
    }
}

/// What the stub had published about the in-flight syscall, read before
/// emulation and nil'd immediately after so later code never double-reads
/// it.
pub struct SavedSyscallState {
    pub saved_regs: GpRegs,
    /// Return address the `ret` in the sigpending-check window would have
    /// popped, i.e. the first application instruction after the syscall.
    pub app_return_addr: usize,
}

/// Rewrites `ctx` so it looks like the syscall already returned to the
/// application. Returns `true` if emulation applied (the caller is now
/// free to run the upcall-tail scheduler entry), `false` if `window` needs
/// no rewrite beyond what the stub itself already did.
pub fn emulate(
    ctx: &mut dyn PalContext,
    window: StubWindow,
    saved: &SavedSyscallState,
) -> bool {
    match window {
        StubWindow::RegisterRestoreEpilogue => {
            ctx.set_gp_regs(saved.saved_regs);
            ctx.set_instruction_pointer(saved.app_return_addr);
            true
        }
        StubWindow::SigpendingCheck => {
            ctx.set_instruction_pointer(saved.app_return_addr);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCtx(GpRegs);
    impl PalContext for FakeCtx {
        fn gp_regs(&self) -> GpRegs {
            self.0
        }
        fn set_gp_regs(&mut self, regs: GpRegs) {
            self.0 = regs;
        }
        fn fpu_state(&self) -> Option<&[u8]> {
            None
        }
        fn clear_fpu_pointer(&mut self) {}
        fn set_return_value(&mut self, value: i64) {
            self.0.rax = value as u64;
        }
    }

    #[test]
    fn epilogue_window_restores_saved_regs_and_jumps() {
        let mut ctx = FakeCtx(GpRegs::default());
        let saved = SavedSyscallState {
            saved_regs: GpRegs {
                rax: 42,
                ..Default::default()
            },
            app_return_addr: 0x1234,
        };
        let applied = emulate(&mut ctx, StubWindow::RegisterRestoreEpilogue, &saved);
        assert!(applied);
        assert_eq!(ctx.gp_regs().rax, 42);
        assert_eq!(ctx.instruction_pointer(), 0x1234);
    }

    #[test]
    fn sigpending_window_only_rewrites_ip() {
        let mut ctx = FakeCtx(GpRegs {
            rax: 7,
            ..Default::default()
        });
        let saved = SavedSyscallState {
            saved_regs: GpRegs::default(),
            app_return_addr: 0x5000,
        };
        emulate(&mut ctx, StubWindow::SigpendingCheck, &saved);
        assert_eq!(ctx.instruction_pointer(), 0x5000);
        assert_eq!(ctx.gp_regs().rax, 7);
    }

    #[test]
    fn classify_picks_the_right_window() {
        let windows = StubWindows {
            epilogue: 0x100..0x110,
            sigpending_check: 0x200..0x210,
        };
        assert_eq!(
            windows.classify(0x105),
            Some(StubWindow::RegisterRestoreEpilogue)
        );
        assert_eq!(
            windows.classify(0x205),
            Some(StubWindow::SigpendingCheck)
        );
        assert_eq!(windows.classify(0x300), None);
    }
}
