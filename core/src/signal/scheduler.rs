//! Delivery scheduler: the one decision core shared by the three points the
//! rest of the system calls into it from, plus the cross-thread append
//! path that feeds the per-signal rings in the first place.

use crate::pal::{PalContext, PalOps};
use crate::process::thread::{AltStack, ThreadSignalState};

use super::frame;
use super::types::{Disposition, SaFlags, SigCode, SignalNumber, SignalRecord, SigSet};

/// Outcome of running the scheduler core once.
pub enum SchedulerOutcome {
    /// Nothing pending and unmasked, or everything pending resolved to
    /// ignore and was drained.
    Idle,
    /// The resolved disposition was terminate or terminate-with-core; the
    /// caller should tear the thread/process down rather than resume it.
    Terminate { signo: SignalNumber, with_core: bool },
    /// A frame was built on `ctx`'s target stack; the caller resumes into
    /// the handler.
    Delivered { signo: SignalNumber, frame_sp: usize },
}

/// Runs the scheduling core: picks the lowest-numbered unmasked pending
/// signal, resolves its disposition, and acts. Ignore resolutions drain
/// the rest of that signal's queue before looping, since every further
/// queued instance of the same signal would resolve to the same ignore.
fn core_step(
    thread: &ThreadSignalState,
    ctx: &mut dyn PalContext,
    write_bytes: &mut dyn FnMut(usize, &[u8]),
) -> SchedulerOutcome {
    loop {
        let Some(sig) = thread.lowest_unmasked_pending() else {
            return SchedulerOutcome::Idle;
        };
        let Some(record) = thread.dequeue(sig) else {
            // Lost a race with ourselves; the ring can report transiently
            // empty under CAS churn even though `has_signal` was nonzero.
            continue;
        };

        match thread.dispositions.resolve(sig) {
            Disposition::Ignore => {
                thread.drain(sig);
                continue;
            }
            Disposition::Terminate => {
                return SchedulerOutcome::Terminate { signo: sig, with_core: false };
            }
            Disposition::TerminateWithCore => {
                return SchedulerOutcome::Terminate { signo: sig, with_core: true };
            }
            Disposition::Handler { handler, restorer, flags, mask: _ } => {
                let frame_sp = deliver(thread, ctx, &record, handler, restorer, flags, write_bytes);
                return SchedulerOutcome::Delivered { signo: sig, frame_sp };
            }
        }
    }
}

/// Builds the frame for one delivery and selects the alternate stack only
/// when the handler asked for it via `SA_ONSTACK`.
///
/// The handler's configured `sa_mask` is deliberately not folded into the
/// persistent thread mask here: there is no restore at `on_sigreturn`, and
/// the delivered ucontext's saved mask is always empty (see the
/// saved-sigmask open question recorded in `DESIGN.md`), so blocking it on
/// entry with nothing to undo it would leave those signals blocked forever.
///
/// # Safety
/// `write_bytes` must write through to memory belonging to the target
/// thread's current or alternate stack, matching [`frame::build`]'s
/// safety contract.
fn deliver(
    thread: &ThreadSignalState,
    ctx: &mut dyn PalContext,
    record: &SignalRecord,
    handler: usize,
    restorer: usize,
    flags: SaFlags,
    write_bytes: &mut dyn FnMut(usize, &[u8]),
) -> usize {
    let delivered_mask = SigSet::empty();

    let alt = if flags.contains(SaFlags::SA_ONSTACK) {
        thread.alt_stack()
    } else {
        AltStack::default()
    };

    unsafe {
        frame::build(ctx, record, handler, restorer, alt, delivered_mask, |addr, bytes| {
            write_bytes(addr, bytes)
        })
    }
}

/// **Entry A** — called at the tail of an ARITH/MEMFAULT/ILLEGAL/RESUME/
/// SUSPEND/QUIT upcall, after the event has already been enqueued.
/// Proceeds only if preemption is shallow enough and the interrupted
/// context is in guest code; otherwise only sets the may-deliver bit,
/// deferring to the syscall-return entry point.
pub fn on_upcall_tail(
    thread: &ThreadSignalState,
    ctx: &mut dyn PalContext,
    pal: &dyn PalOps,
    preemption_depth: u32,
    write_bytes: &mut dyn FnMut(usize, &[u8]),
) -> SchedulerOutcome {
    let ip = ctx.instruction_pointer();
    let in_guest_code = !pal.libos_text_range().contains(&ip) && !pal.pal_text_range().contains(&ip);

    if preemption_depth > 1 || !in_guest_code {
        thread.set_may_deliver(true);
        return SchedulerOutcome::Idle;
    }

    core_step(thread, ctx, write_bytes)
}

/// **Entry B** — called at syscall return (`sysret`). Clears the
/// may-deliver bit before inspecting the queue so a concurrent append
/// that lands in the race window is never missed (false positives are
/// tolerated; false negatives are not). The syscall's return value is
/// written into the context before the core runs, so it ends up in the
/// saved register snapshot a delivered handler's `ucontext` exposes.
pub fn on_syscall_return(
    thread: &ThreadSignalState,
    ctx: &mut dyn PalContext,
    syscall_retval: i64,
    write_bytes: &mut dyn FnMut(usize, &[u8]),
) -> SchedulerOutcome {
    thread.set_may_deliver(false);
    ctx.set_return_value(syscall_retval);

    let outcome = core_step(thread, ctx, write_bytes);

    if thread.has_signal() > 0 {
        thread.set_may_deliver(true);
    }

    outcome
}

/// **Entry C** — called from `sigreturn`, once the user's ucontext has
/// been unwound back into `ctx`. Attempts to deliver one more pending
/// signal without returning to the app. A fresh frame is built rather
/// than reusing the just-unwound sigframe's storage in place; the two are
/// equivalent except for the bytes the old frame leaves behind unused.
pub fn on_sigreturn(
    thread: &ThreadSignalState,
    ctx: &mut dyn PalContext,
    write_bytes: &mut dyn FnMut(usize, &[u8]),
) -> SchedulerOutcome {
    core_step(thread, ctx, write_bytes)
}

/// **Append path** — cross-thread signal send (`kill`-shaped). Resolves
/// disposition without consuming a `SA_RESETHAND` entry (a resolve would
/// wrongly consume it for a signal that isn't actually being delivered
/// here); if ignored and the signal is not SIGCHLD, discards silently.
/// Otherwise enqueues and, if `wake_blocked` is set, asks the PAL to
/// resume the target thread so a blocked syscall can observe it.
pub fn append_signal(
    thread: &ThreadSignalState,
    pal: &dyn PalOps,
    record: SignalRecord,
    wake_blocked: bool,
) -> Result<(), crate::error::SignalError> {
    let sig = record.signo;
    let is_sigchld = sig.get() == super::types::SIGCHLD;

    if !is_sigchld && thread.dispositions.is_currently_ignored(sig) {
        return Ok(());
    }

    thread
        .enqueue(Box::new(record))
        .map_err(|_| crate::error::SignalError::QueueFull { signo: sig.get() })?;

    if wake_blocked {
        pal.thread_resume(thread.tid.0);
    }

    Ok(())
}

/// Builds a `kill`-shaped record for the append path's callers.
pub fn user_signal(signo: SignalNumber, sender_pid: u32) -> SignalRecord {
    SignalRecord::from_sender(signo, sender_pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pal::unix::UnixHost;
    use crate::pal::GpRegs;
    use crate::process::thread::ThreadId;
    use crate::signal::types::{HandleEntry, SIGUSR1, SIGUSR2};

    struct FakeCtx {
        regs: GpRegs,
    }

    impl PalContext for FakeCtx {
        fn gp_regs(&self) -> GpRegs {
            self.regs
        }
        fn set_gp_regs(&mut self, regs: GpRegs) {
            self.regs = regs;
        }
        fn fpu_state(&self) -> Option<&[u8]> {
            None
        }
        fn clear_fpu_pointer(&mut self) {}
        fn set_return_value(&mut self, value: i64) {
            self.regs.rax = value as u64;
        }
    }

    #[test]
    fn ignored_signal_drains_without_building_a_frame() {
        let thread = ThreadSignalState::new(ThreadId(1));
        let sig = SignalNumber::new(SIGUSR1).unwrap();
        thread.dispositions.install(sig, HandleEntry::Ignore).unwrap();
        thread.enqueue(Box::new(user_signal(sig, 0))).unwrap();
        thread.enqueue(Box::new(user_signal(sig, 0))).unwrap();

        let mut ctx = FakeCtx {
            regs: GpRegs { rsp: 0x7fff_0000, ..Default::default() },
        };
        let mut written = Vec::new();
        let outcome = core_step(&thread, &mut ctx, &mut |a, b| written.push((a, b.to_vec())));
        assert!(matches!(outcome, SchedulerOutcome::Idle));
        assert!(written.is_empty());
        assert_eq!(thread.has_signal(), 0);
    }

    #[test]
    fn default_disposition_for_segv_reports_terminate_with_core() {
        let thread = ThreadSignalState::new(ThreadId(2));
        let sig = SignalNumber::new(crate::signal::types::SIGSEGV).unwrap();
        thread
            .enqueue(Box::new(SignalRecord::fault(sig, SigCode::MapErr, 0)))
            .unwrap();

        let mut ctx = FakeCtx { regs: GpRegs::default() };
        let mut written = Vec::new();
        let outcome = core_step(&thread, &mut ctx, &mut |a, b| written.push((a, b.to_vec())));
        match outcome {
            SchedulerOutcome::Terminate { signo, with_core } => {
                assert_eq!(signo.get(), crate::signal::types::SIGSEGV);
                assert!(with_core);
            }
            _ => panic!("expected terminate-with-core"),
        }
    }

    #[test]
    fn handler_disposition_builds_a_frame() {
        let thread = ThreadSignalState::new(ThreadId(3));
        let sig = SignalNumber::new(SIGUSR2).unwrap();
        thread
            .dispositions
            .install(
                sig,
                HandleEntry::Handler {
                    handler: 0x4000,
                    restorer: 0x5000,
                    flags: SaFlags::empty(),
                    mask: SigSet::empty(),
                },
            )
            .unwrap();
        thread.enqueue(Box::new(user_signal(sig, 99))).unwrap();

        let mut ctx = FakeCtx {
            regs: GpRegs { rsp: 0x7fff_0000, ..Default::default() },
        };
        let mut written = Vec::new();
        let outcome = core_step(&thread, &mut ctx, &mut |a, b| written.push((a, b.to_vec())));
        match outcome {
            SchedulerOutcome::Delivered { signo, frame_sp } => {
                assert_eq!(signo.get(), SIGUSR2);
                assert_eq!(ctx.instruction_pointer(), 0x4000);
                assert_eq!(frame_sp, ctx.stack_pointer());
            }
            _ => panic!("expected delivery"),
        }
        assert!(!written.is_empty());
    }

    #[test]
    fn syscall_return_writes_retval_before_checking_for_signals() {
        let thread = ThreadSignalState::new(ThreadId(6));
        let mut ctx = FakeCtx {
            regs: GpRegs { rsp: 0x7fff_0000, ..Default::default() },
        };
        let mut written = Vec::new();
        let outcome = on_syscall_return(&thread, &mut ctx, 42, &mut |a, b| written.push((a, b.to_vec())));
        assert!(matches!(outcome, SchedulerOutcome::Idle));
        assert_eq!(ctx.regs.rax, 42);
        assert!(!thread.may_deliver());
    }

    #[test]
    fn append_discards_silently_when_ignored_and_not_sigchld() {
        let thread = ThreadSignalState::new(ThreadId(4));
        let pal = UnixHost::default();
        let sig = SignalNumber::new(SIGUSR1).unwrap();
        thread.dispositions.install(sig, HandleEntry::Ignore).unwrap();

        append_signal(&thread, &pal, user_signal(sig, 0), true).unwrap();
        assert_eq!(thread.has_signal(), 0);
    }

    #[test]
    fn append_enqueues_and_sets_may_deliver() {
        let thread = ThreadSignalState::new(ThreadId(5));
        let pal = UnixHost::default();
        let sig = SignalNumber::new(SIGUSR2).unwrap();

        append_signal(&thread, &pal, user_signal(sig, 0), true).unwrap();
        assert_eq!(thread.has_signal(), 1);
        assert!(thread.may_deliver());
    }
}
