//! Signal frame construction.
//!
//! Lays out the extended FPU area, `ucontext`, and `siginfo` on the target
//! stack, writes the restorer pointer, and rewrites the interrupted
//! [`PalContext`] to enter the handler.
//!
//! Addresses are computed bottom-up and written with raw pointer stores
//! rather than through a single nested `#[repr(C)]` struct: the FPU-state
//! pointer embedded in the `ucontext` has to point at a block whose address
//! is only known once the whole layout has been placed, so every
//! self-referential field is filled in after its target address is computed
//! rather than relied on to fall out of a `struct`'s natural layout.

use crate::pal::{GpRegs, PalContext};
use crate::process::thread::AltStack;
use crate::signal::types::{SigCode, SignalRecord, UContextFlags};

/// ABI red zone the System V x86-64 calling convention reserves below the
/// stack pointer for leaf functions.
pub const RED_ZONE: usize = 128;

/// Conservative legacy FXSAVE size, used when the context carries no
/// extended-state header.
pub const LEGACY_FPU_SIZE: usize = 512;

pub const FPU_ALIGN: usize = 64;
pub const UCONTEXT_ALIGN: usize = 16;

/// On-stack byte layout of one signal delivery. All offsets are relative
/// to the final stack pointer (lowest address, where the restorer sits).
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub restorer_offset: usize,
    pub siginfo_offset: usize,
    pub ucontext_offset: usize,
    pub mcontext_offset: usize,
    pub fpu_offset: usize,
    pub total_size: usize,
    pub sp: usize,
}

/// Mirrors the fields `frame::build` needs out of a `siginfo_t`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SigInfoRaw {
    pub signo: i32,
    pub errno: i32,
    pub code: i32,
    pub fault_addr: u64,
    pub sender_pid: u32,
    pub trap_no: i32,
    pub syscall_nr: i64,
}

impl SigInfoRaw {
    fn from_record(record: &SignalRecord) -> Self {
        Self {
            signo: record.signo.get(),
            errno: record.errno,
            code: sig_code_to_si_code(record.code),
            fault_addr: record.fault_addr as u64,
            sender_pid: record.sender_pid,
            trap_no: record.trap_no,
            syscall_nr: record.syscall_nr,
        }
    }
}

fn sig_code_to_si_code(code: SigCode) -> i32 {
    // Linux si_code numbering for the subset of codes this crate produces.
    match code {
        SigCode::MapErr => 1,          // SEGV_MAPERR
        SigCode::AccErr => 2,          // SEGV_ACCERR
        SigCode::AdrErr => 1,          // BUS_ADRERR
        SigCode::IntDiv => 1,          // FPE_INTDIV
        SigCode::IllOpc => 1,          // ILL_ILLOPC
        SigCode::User => 0,            // SI_USER
        SigCode::HostSyscallOpcode => 1, // SYS_SECCOMP
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AltStackRaw {
    pub sp: u64,
    pub flags: u32,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MContextRaw {
    pub gregs: GpRegs,
    pub fpregs_ptr: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UContextRaw {
    pub flags: u32,
    pub link: u64,
    pub stack: AltStackRaw,
    pub sigmask: u32,
    pub mcontext: MContextRaw,
}

/// Computes every offset in the frame without writing anything, so callers
/// can size the allocation (or, on the real stack, compute the new `sp`)
/// before committing any stores.
pub fn layout_for(sp_hint: usize, fpu_xstate_size: Option<usize>) -> FrameLayout {
    let fpu_size = fpu_xstate_size.unwrap_or(LEGACY_FPU_SIZE);

    // Offsets are relative to the final (lowest-address) stack pointer,
    // built from the bottom up: the restorer slot sits at offset 0, then
    // siginfo, then ucontext, and the FPU area ends up at the highest
    // offset, closest to the original pre-frame sp, since it is the first
    // block the downward-growing layout carves out.
    let mut off = 0usize;
    let restorer_off = off;
    off += core::mem::size_of::<u64>();

    off = align_up(off, 8);
    let siginfo_off = off;
    off += core::mem::size_of::<SigInfoRaw>();

    off = align_up(off, UCONTEXT_ALIGN);
    let ucontext_off = off;
    let mcontext_off = ucontext_off + core::mem::offset_of!(UContextRaw, mcontext);
    off += core::mem::size_of::<UContextRaw>();

    off = align_up(off, FPU_ALIGN);
    let fpu_off = off;
    off += fpu_size;

    let total = off;
    let base = align_down(sp_hint.saturating_sub(total), FPU_ALIGN);

    FrameLayout {
        restorer_offset: restorer_off,
        siginfo_offset: siginfo_off,
        ucontext_offset: ucontext_off,
        mcontext_offset: mcontext_off,
        fpu_offset: fpu_off,
        total_size: total,
        sp: base,
    }
}

fn align_down(v: usize, align: usize) -> usize {
    v & !(align - 1)
}

fn align_up(v: usize, align: usize) -> usize {
    (v + align - 1) & !(align - 1)
}

/// Chooses the target stack pointer before red-zone/alt-stack adjustment.
pub fn select_stack(current_sp: usize, alt: AltStack) -> usize {
    let on_alt_stack = alt.enabled && current_sp >= alt.base && current_sp < alt.top();
    if alt.enabled && !on_alt_stack {
        alt.top()
    } else {
        current_sp.saturating_sub(RED_ZONE)
    }
}

/// Builds the frame and rewrites `ctx` to enter `handler`. Returns the
/// final stack pointer (equal to `layout.sp`) so callers building a nested
/// `sigreturn` chain know where the frame they just built lives.
///
/// # Safety
/// `write_bytes` must be able to write `layout.total_size` bytes ending at
/// `sp_hint`, and that memory must belong to the target thread's stack
/// (current or alternate, per [`select_stack`]). It is called once per
/// field written (FPU area, ucontext, siginfo, restorer pointer).
pub unsafe fn build(
    ctx: &mut dyn PalContext,
    record: &SignalRecord,
    handler: usize,
    restorer: usize,
    alt: AltStack,
    delivered_mask: crate::signal::types::SigSet,
    mut write_bytes: impl FnMut(usize, &[u8]),
) -> usize {
    let current_sp = ctx.stack_pointer();
    let sp_hint = select_stack(current_sp, alt);
    let fpu_state = ctx.fpu_state();
    let layout = layout_for(sp_hint, fpu_state.map(|s| s.len()));

    let base = layout.sp;
    let saved_regs = ctx.gp_regs();

    let mut ucontext_flags = UContextFlags::UC_STRICT_RESTORE_SS;
    let fpregs_ptr = if let Some(fpu) = fpu_state {
        write_bytes(base + layout.fpu_offset, fpu);
        ucontext_flags |= UContextFlags::UC_FP_XSTATE;
        (base + layout.fpu_offset) as u64
    } else {
        0
    };

    let mcontext = MContextRaw {
        gregs: saved_regs,
        fpregs_ptr,
    };
    let ucontext = UContextRaw {
        flags: ucontext_flags.bits(),
        link: 0,
        stack: AltStackRaw {
            sp: alt.base as u64,
            flags: if alt.enabled { 0 } else { 1 }, // SS_DISABLE = 1
            size: alt.size as u64,
        },
        sigmask: delivered_mask.raw(),
        mcontext,
    };
    write_bytes(base + layout.ucontext_offset, as_bytes(&ucontext));

    let siginfo = SigInfoRaw::from_record(record);
    write_bytes(base + layout.siginfo_offset, as_bytes(&siginfo));

    write_bytes(base + layout.restorer_offset, &(restorer as u64).to_ne_bytes());

    debug_assert_eq!(
        base + layout.restorer_offset,
        base,
        "restorer must sit at offset 0 of the sigframe"
    );

    let siginfo_ptr = base + layout.siginfo_offset;
    let ucontext_ptr = base + layout.ucontext_offset;

    ctx.set_instruction_pointer(handler);
    ctx.set_stack_pointer(base);
    ctx.set_handler_args(record.signo.get() as u64, siginfo_ptr, ucontext_ptr);
    ctx.clear_fpu_pointer();

    base
}

/// # Safety
/// Caller must ensure `T` has no padding that needs to stay zeroed for
/// correctness beyond what `write_bytes` guarantees for the destination.
fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts((value as *const T) as *const u8, core::mem::size_of::<T>())
    }
}
