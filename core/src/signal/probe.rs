//! Memory probe.
//!
//! Two strategies behind one contract: `probe_buffer`/`probe_cstring`
//! return `true` when any byte in the requested range is inaccessible for
//! the requested direction *at the moment of probing* — the result is
//! advisory, it does not guarantee the buffer stays mapped after return.
//! Strategy selection is keyed off [`PalHostKind`] rather than a raw string
//! compare since this crate's PAL trait already exposes that as a typed
//! enum.

use crate::pal::{PalHostKind, VmaLookup};

/// Page size assumed by both strategies. Real PALs report this; fixed here
/// since nothing in this crate needs to support non-4K pages.
const PAGE_SIZE: usize = 4096;

fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

fn pages_touched(addr: usize, size: usize) -> impl Iterator<Item = usize> {
    let first = page_align_down(addr);
    let last = page_align_down(addr + size.saturating_sub(1));
    (first..=last).step_by(PAGE_SIZE)
}

/// Probes `[addr, addr+size)` for `write` accessibility using the VMA map,
/// for hosts that don't expose the fault address to the exception handler.
pub fn probe_buffer_vma_walk(vma: &dyn VmaLookup, addr: usize, size: usize, write: bool) -> bool {
    for page in pages_touched(addr, size) {
        match vma.lookup(page) {
            Some(info) if write && !info.writable => return true,
            Some(_) => continue,
            None => return true,
        }
    }
    false
}

/// Probes a NUL-terminated string one page at a time via the VMA map,
/// stopping at the first non-covered page.
pub fn probe_cstring_vma_walk(
    vma: &dyn VmaLookup,
    addr: usize,
    read_byte: impl Fn(usize) -> Option<u8>,
) -> bool {
    let mut page = page_align_down(addr);
    loop {
        if vma.lookup(page).is_none() {
            return true;
        }
        let page_end = page + PAGE_SIZE;
        let start = if page == page_align_down(addr) { addr } else { page };
        for cursor in start..page_end {
            match read_byte(cursor) {
                Some(0) => return false,
                Some(_) => continue,
                None => return true,
            }
        }
        page = page_end;
    }
}

/// Byte-touch probe. The caller is responsible for installing a
/// [`crate::process::thread::TestRange`] on the calling thread (via
/// [`crate::process::thread::ThreadSignalState::set_probe_range`]) before
/// touching, and for wiring the memory-fault upcall to flip `has_fault`
/// and redirect the instruction pointer to `cont_addr` when it observes a
/// fault inside the installed range (see
/// [`crate::signal::classifier::classify`]'s `ProbeRedirect` outcome).
/// `touch` performs the actual read or read-modify-write; it is expected
/// to either complete normally or never return (the fault redirects
/// execution back into this function's landing point) — modeled here
/// with a closure that reports whether the fault landing was reached, so
/// this module stays architecture-neutral and does not itself touch the
/// TCB.
pub fn probe_buffer_byte_touch(
    mut touch: impl FnMut(usize) -> ProbeStep,
    addr: usize,
    size: usize,
) -> bool {
    for page in pages_touched(addr, size) {
        match touch(page) {
            ProbeStep::Ok => continue,
            ProbeStep::Faulted => return true,
        }
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    Ok,
    Faulted,
}

/// Dispatches to the strategy appropriate for `host_kind` rather than
/// leaving callers to match on it themselves.
pub struct MemoryProbe {
    host_kind: PalHostKind,
}

impl MemoryProbe {
    pub fn new(host_kind: PalHostKind) -> Self {
        Self { host_kind }
    }

    pub fn uses_byte_touch(&self) -> bool {
        self.host_kind.uses_byte_touch_probe()
    }
}
