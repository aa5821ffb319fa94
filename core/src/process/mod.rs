//! Thread identity and the global thread table consumed by the signal
//! core: an ID allocator plus re-exports of the submodules.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod table;
pub mod thread;

pub use table::THREAD_TABLE;
pub use thread::{MaskHow, ThreadId, ThreadSignalState};

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

/// Registers a fresh, ordinary (non-internal) thread and returns its
/// shared signal state.
pub fn spawn_thread() -> Arc<ThreadSignalState> {
    let state = Arc::new(ThreadSignalState::new(alloc_tid()));
    THREAD_TABLE.register(Arc::clone(&state));
    state
}

/// Registers a library-OS-internal worker thread. Faults here are always
/// fatal bugs, never delivered as guest signals.
pub fn spawn_internal_thread() -> Arc<ThreadSignalState> {
    let state = Arc::new(ThreadSignalState::internal(alloc_tid()));
    THREAD_TABLE.register(Arc::clone(&state));
    state
}
