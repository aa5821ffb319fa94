//! Global thread table used to look threads up by ID when delivering a
//! signal sent from another thread.
//!
//! A `lazy_static` global guarded by a single lock, keyed by ID.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use spin::RwLock;

use super::thread::{ThreadId, ThreadSignalState};

pub struct ThreadTable {
    entries: RwLock<BTreeMap<ThreadId, Arc<ThreadSignalState>>>,
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadTable {
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, state: Arc<ThreadSignalState>) {
        self.entries.write().insert(state.tid, state);
    }

    pub fn unregister(&self, tid: ThreadId) -> Option<Arc<ThreadSignalState>> {
        self.entries.write().remove(&tid)
    }

    pub fn get(&self, tid: ThreadId) -> Option<Arc<ThreadSignalState>> {
        self.entries.read().get(&tid).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

lazy_static! {
    pub static ref THREAD_TABLE: ThreadTable = ThreadTable::new();
}
