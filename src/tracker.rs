//! Per-call import bookkeeping.
//!
//! One tracker is created at call entry and shared by every context frame
//! produced during that call, so the import counter, the nesting stack and
//! the content-identity set bound the whole top-level invocation.

use crate::hash::ContentHash;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
struct TrackerState {
    import_count: usize,
    import_stack: Vec<String>,
    imported_hashes: HashSet<ContentHash>,
}

/// Shared import state for one top-level call.
#[derive(Clone, Default)]
pub struct ImportTracker {
    inner: Arc<Mutex<TrackerState>>,
}

impl ImportTracker {
    /// Fresh tracker with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports performed so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().import_count
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.lock().import_stack.len()
    }

    /// Whether this content has already been imported during this call.
    #[must_use]
    pub fn has_content(&self, hash: &ContentHash) -> bool {
        self.inner.lock().imported_hashes.contains(hash)
    }

    /// Record an import: bump the counter, push the id, remember the hash.
    pub fn record_import(&self, id: String, hash: ContentHash) {
        let mut state = self.inner.lock();
        state.import_count += 1;
        state.import_stack.push(id);
        state.imported_hashes.insert(hash);
    }

    /// Pop the innermost import id. The counter and content set persist for
    /// the rest of the call.
    pub fn pop(&self) {
        self.inner.lock().import_stack.pop();
    }

    /// Ids currently on the stack, outermost first.
    #[must_use]
    pub fn stack(&self) -> Vec<String> {
        self.inner.lock().import_stack.clone()
    }
}
