//! Datastore events.
//!
//! One event exists: `compaction.done`, emitted after every successful
//! full rewrite of the datafile.

use parking_lot::RwLock;

/// Callback invoked when a compaction finishes.
pub type CompactionListener = Box<dyn Fn() + Send + Sync>;

/// Listener registry for datastore events.
#[derive(Default)]
pub struct Events {
    compaction_done: RwLock<Vec<CompactionListener>>,
}

impl Events {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `compaction.done` listener.
    pub fn on_compaction_done(&self, listener: CompactionListener) {
        self.compaction_done.write().push(listener);
    }

    /// Notifies all `compaction.done` listeners.
    pub(crate) fn emit_compaction_done(&self) {
        for listener in self.compaction_done.read().iter() {
            listener();
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("compaction_done_listeners", &self.compaction_done.read().len())
            .finish()
    }
}
