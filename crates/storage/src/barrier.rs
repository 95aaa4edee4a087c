//! Barrier list
//!
//! A per-collection ordered list of lifecycle tokens. Readers that hold
//! raw pointers into a datafile push a document pin for exactly the span
//! they need them; maintenance actions (dropping or renaming a datafile,
//! unloading or dropping the collection) are pushed as callbacks behind
//! the pins that may still reference the affected datafile.
//!
//! The cleanup thread only ever inspects the head of the list. If the
//! head is a pin (or a replication/compaction marker) it must not touch
//! anything. Otherwise it detaches the head under the lock and runs the
//! callback outside it. This is safe because elements are appended in
//! chronological order: a callback is only enqueued after all earlier
//! pins that could reference its datafile, and every pin enqueued later
//! references a different datafile. The writer enforces that obligation.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::datafile::Datafile;

/// A detached maintenance action, executed outside the list lock
pub enum BarrierAction {
    /// Free a datafile nobody points into anymore
    DatafileDrop {
        /// The affected datafile
        datafile: Arc<Datafile>,
        /// Action to run once the file is safe to recycle
        callback: Box<dyn FnOnce(&Datafile) + Send>,
    },
    /// Rename a datafile after compaction
    DatafileRename {
        /// The affected datafile
        datafile: Arc<Datafile>,
        /// Action to run once the file is safe to rename
        callback: Box<dyn FnOnce(&Datafile) + Send>,
    },
    /// Unload the collection; returns true when the collection is gone
    CollectionUnload {
        /// Action deciding and performing the unload
        callback: Box<dyn FnOnce() -> bool + Send>,
    },
    /// Drop the collection; returns true when the collection is gone
    CollectionDrop {
        /// Action deciding and performing the drop
        callback: Box<dyn FnOnce() -> bool + Send>,
    },
}

enum Element {
    /// A reader holds pointers into a datafile
    Pin(u64),
    /// Replication is reading the collection, hold back maintenance
    Replication(u64),
    /// Compaction is rewriting the collection, hold back maintenance
    Compaction(u64),
    /// A maintenance callback
    Action(u64, BarrierAction),
}

impl Element {
    fn id(&self) -> u64 {
        match self {
            Element::Pin(id)
            | Element::Replication(id)
            | Element::Compaction(id)
            | Element::Action(id, _) => *id,
        }
    }

    fn blocks_head(&self) -> bool {
        matches!(
            self,
            Element::Pin(_) | Element::Replication(_) | Element::Compaction(_)
        )
    }
}

struct Inner {
    elements: Mutex<VecDeque<Element>>,
    next_id: AtomicU64,
}

/// Kind tag for RAII barrier guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardKind {
    Pin,
    Replication,
    Compaction,
}

/// RAII token for a pin or marker element; dropping it unlinks the element
pub struct BarrierGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        let mut elements = self.inner.elements.lock();
        if let Some(position) = elements.iter().position(|e| e.id() == self.id) {
            elements.remove(position);
        }
    }
}

/// Per-collection ordered list of lifecycle tokens
pub struct BarrierList {
    inner: Arc<Inner>,
}

impl BarrierList {
    /// Create an empty barrier list
    pub fn new() -> Self {
        BarrierList {
            inner: Arc::new(Inner {
                elements: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn push_marker(&self, kind: GuardKind) -> BarrierGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let element = match kind {
            GuardKind::Pin => Element::Pin(id),
            GuardKind::Replication => Element::Replication(id),
            GuardKind::Compaction => Element::Compaction(id),
        };
        self.inner.elements.lock().push_back(element);
        BarrierGuard {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Pin the collection's datafiles for the lifetime of the guard
    pub fn pin(&self) -> BarrierGuard {
        self.push_marker(GuardKind::Pin)
    }

    /// Hold back maintenance while replication reads the collection
    pub fn replication_marker(&self) -> BarrierGuard {
        self.push_marker(GuardKind::Replication)
    }

    /// Hold back maintenance while compaction rewrites the collection
    pub fn compaction_marker(&self) -> BarrierGuard {
        self.push_marker(GuardKind::Compaction)
    }

    fn push_action(&self, action: BarrierAction) {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .elements
            .lock()
            .push_back(Element::Action(id, action));
    }

    /// Enqueue a datafile drop behind all current pins
    ///
    /// The caller must guarantee that every pin added from now on refers
    /// to a different datafile.
    pub fn add_datafile_drop_callback(
        &self,
        datafile: Arc<Datafile>,
        callback: impl FnOnce(&Datafile) + Send + 'static,
    ) {
        self.push_action(BarrierAction::DatafileDrop {
            datafile,
            callback: Box::new(callback),
        });
    }

    /// Enqueue a datafile rename behind all current pins
    pub fn add_datafile_rename_callback(
        &self,
        datafile: Arc<Datafile>,
        callback: impl FnOnce(&Datafile) + Send + 'static,
    ) {
        self.push_action(BarrierAction::DatafileRename {
            datafile,
            callback: Box::new(callback),
        });
    }

    /// Enqueue a collection unload
    pub fn add_collection_unload_callback(&self, callback: impl FnOnce() -> bool + Send + 'static) {
        self.push_action(BarrierAction::CollectionUnload {
            callback: Box::new(callback),
        });
    }

    /// Enqueue a collection drop
    pub fn add_collection_drop_callback(&self, callback: impl FnOnce() -> bool + Send + 'static) {
        self.push_action(BarrierAction::CollectionDrop {
            callback: Box::new(callback),
        });
    }

    /// Detach the head action, if the head is one
    ///
    /// Returns `None` when the list is empty or the head is a pin or a
    /// replication/compaction marker; in that case nothing may be thrown
    /// away. The returned action must be executed outside any list lock.
    pub fn next_action(&self) -> Option<BarrierAction> {
        let mut elements = self.inner.elements.lock();
        match elements.front() {
            None => None,
            Some(element) if element.blocks_head() => {
                trace!("barrier head is a pin, holding back maintenance");
                None
            }
            Some(_) => match elements.pop_front() {
                Some(Element::Action(_, action)) => Some(action),
                _ => unreachable!("head was checked to be an action"),
            },
        }
    }

    /// Number of elements currently linked
    pub fn len(&self) -> usize {
        self.inner.elements.lock().len()
    }

    /// Whether the list holds no elements
    pub fn is_empty(&self) -> bool {
        self.inner.elements.lock().is_empty()
    }
}

impl Default for BarrierList {
    fn default() -> Self {
        Self::new()
    }
}
