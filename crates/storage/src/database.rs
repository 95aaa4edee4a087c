//! Database handle
//!
//! One per database directory: owns the collection list, the cursor
//! registry, the compactor lock, and the lifecycle state the cleanup
//! worker keys off. Collection handles are shared; dropping a collection
//! enqueues the actual teardown on its barrier list so readers drain
//! first.

use crate::collection::{CollectionKind, DocumentCollection};
use crate::compactor::CompactorLock;
use crate::cursor::CursorRegistry;
use parking_lot::{Condvar, Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vellum_core::{Error, Result, Shaper, TickSource};

/// Lifecycle state of a database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    /// Serving requests
    Running = 1,
    /// Shutting down: cursors are force-reaped, collections may close
    ShutdownCleanup = 2,
    /// Background workers must exit
    Stopped = 3,
}

impl DatabaseState {
    fn from_u8(value: u8) -> DatabaseState {
        match value {
            1 => DatabaseState::Running,
            2 => DatabaseState::ShutdownCleanup,
            _ => DatabaseState::Stopped,
        }
    }
}

/// A database: collections plus the shared maintenance machinery
pub struct Database {
    name: String,
    directory: PathBuf,
    shaper: Arc<Shaper>,
    ticks: Arc<TickSource>,
    collections: RwLock<Vec<Arc<DocumentCollection>>>,
    /// dropped collections whose teardown still waits on their barriers
    dropped: RwLock<Vec<Arc<DocumentCollection>>>,
    cursors: CursorRegistry,
    compactor: CompactorLock,
    state: AtomicU8,
    cleanup_wakeup: Mutex<()>,
    cleanup_condition: Condvar,
}

impl Database {
    /// Create a database rooted at `directory`
    pub fn new(name: String, directory: &Path) -> Arc<Database> {
        Arc::new(Database {
            name,
            directory: directory.to_path_buf(),
            shaper: Arc::new(Shaper::new()),
            ticks: Arc::new(TickSource::new(0)),
            collections: RwLock::new(Vec::new()),
            dropped: RwLock::new(Vec::new()),
            cursors: CursorRegistry::new(),
            compactor: CompactorLock::new(),
            state: AtomicU8::new(DatabaseState::Running as u8),
            cleanup_wakeup: Mutex::new(()),
            cleanup_condition: Condvar::new(),
        })
    }

    /// Database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared shape registry
    pub fn shaper(&self) -> &Arc<Shaper> {
        &self.shaper
    }

    /// The shared tick source
    pub fn ticks(&self) -> &Arc<TickSource> {
        &self.ticks
    }

    /// The cursor registry
    pub fn cursors(&self) -> &CursorRegistry {
        &self.cursors
    }

    /// The compactor coordination lock
    pub fn compactor(&self) -> &CompactorLock {
        &self.compactor
    }

    /// Current lifecycle state
    pub fn state(&self) -> DatabaseState {
        DatabaseState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move to a new lifecycle state and wake the cleanup worker
    pub fn set_state(&self, state: DatabaseState) {
        info!(database = %self.name, ?state, "database state change");
        self.state.store(state as u8, Ordering::SeqCst);
        self.wake_cleanup();
    }

    /// Wake the cleanup worker before its interval elapses
    pub fn wake_cleanup(&self) {
        let _guard = self.cleanup_wakeup.lock();
        self.cleanup_condition.notify_all();
    }

    /// Block until woken or until `interval` elapses
    pub(crate) fn wait_cleanup(&self, interval: Duration) {
        let mut guard = self.cleanup_wakeup.lock();
        self.cleanup_condition.wait_for(&mut guard, interval);
    }

    /// Create a collection
    pub fn create_collection(
        &self,
        name: &str,
        kind: CollectionKind,
    ) -> Result<Arc<DocumentCollection>> {
        let mut collections = self.collections.write();
        if collections.iter().any(|c| c.name() == name) {
            return Err(Error::IllegalOption(format!(
                "collection '{}' already exists",
                name
            )));
        }

        let directory = self.directory.join(format!("collection-{}", name));
        std::fs::create_dir_all(&directory)?;

        let collection = Arc::new(DocumentCollection::new(
            name.to_string(),
            kind,
            &directory,
            Arc::clone(&self.shaper),
            Arc::clone(&self.ticks),
        ));
        collections.push(Arc::clone(&collection));
        info!(database = %self.name, collection = name, "created collection");
        Ok(collection)
    }

    /// Look up a collection by name
    pub fn collection(&self, name: &str) -> Result<Arc<DocumentCollection>> {
        self.collections
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Snapshot of all collection handles
    pub fn collections(&self) -> Vec<Arc<DocumentCollection>> {
        self.collections.read().clone()
    }

    /// Collections the cleanup worker must visit: the active ones plus
    /// dropped ones whose teardown still waits on their barrier lists
    pub fn cleanup_candidates(&self) -> Vec<Arc<DocumentCollection>> {
        let mut candidates = self.collections.read().clone();
        candidates.extend(self.dropped.read().iter().cloned());
        candidates
    }

    /// Drop a collection
    ///
    /// The handle disappears from lookups immediately but stays visible
    /// to the cleanup worker; the actual teardown is pushed onto the
    /// collection's barrier list, behind any reader still holding a pin,
    /// and executed by the cleanup thread.
    pub fn drop_collection(self: &Arc<Self>, name: &str) -> Result<()> {
        let collection = {
            let mut collections = self.collections.write();
            let position = collections
                .iter()
                .position(|c| c.name() == name)
                .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
            collections.remove(position)
        };
        self.dropped.write().push(Arc::clone(&collection));

        let teardown = Arc::clone(&collection);
        let database = Arc::downgrade(self);
        collection.barriers().add_collection_drop_callback(move || {
            teardown.destroy();
            if let Some(database) = database.upgrade() {
                database
                    .dropped
                    .write()
                    .retain(|c| !Arc::ptr_eq(c, &teardown));
            }
            true
        });
        self.wake_cleanup();
        Ok(())
    }
}
