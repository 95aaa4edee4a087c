//! Cursor registry
//!
//! Result cursors hang on to document markers between client round trips.
//! Each cursor carries a time-to-live; the cleanup thread reaps expired
//! cursors periodically, and reaps all of them regardless of expiry when
//! the database enters its shutdown phase.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;
use vellum_core::DocumentRef;

struct Cursor {
    docs: Vec<DocumentRef>,
    position: usize,
    expires_at: Instant,
    ttl: Duration,
}

/// Registry of live result cursors
pub struct CursorRegistry {
    cursors: Mutex<FxHashMap<u64, Cursor>>,
    next_id: AtomicU64,
}

impl CursorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        CursorRegistry {
            cursors: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a result set, returning the cursor id
    pub fn create(&self, docs: Vec<DocumentRef>, ttl: Duration) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.cursors.lock().insert(
            id,
            Cursor {
                docs,
                position: 0,
                expires_at: Instant::now() + ttl,
                ttl,
            },
        );
        id
    }

    /// Fetch the next `count` documents, refreshing the cursor's expiry
    ///
    /// Returns `None` when the cursor does not exist (or has been reaped).
    /// An exhausted cursor is removed and yields an empty batch.
    pub fn next_batch(&self, id: u64, count: usize) -> Option<Vec<DocumentRef>> {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.get_mut(&id)?;

        let end = (cursor.position + count).min(cursor.docs.len());
        let batch = cursor.docs[cursor.position..end].to_vec();
        cursor.position = end;
        cursor.expires_at = Instant::now() + cursor.ttl;

        if cursor.position >= cursor.docs.len() {
            cursors.remove(&id);
        }
        Some(batch)
    }

    /// Discard a cursor
    pub fn discard(&self, id: u64) {
        self.cursors.lock().remove(&id);
    }

    /// Reap cursors
    ///
    /// With `force`, every cursor is released regardless of expiry; this
    /// is used during shutdown so that no cursor keeps a barrier on a
    /// collection that needs to close. Returns the number reaped.
    pub fn cleanup(&self, force: bool) -> usize {
        let mut cursors = self.cursors.lock();
        let before = cursors.len();
        if force {
            cursors.clear();
        } else {
            let now = Instant::now();
            cursors.retain(|_, cursor| cursor.expires_at > now);
        }
        let reaped = before - cursors.len();
        if reaped > 0 {
            debug!(reaped, force, "reaped cursors");
        }
        reaped
    }

    /// Number of live cursors
    pub fn len(&self) -> usize {
        self.cursors.lock().len()
    }

    /// Whether no cursors are live
    pub fn is_empty(&self) -> bool {
        self.cursors.lock().is_empty()
    }
}

impl Default for CursorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
