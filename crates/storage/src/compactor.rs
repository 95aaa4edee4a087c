//! Compactor coordination
//!
//! The compactor thread and the cleanup thread coordinate through one
//! try-lock: whoever holds it may touch collection datafiles. The cleanup
//! thread never blocks on it. Writers that must keep the compactor away
//! for a while (for example while a batch import runs) register blockers
//! with a time-to-live; the cleanup thread sweeps expired blockers every
//! iteration.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vellum_core::{Error, Result};

struct State {
    locked: bool,
    blockers: FxHashMap<u64, Instant>,
    next_blocker: u64,
}

/// The cleanup/compactor coordination lock with blocker expiry
pub struct CompactorLock {
    state: Mutex<State>,
}

impl CompactorLock {
    /// Create an unlocked instance with no blockers
    pub fn new() -> Self {
        CompactorLock {
            state: Mutex::new(State {
                locked: false,
                blockers: FxHashMap::default(),
                next_blocker: 0,
            }),
        }
    }

    /// Try to acquire the lock without blocking
    ///
    /// Fails while the lock is held or any blocker is alive.
    pub fn try_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.locked || !state.blockers.is_empty() {
            return false;
        }
        state.locked = true;
        true
    }

    /// Release the lock
    pub fn unlock(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.locked, "unlock without holding the compactor lock");
        state.locked = false;
    }

    /// Register a blocker that keeps the compactor away for `ttl`
    pub fn add_blocker(&self, ttl: Duration) -> u64 {
        let mut state = self.state.lock();
        state.next_blocker += 1;
        let id = state.next_blocker;
        state.blockers.insert(id, Instant::now() + ttl);
        id
    }

    /// Remove a blocker before its ttl runs out
    pub fn remove_blocker(&self, id: u64) -> Result<()> {
        if self.state.lock().blockers.remove(&id).is_some() {
            Ok(())
        } else {
            Err(Error::Internal(format!("unknown compaction blocker {}", id)))
        }
    }

    /// Sweep blockers whose ttl has expired; returns the number removed
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();
        let before = state.blockers.len();
        state.blockers.retain(|id, expires| {
            if *expires > now {
                true
            } else {
                warn!(blocker = id, "expiring stale compaction blocker");
                false
            }
        });
        let removed = before - state.blockers.len();
        if removed > 0 {
            debug!(removed, "swept expired compaction blockers");
        }
        removed
    }
}

impl Default for CompactorLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_lock_is_exclusive() {
        let lock = CompactorLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn test_blocker_prevents_locking() {
        let lock = CompactorLock::new();
        let blocker = lock.add_blocker(Duration::from_secs(60));
        assert!(!lock.try_lock());
        lock.remove_blocker(blocker).unwrap();
        assert!(lock.try_lock());
    }

    #[test]
    fn test_expired_blockers_are_swept() {
        let lock = CompactorLock::new();
        lock.add_blocker(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(lock.cleanup_expired(), 1);
        assert!(lock.try_lock());
    }

    #[test]
    fn test_remove_unknown_blocker_is_an_error() {
        let lock = CompactorLock::new();
        assert!(lock.remove_blocker(42).is_err());
    }
}
