//! Cleanup worker
//!
//! One background thread per database. Each iteration it:
//!
//! 1. force-reaps cursors when the database is in its shutdown phase
//!    (cursors may hold barriers, collections cannot close under them)
//! 2. try-locks the compactor; when acquired, snapshots the collection
//!    list and, per collection, runs the index cleanup hooks every
//!    `index_iterations` ticks and then the barrier progression rule
//! 3. reaps expired cursors every `shadow_iterations` ticks
//! 4. sweeps expired compaction blockers
//! 5. waits on the database's condition variable for the configured
//!    interval, or exits when the state says stop

use crate::barrier::BarrierAction;
use crate::collection::DocumentCollection;
use crate::database::{Database, DatabaseState};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Tuning knobs for the cleanup worker
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Sleep interval between iterations
    pub interval: Duration,
    /// Every how many iterations unused cursors are reaped
    pub shadow_iterations: u64,
    /// Every how many iterations index cleanup hooks run
    pub index_iterations: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            interval: Duration::from_secs(1),
            shadow_iterations: 3,
            index_iterations: 5,
        }
    }
}

/// Handle to the background cleanup thread
pub struct CleanupWorker {
    database: Arc<Database>,
}

impl CleanupWorker {
    /// Create a worker bound to a database
    pub fn new(database: Arc<Database>) -> Self {
        CleanupWorker { database }
    }

    /// Start the background thread
    ///
    /// The thread runs until the database state becomes
    /// [`DatabaseState::Stopped`]; use the returned handle to join it.
    pub fn start(&self, config: CleanupConfig) -> JoinHandle<()> {
        let database = Arc::clone(&self.database);
        std::thread::Builder::new()
            .name(format!("cleanup-{}", database.name()))
            .spawn(move || run(database, config))
            .expect("spawning the cleanup thread")
    }
}

fn run(database: Arc<Database>, config: CleanupConfig) {
    let mut iterations: u64 = 0;

    loop {
        // the state may change during the iteration, act on one reading
        let state = database.state();
        iterations += 1;

        if state == DatabaseState::ShutdownCleanup {
            // cursors must go before collections are handled, otherwise
            // they may still hold barriers on collections about to close
            database.cursors().cleanup(true);
        }

        if database.compactor().try_lock() {
            let collections = database.cleanup_candidates();
            for collection in &collections {
                if iterations % config.index_iterations == 0 {
                    if let Err(err) = collection.cleanup_indexes() {
                        warn!(
                            collection = collection.name(),
                            %err,
                            "index cleanup failed"
                        );
                    }
                }
                cleanup_collection(collection);
            }
            database.compactor().unlock();
        }

        // the shadow and blocker sweeps run on every iteration, the final
        // pre-shutdown one included; only the wait is tied to running
        if iterations % config.shadow_iterations == 0 {
            database.cursors().cleanup(false);
        }

        database.compactor().cleanup_expired();

        if state == DatabaseState::Running {
            database.wait_cleanup(config.interval);
        }

        if database.state() == DatabaseState::Stopped {
            break;
        }
    }

    debug!(database = database.name(), "shutting down cleanup thread");
}

/// Run the barrier progression rule for one collection
///
/// Detaches and executes head actions until the head is a pin (or the
/// list is empty), or until an unload/drop callback reports that the
/// collection is gone.
pub fn cleanup_collection(collection: &Arc<DocumentCollection>) {
    loop {
        let Some(action) = collection.barriers().next_action() else {
            return;
        };

        match action {
            BarrierAction::DatafileDrop { datafile, callback } => {
                trace!(
                    collection = collection.name(),
                    fid = %datafile.fid(),
                    "running datafile drop callback"
                );
                callback(&datafile);
            }
            BarrierAction::DatafileRename { datafile, callback } => {
                trace!(
                    collection = collection.name(),
                    fid = %datafile.fid(),
                    "running datafile rename callback"
                );
                callback(&datafile);
            }
            BarrierAction::CollectionUnload { callback } => {
                if callback() {
                    // the collection may have been freed, stop touching it
                    return;
                }
            }
            BarrierAction::CollectionDrop { callback } => {
                if callback() {
                    return;
                }
            }
        }
    }
}
