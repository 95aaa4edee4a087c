//! Write-ahead log logfiles
//!
//! A logfile wraps one preallocated datafile. Its seal status runs
//! `Unknown → Unsealed → SealRequested → Sealed`: writers request the
//! seal, an external sealer performs it. Its collection status runs
//! `Uncollected → CollectionRequested → Done` once the sealed content has
//! been moved into collection datafiles.
//!
//! A logfile accepts a marker of `n` bytes iff it is unsealed and its
//! free space (allocated size minus footer minus current size) covers
//! `n`. A sealed logfile reports zero free space.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use vellum_core::{Error, Result, Tick};
use vellum_storage::Datafile;

/// Seal state of a logfile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealStatus {
    /// Freshly created or opened, not yet in service
    Unknown,
    /// Accepting writes
    Unsealed,
    /// A seal was requested, the sealer has not finished
    SealRequested,
    /// Sealed, content is immutable
    Sealed,
}

/// Collection state of a logfile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    /// Content not yet moved into collection datafiles
    Uncollected,
    /// Collection was requested
    CollectionRequested,
    /// Content fully collected
    Done,
}

struct Status {
    seal: SealStatus,
    collection: CollectionStatus,
}

/// One write-ahead log segment
pub struct Logfile {
    datafile: Arc<Datafile>,
    status: Mutex<Status>,
}

impl Logfile {
    /// Create a new preallocated logfile of `size` bytes
    pub fn create(path: &Path, id: Tick, size: u64) -> Result<Logfile> {
        let datafile = Datafile::create(path, id, size).map_err(|err| {
            error!(path = %path.display(), %err, "unable to create logfile");
            err
        })?;

        Ok(Logfile {
            datafile: Arc::new(datafile),
            status: Mutex::new(Status {
                seal: SealStatus::Unknown,
                collection: CollectionStatus::Uncollected,
            }),
        })
    }

    /// Open an existing logfile
    ///
    /// The status starts out `Unknown`/`Uncollected`; the real state is
    /// derived from a footer scan by the recovery procedure.
    pub fn open(path: &Path) -> Result<Logfile> {
        let datafile = Datafile::open(path).map_err(|err| {
            error!(path = %path.display(), %err, "unable to open logfile");
            err
        })?;

        Ok(Logfile {
            datafile: Arc::new(datafile),
            status: Mutex::new(Status {
                seal: SealStatus::Unknown,
                collection: CollectionStatus::Uncollected,
            }),
        })
    }

    /// The logfile id (the underlying datafile's fid)
    pub fn id(&self) -> Tick {
        self.datafile.fid()
    }

    /// The underlying datafile
    pub fn datafile(&self) -> &Arc<Datafile> {
        &self.datafile
    }

    /// Fixed allocation size in bytes
    pub fn allocated_size(&self) -> u64 {
        self.datafile.maximal_size()
    }

    /// Current seal status
    pub fn seal_status(&self) -> SealStatus {
        self.status.lock().seal
    }

    /// Current collection status
    pub fn collection_status(&self) -> CollectionStatus {
        self.status.lock().collection
    }

    /// Whether the logfile is sealed
    pub fn is_sealed(&self) -> bool {
        self.seal_status() == SealStatus::Sealed
    }

    /// Free space in bytes; sealed logfiles report zero
    pub fn free_size(&self) -> u64 {
        if self.is_sealed() {
            return 0;
        }
        self.allocated_size() - self.datafile.footer_size() - self.datafile.current_size()
    }

    /// Whether a marker of `size` bytes can be written
    pub fn is_writeable(&self, size: u64) -> bool {
        if self.seal_status() != SealStatus::Unsealed {
            return false;
        }
        self.free_size() >= size
    }

    /// Put the logfile into service
    ///
    /// The only transition out of `Unknown`; performed when the logfile
    /// enters the active set.
    pub fn set_unsealed(&self) -> Result<()> {
        let mut status = self.status.lock();
        if status.seal != SealStatus::Unknown {
            return Err(Error::InvalidState(format!(
                "logfile {} cannot be unsealed in its current state",
                self.id()
            )));
        }
        status.seal = SealStatus::Unsealed;
        Ok(())
    }

    /// Request the seal
    ///
    /// Precondition: the logfile is unsealed. The transition to `Sealed`
    /// is performed by the sealer via [`Logfile::set_sealed`].
    pub fn seal(&self) -> Result<()> {
        let mut status = self.status.lock();
        if status.seal != SealStatus::Unsealed {
            return Err(Error::InvalidState(format!(
                "logfile {} is not unsealed, cannot request seal",
                self.id()
            )));
        }
        info!(logfile = %self.id(), "sealing logfile");
        status.seal = SealStatus::SealRequested;
        Ok(())
    }

    /// Complete a requested seal; called by the sealer
    pub fn set_sealed(&self) -> Result<()> {
        let mut status = self.status.lock();
        if status.seal != SealStatus::SealRequested {
            return Err(Error::InvalidState(format!(
                "logfile {} has no pending seal request",
                self.id()
            )));
        }
        status.seal = SealStatus::Sealed;
        Ok(())
    }

    /// Whether the logfile may be collected
    pub fn can_collect(&self) -> bool {
        let status = self.status.lock();
        status.seal == SealStatus::Sealed && status.collection == CollectionStatus::Uncollected
    }

    /// Mark collection as requested
    pub fn set_collection_requested(&self) -> Result<()> {
        let mut status = self.status.lock();
        if status.collection != CollectionStatus::Uncollected {
            return Err(Error::InvalidState(format!(
                "logfile {} is not uncollected",
                self.id()
            )));
        }
        info!(logfile = %self.id(), "requesting collection for logfile");
        status.collection = CollectionStatus::CollectionRequested;
        Ok(())
    }

    /// Mark collection as done
    pub fn set_collection_done(&self) -> Result<()> {
        let mut status = self.status.lock();
        if status.collection != CollectionStatus::CollectionRequested {
            return Err(Error::InvalidState(format!(
                "logfile {} has no pending collection request",
                self.id()
            )));
        }
        info!(logfile = %self.id(), "collection done for logfile");
        status.collection = CollectionStatus::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logfile(dir: &Path, id: u64, size: u64) -> Logfile {
        Logfile::create(&dir.join(format!("logfile-{}.db", id)), Tick(id), size).unwrap()
    }

    #[test]
    fn test_create_starts_unknown_and_uncollected() {
        let dir = tempfile::tempdir().unwrap();
        let log = logfile(dir.path(), 1, 4096);
        assert_eq!(log.seal_status(), SealStatus::Unknown);
        assert_eq!(log.collection_status(), CollectionStatus::Uncollected);
        assert_eq!(log.id(), Tick(1));
    }

    #[test]
    fn test_unknown_logfile_is_not_writeable() {
        let dir = tempfile::tempdir().unwrap();
        let log = logfile(dir.path(), 1, 4096);
        assert!(!log.is_writeable(1));
    }

    #[test]
    fn test_writeable_tracks_free_size() {
        let dir = tempfile::tempdir().unwrap();
        let log = logfile(dir.path(), 1, 4096);
        log.set_unsealed().unwrap();

        let free = log.free_size();
        assert!(free > 0);
        assert!(log.is_writeable(free));
        assert!(!log.is_writeable(free + 1));

        log.datafile().advance(free).unwrap();
        assert_eq!(log.free_size(), 0);
        assert!(!log.is_writeable(1));
        assert!(log.is_writeable(0));
    }

    #[test]
    fn test_seal_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let log = logfile(dir.path(), 1, 4096);

        // seal requires the unsealed state
        assert!(log.seal().is_err());
        log.set_unsealed().unwrap();
        log.seal().unwrap();
        assert_eq!(log.seal_status(), SealStatus::SealRequested);

        // request is not writeable and not yet sealed
        assert!(!log.is_writeable(1));
        assert!(!log.is_sealed());

        log.set_sealed().unwrap();
        assert!(log.is_sealed());
        assert_eq!(log.free_size(), 0);

        // repeated transitions are refused
        assert!(log.seal().is_err());
        assert!(log.set_sealed().is_err());
        assert!(log.set_unsealed().is_err());
    }

    #[test]
    fn test_can_collect_requires_sealed_and_uncollected() {
        let dir = tempfile::tempdir().unwrap();
        let log = logfile(dir.path(), 1, 4096);
        assert!(!log.can_collect());

        log.set_unsealed().unwrap();
        log.seal().unwrap();
        log.set_sealed().unwrap();
        assert!(log.can_collect());

        log.set_collection_requested().unwrap();
        assert!(!log.can_collect());
        log.set_collection_done().unwrap();
        assert_eq!(log.collection_status(), CollectionStatus::Done);
    }

    #[test]
    fn test_collection_transitions_are_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let log = logfile(dir.path(), 1, 4096);

        assert!(log.set_collection_done().is_err());
        log.set_collection_requested().unwrap();
        assert!(log.set_collection_requested().is_err());
        log.set_collection_done().unwrap();
        assert!(log.set_collection_done().is_err());
    }

    #[test]
    fn test_open_existing_logfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logfile-9.db");
        Logfile::create(&path, Tick(9), 8192).unwrap();

        let reopened = Logfile::open(&path).unwrap();
        assert_eq!(reopened.id(), Tick(9));
        assert_eq!(reopened.allocated_size(), 8192);
        assert_eq!(reopened.seal_status(), SealStatus::Unknown);
    }
}
