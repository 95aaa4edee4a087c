//! Transactions
//!
//! A transaction collects its collections while in `Created` state, then
//! `start` acquires the collection locks in ascending name order and
//! registers the transaction with the context. Because every transaction
//! sorts its collections the same way, no two transactions can wait on
//! each other in a cycle. Locks are released in reverse order.
//!
//! Status machine: `Created → Running → {Committed, Aborted, Finished,
//! Failed}`. Read transactions finish, write transactions commit or
//! abort; a failed `start` leaves the transaction in `Failed`.

use crate::context::TransactionContext;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use std::sync::Arc;
use tracing::{debug, info};
use vellum_core::{Error, Result, TransactionId};
use vellum_storage::DocumentCollection;

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Collecting collections, not yet started
    Created,
    /// Started, locks held
    Running,
    /// Write transaction released successfully
    Committed,
    /// Write transaction rolled back
    Aborted,
    /// Read transaction released
    Finished,
    /// `start` failed, locks released
    Failed,
}

impl TransactionStatus {
    /// Stable lowercase name, used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "created",
            TransactionStatus::Running => "running",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
            TransactionStatus::Finished => "finished",
            TransactionStatus::Failed => "failed",
        }
    }
}

/// Read or write access to a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessType {
    /// Shared access
    Read,
    /// Exclusive access
    Write,
}

impl AccessType {
    /// Stable lowercase name, used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Read => "read",
            AccessType::Write => "write",
        }
    }
}

/// Isolation level of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Reads observe committed state at statement granularity
    #[default]
    ReadCommitted,
    /// Reads repeat within the transaction
    ReadRepeatable,
}

/// One collection participating in a transaction
struct ParticipatingCollection {
    name: String,
    access: AccessType,
    handle: Option<Arc<DocumentCollection>>,
    /// Held write lock; `None` for read access or before `start`
    lock: Option<ArcMutexGuard<RawMutex, ()>>,
}

/// A read or write transaction against one or more collections
pub struct Transaction {
    context: Arc<TransactionContext>,
    id: TransactionId,
    status: TransactionStatus,
    access: AccessType,
    isolation: IsolationLevel,
    collections: Vec<ParticipatingCollection>,
}

impl Transaction {
    pub(crate) fn new(context: Arc<TransactionContext>, isolation: IsolationLevel) -> Transaction {
        let server_id = context.server_id();
        Transaction {
            context,
            id: TransactionId {
                server_id,
                local_id: 0,
            },
            status: TransactionStatus::Created,
            access: AccessType::Read,
            isolation,
            collections: Vec::new(),
        }
    }

    /// The transaction id; the local part is 0 until `start`
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Read or write, the maximum over the added collections
    pub fn access(&self) -> AccessType {
        self.access
    }

    /// Configured isolation level
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Names of the participating collections, in lock order
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }

    fn write_collection_names(&self) -> Vec<String> {
        self.collections
            .iter()
            .filter(|c| c.access == AccessType::Write)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Add a collection, upgrading access types where needed
    ///
    /// Only allowed in `Created` state. The collection vector is kept in
    /// ascending name order; adding a name twice upgrades its access from
    /// read to write if needed, and the transaction type upgrades the
    /// same way.
    pub fn add_collection(&mut self, name: &str, access: AccessType) -> Result<()> {
        if self.status != TransactionStatus::Created {
            return Err(Error::InvalidState(
                "collections can only be added before start".into(),
            ));
        }

        if access == AccessType::Write && self.access == AccessType::Read {
            self.access = AccessType::Write;
        }

        match self
            .collections
            .binary_search_by(|c| c.name.as_str().cmp(name))
        {
            Ok(position) => {
                let existing = &mut self.collections[position];
                if access == AccessType::Write && existing.access == AccessType::Read {
                    existing.access = AccessType::Write;
                }
            }
            Err(position) => {
                self.collections.insert(
                    position,
                    ParticipatingCollection {
                        name: name.to_string(),
                        access,
                        handle: None,
                        lock: None,
                    },
                );
            }
        }
        Ok(())
    }

    /// The handle of a participating collection, available while running
    pub fn collection(&self, name: &str) -> Option<&Arc<DocumentCollection>> {
        self.collections
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.handle.as_ref())
    }

    /// Start the transaction: acquire locks and register
    ///
    /// Locks are taken in the collection vector's (ascending name) order:
    /// read collections are only resolved, write collections additionally
    /// take their context write lock. Any failure releases everything
    /// acquired so far and leaves the transaction `Failed`.
    pub fn start(&mut self) -> Result<()> {
        if self.status != TransactionStatus::Created {
            return Err(Error::InvalidState("transaction already started".into()));
        }
        if self.collections.is_empty() {
            return Err(Error::QueryEmpty);
        }

        debug!("acquiring collection locks");
        if let Err(err) = self.acquire_locks() {
            self.status = TransactionStatus::Failed;
            self.release_locks();
            return Err(err);
        }

        let write_names = self.write_collection_names();
        match self.context.register(self.access, &write_names) {
            Ok(local_id) => {
                self.id.local_id = local_id;
                self.status = TransactionStatus::Running;
                Ok(())
            }
            Err(err) => {
                self.status = TransactionStatus::Failed;
                self.release_locks();
                Err(err)
            }
        }
    }

    fn acquire_locks(&mut self) -> Result<()> {
        let database = Arc::clone(self.context.database());
        for participating in self.collections.iter_mut() {
            participating.handle = Some(database.collection(&participating.name)?);

            if participating.access == AccessType::Write {
                debug!(
                    collection = %participating.name,
                    "acquiring write-lock on collection"
                );
                let global = self.context.global_collection(&participating.name);
                participating.lock = Some(global.write_lock().lock_arc());
            }
        }
        Ok(())
    }

    fn release_locks(&mut self) {
        debug!("releasing collection locks");
        for participating in self.collections.iter_mut().rev() {
            if participating.lock.take().is_some() {
                debug!(
                    collection = %participating.name,
                    "released write-lock on collection"
                );
            }
            participating.handle = None;
        }
    }

    fn complete(&mut self, status: TransactionStatus) -> Result<()> {
        if self.status != TransactionStatus::Running {
            return Err(Error::InvalidState(format!(
                "cannot complete a transaction in status '{}'",
                self.status.as_str()
            )));
        }

        let write_names = self.write_collection_names();
        let result = self
            .context
            .complete(self.id.local_id, self.access, status, &write_names);
        if result.is_ok() {
            self.status = status;
        }
        self.release_locks();
        result
    }

    /// Commit a running write transaction
    pub fn commit(&mut self) -> Result<()> {
        if self.access == AccessType::Read {
            return Err(Error::InvalidState(
                "read transactions finish, they do not commit".into(),
            ));
        }
        self.complete(TransactionStatus::Committed)
    }

    /// Abort a running write transaction
    ///
    /// The global list entries keep the aborted status for visibility.
    pub fn abort(&mut self) -> Result<()> {
        if self.access == AccessType::Read {
            return Err(Error::InvalidState(
                "read transactions finish, they do not abort".into(),
            ));
        }
        self.complete(TransactionStatus::Aborted)
    }

    /// Release the transaction: reads finish, writes commit
    pub fn finish(&mut self) -> Result<()> {
        match self.access {
            AccessType::Read => self.complete(TransactionStatus::Finished),
            AccessType::Write => self.complete(TransactionStatus::Committed),
        }
    }

    /// Log the transaction and its collections at info level
    pub fn dump(&self) {
        info!(
            id = %self.id,
            access = self.access.as_str(),
            status = self.status.as_str(),
            "transaction"
        );
        for participating in &self.collections {
            info!(
                collection = %participating.name,
                access = participating.access.as_str(),
                "- collection"
            );
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.status == TransactionStatus::Running {
            let status = match self.access {
                AccessType::Read => TransactionStatus::Finished,
                AccessType::Write => TransactionStatus::Aborted,
            };
            let _ = self.complete(status);
        } else {
            self.release_locks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_core::ServerId;
    use vellum_storage::{CollectionKind, Database};

    fn setup(collections: &[&str]) -> (tempfile::TempDir, Arc<TransactionContext>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new("db".into(), dir.path());
        for name in collections {
            db.create_collection(name, CollectionKind::Document)
                .unwrap();
        }
        (dir, TransactionContext::new(db, ServerId(1)))
    }

    #[test]
    fn test_collections_kept_in_ascending_order() {
        let (_dir, ctx) = setup(&["a", "b", "c"]);
        let mut trx = ctx.begin(IsolationLevel::default());
        trx.add_collection("c", AccessType::Write).unwrap();
        trx.add_collection("a", AccessType::Read).unwrap();
        trx.add_collection("b", AccessType::Write).unwrap();

        assert_eq!(trx.collection_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_adding_same_collection_upgrades_access() {
        let (_dir, ctx) = setup(&["a"]);
        let mut trx = ctx.begin(IsolationLevel::default());
        trx.add_collection("a", AccessType::Read).unwrap();
        assert_eq!(trx.access(), AccessType::Read);

        trx.add_collection("a", AccessType::Write).unwrap();
        assert_eq!(trx.access(), AccessType::Write);
        assert_eq!(trx.collection_names().len(), 1);
    }

    #[test]
    fn test_add_collection_after_start_rejected() {
        let (_dir, ctx) = setup(&["a"]);
        let mut trx = ctx.begin(IsolationLevel::default());
        trx.add_collection("a", AccessType::Read).unwrap();
        trx.start().unwrap();
        assert!(trx.add_collection("b", AccessType::Read).is_err());
        trx.finish().unwrap();
    }

    #[test]
    fn test_start_without_collections_rejected() {
        let (_dir, ctx) = setup(&[]);
        let mut trx = ctx.begin(IsolationLevel::default());
        assert!(matches!(trx.start().unwrap_err(), Error::QueryEmpty));
    }

    #[test]
    fn test_start_against_missing_collection_fails() {
        let (_dir, ctx) = setup(&[]);
        let mut trx = ctx.begin(IsolationLevel::default());
        trx.add_collection("ghost", AccessType::Write).unwrap();
        assert!(trx.start().is_err());
        assert_eq!(trx.status(), TransactionStatus::Failed);
    }

    #[test]
    fn test_read_transaction_lifecycle() {
        let (_dir, ctx) = setup(&["a"]);
        let mut trx = ctx.begin(IsolationLevel::default());
        trx.add_collection("a", AccessType::Read).unwrap();
        trx.start().unwrap();

        assert_eq!(trx.status(), TransactionStatus::Running);
        assert!(trx.id().local_id > 0);
        assert_eq!(ctx.num_running_reads(), 1);

        trx.finish().unwrap();
        assert_eq!(trx.status(), TransactionStatus::Finished);
        assert_eq!(ctx.num_running_reads(), 0);
    }

    #[test]
    fn test_write_transaction_commit() {
        let (_dir, ctx) = setup(&["a"]);
        let mut trx = ctx.begin(IsolationLevel::default());
        trx.add_collection("a", AccessType::Write).unwrap();
        trx.start().unwrap();

        let col = trx.collection("a").unwrap();
        col.insert(Some("d1".into()), json!({"x": 1})).unwrap();

        trx.commit().unwrap();
        assert_eq!(trx.status(), TransactionStatus::Committed);
        assert_eq!(ctx.num_running_writes(), 0);
    }

    #[test]
    fn test_read_transaction_cannot_commit() {
        let (_dir, ctx) = setup(&["a"]);
        let mut trx = ctx.begin(IsolationLevel::default());
        trx.add_collection("a", AccessType::Read).unwrap();
        trx.start().unwrap();
        assert!(trx.commit().is_err());
        trx.finish().unwrap();
    }

    #[test]
    fn test_abort_releases_locks() {
        let (_dir, ctx) = setup(&["a"]);
        let mut trx = ctx.begin(IsolationLevel::default());
        trx.add_collection("a", AccessType::Write).unwrap();
        trx.start().unwrap();
        trx.abort().unwrap();
        assert_eq!(trx.status(), TransactionStatus::Aborted);

        // the write lock is free again
        let mut second = ctx.begin(IsolationLevel::default());
        second.add_collection("a", AccessType::Write).unwrap();
        second.start().unwrap();
        second.commit().unwrap();
    }

    #[test]
    fn test_dropping_running_write_aborts() {
        let (_dir, ctx) = setup(&["a"]);
        {
            let mut trx = ctx.begin(IsolationLevel::default());
            trx.add_collection("a", AccessType::Write).unwrap();
            trx.start().unwrap();
            // dropped while running
        }
        assert_eq!(ctx.num_running_writes(), 0);

        let mut second = ctx.begin(IsolationLevel::default());
        second.add_collection("a", AccessType::Write).unwrap();
        second.start().unwrap();
        second.commit().unwrap();
    }

    #[test]
    fn test_monotone_ids_across_transactions() {
        let (_dir, ctx) = setup(&["a"]);
        let mut previous = 0;
        for _ in 0..5 {
            let mut trx = ctx.begin(IsolationLevel::default());
            trx.add_collection("a", AccessType::Read).unwrap();
            trx.start().unwrap();
            assert!(trx.id().local_id > previous);
            previous = trx.id().local_id;
            trx.finish().unwrap();
        }
    }
}
