//! Global transaction context
//!
//! One per database. The context owns the global read and write lists,
//! the per-collection registry (write lock plus write-transaction list),
//! and the local-id counter. `next_local_id` is the sole place the
//! counter moves, and it only moves under the context lock, so ids are
//! strictly increasing and the lists stay sorted.

use crate::list::TransactionList;
use crate::transaction::{AccessType, IsolationLevel, Transaction, TransactionStatus};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};
use vellum_core::{Error, Result, ServerId};
use vellum_storage::Database;

/// Per-collection state in the global context
pub struct GlobalCollection {
    name: String,
    /// Exclusive lock taken by write transactions, held across calls
    write_lock: Arc<Mutex<()>>,
    /// Write transactions currently touching the collection
    write_transactions: Mutex<TransactionList>,
}

impl GlobalCollection {
    fn new(name: &str) -> Arc<GlobalCollection> {
        Arc::new(GlobalCollection {
            name: name.to_string(),
            write_lock: Arc::new(Mutex::new(())),
            write_transactions: Mutex::new(TransactionList::new()),
        })
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection write lock, shared so guards can be held across calls
    pub(crate) fn write_lock(&self) -> &Arc<Mutex<()>> {
        &self.write_lock
    }

    /// Number of write transactions currently registered
    pub fn num_write_transactions(&self) -> usize {
        self.write_transactions.lock().len()
    }

    pub(crate) fn with_write_transactions<R>(
        &self,
        f: impl FnOnce(&mut TransactionList) -> R,
    ) -> R {
        f(&mut self.write_transactions.lock())
    }
}

struct ContextInner {
    last_local_id: u64,
    read_transactions: TransactionList,
    write_transactions: TransactionList,
    collections: FxHashMap<String, Arc<GlobalCollection>>,
}

/// The per-database transaction registry
pub struct TransactionContext {
    server_id: ServerId,
    database: Arc<Database>,
    inner: Mutex<ContextInner>,
}

impl TransactionContext {
    /// Create the context for a database
    pub fn new(database: Arc<Database>, server_id: ServerId) -> Arc<TransactionContext> {
        Arc::new(TransactionContext {
            server_id,
            database,
            inner: Mutex::new(ContextInner {
                last_local_id: 0,
                read_transactions: TransactionList::new(),
                write_transactions: TransactionList::new(),
                collections: FxHashMap::default(),
            }),
        })
    }

    /// Server component of transaction ids handed out here
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// The database this context tracks
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Begin a transaction in `Created` state
    pub fn begin(self: &Arc<Self>, isolation: IsolationLevel) -> Transaction {
        Transaction::new(Arc::clone(self), isolation)
    }

    /// Look up (or create) the global state of a collection
    pub fn global_collection(&self, name: &str) -> Arc<GlobalCollection> {
        let mut inner = self.inner.lock();
        Arc::clone(
            inner
                .collections
                .entry(name.to_string())
                .or_insert_with(|| GlobalCollection::new(name)),
        )
    }

    /// Drop a collection's global state
    ///
    /// Refused while write transactions still reference the collection.
    pub fn remove_collection(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(global) = inner.collections.get(name) {
            if global.num_write_transactions() > 0 {
                return Err(Error::InvalidState(format!(
                    "collection '{}' still has write transactions",
                    name
                )));
            }
            inner.collections.remove(name);
        }
        Ok(())
    }

    /// Register a transaction, assigning its local id
    ///
    /// Everything happens under the context lock: the id allocation, the
    /// insert into the global read or write list, and for writes the
    /// insert into each touched collection's write list.
    pub(crate) fn register(
        &self,
        access: AccessType,
        write_collections: &[String],
    ) -> Result<u64> {
        let mut inner = self.inner.lock();

        inner.last_local_id += 1;
        let id = inner.last_local_id;

        match access {
            AccessType::Read => inner.read_transactions.insert(id)?,
            AccessType::Write => inner.write_transactions.insert(id)?,
        }

        if access == AccessType::Write {
            for name in write_collections {
                let global = Arc::clone(
                    inner
                        .collections
                        .get(name)
                        .ok_or_else(|| Error::Internal("collection not in context".into()))?,
                );
                global.with_write_transactions(|list| list.insert(id))?;
            }
        }

        Ok(id)
    }

    /// Remove or mark a transaction when it completes
    pub(crate) fn complete(
        &self,
        id: u64,
        access: AccessType,
        status: TransactionStatus,
        write_collections: &[String],
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        match access {
            AccessType::Read => {
                // read transactions only ever finish
                debug_assert_eq!(status, TransactionStatus::Finished);
                debug!(id, "removing read transaction");
                inner.read_transactions.remove(id)
            }
            AccessType::Write => match status {
                TransactionStatus::Committed => {
                    debug!(id, "removing write transaction");
                    for name in write_collections {
                        if let Some(global) = inner.collections.get(name).cloned() {
                            global.with_write_transactions(|list| list.remove(id))?;
                        }
                    }
                    inner.write_transactions.remove(id)
                }
                TransactionStatus::Aborted => {
                    debug!(id, "updating write transaction status to aborted");
                    for name in write_collections {
                        if let Some(global) = inner.collections.get(name).cloned() {
                            global.with_write_transactions(|list| {
                                list.update(id, TransactionStatus::Aborted)
                            })?;
                        }
                    }
                    inner
                        .write_transactions
                        .update(id, TransactionStatus::Aborted)
                }
                _ => Err(Error::Internal(
                    "write transactions complete as committed or aborted".into(),
                )),
            },
        }
    }

    /// Number of running read transactions
    pub fn num_running_reads(&self) -> usize {
        self.inner.lock().read_transactions.num_running()
    }

    /// Number of running write transactions
    pub fn num_running_writes(&self) -> usize {
        self.inner.lock().write_transactions.num_running()
    }

    /// Log the context's lists at info level
    pub fn dump(&self) {
        let inner = self.inner.lock();
        info!(
            server = self.server_id.0,
            last_id = inner.last_local_id,
            "transaction context"
        );
        info!(
            running = inner.read_transactions.num_running(),
            length = inner.read_transactions.len(),
            aborted = inner.read_transactions.num_aborted(),
            "read transactions"
        );
        info!(
            running = inner.write_transactions.num_running(),
            length = inner.write_transactions.len(),
            aborted = inner.write_transactions.num_aborted(),
            "write transactions"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (tempfile::TempDir, Arc<TransactionContext>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new("db".into(), dir.path());
        (dir, TransactionContext::new(db, ServerId(1)))
    }

    #[test]
    fn test_local_ids_are_strictly_increasing() {
        let (_dir, ctx) = context();
        let a = ctx.register(AccessType::Read, &[]).unwrap();
        let b = ctx.register(AccessType::Read, &[]).unwrap();
        let c = ctx.register(AccessType::Read, &[]).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_global_collection_is_created_once() {
        let (_dir, ctx) = context();
        let a = ctx.global_collection("users");
        let b = ctx.global_collection("users");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "users");
    }

    #[test]
    fn test_write_registration_reaches_collection_lists() {
        let (_dir, ctx) = context();
        let global = ctx.global_collection("users");
        let id = ctx
            .register(AccessType::Write, &["users".to_string()])
            .unwrap();

        assert_eq!(global.num_write_transactions(), 1);
        assert_eq!(ctx.num_running_writes(), 1);

        ctx.complete(
            id,
            AccessType::Write,
            TransactionStatus::Committed,
            &["users".to_string()],
        )
        .unwrap();
        assert_eq!(global.num_write_transactions(), 0);
        assert_eq!(ctx.num_running_writes(), 0);
    }

    #[test]
    fn test_aborted_write_stays_visible() {
        let (_dir, ctx) = context();
        ctx.global_collection("users");
        let id = ctx
            .register(AccessType::Write, &["users".to_string()])
            .unwrap();

        ctx.complete(
            id,
            AccessType::Write,
            TransactionStatus::Aborted,
            &["users".to_string()],
        )
        .unwrap();

        // the entry is kept with aborted status, not removed
        assert_eq!(ctx.num_running_writes(), 0);
        let inner = ctx.inner.lock();
        assert_eq!(inner.write_transactions.num_aborted(), 1);
        assert_eq!(inner.write_transactions.len(), 1);
    }

    #[test]
    fn test_remove_collection_refused_with_live_writers() {
        let (_dir, ctx) = context();
        ctx.global_collection("users");
        ctx.register(AccessType::Write, &["users".to_string()])
            .unwrap();

        assert!(ctx.remove_collection("users").is_err());
    }

    #[test]
    fn test_remove_collection_without_writers() {
        let (_dir, ctx) = context();
        ctx.global_collection("users");
        ctx.remove_collection("users").unwrap();
        ctx.remove_collection("unknown").unwrap();
    }
}
