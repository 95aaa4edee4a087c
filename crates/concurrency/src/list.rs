//! Transaction lists
//!
//! A list is a vector of (local id, status) entries plus running/aborted
//! counters. Ids are allocated monotonically under the context lock, so
//! plain appends keep the vector sorted and lookups are binary searches.
//! The caller holds the owning lock for every operation here.

use crate::transaction::TransactionStatus;
use tracing::{error, trace};
use vellum_core::{Error, Result};

/// One registered transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEntry {
    /// Context-local transaction id
    pub id: u64,
    /// Last observed status
    pub status: TransactionStatus,
}

/// Sorted list of transactions with status counters
#[derive(Debug, Default)]
pub struct TransactionList {
    entries: Vec<ListEntry>,
    num_running: usize,
    num_aborted: usize,
}

impl TransactionList {
    /// Create an empty list
    pub fn new() -> Self {
        TransactionList::default()
    }

    /// Register a running transaction
    ///
    /// Ids arrive in increasing order, so the entry is appended.
    pub fn insert(&mut self, id: u64) -> Result<()> {
        debug_assert!(
            self.entries.last().map_or(true, |last| last.id < id),
            "transaction ids must be inserted in increasing order"
        );
        self.entries.push(ListEntry {
            id,
            status: TransactionStatus::Running,
        });
        self.num_running += 1;
        Ok(())
    }

    /// Locate a transaction by id
    pub fn find(&self, id: u64) -> Option<&ListEntry> {
        trace!(id, "looking up transaction");
        let position = self.entries.binary_search_by_key(&id, |e| e.id).ok()?;
        Some(&self.entries[position])
    }

    /// Remove a transaction that finished cleanly
    pub fn remove(&mut self, id: u64) -> Result<()> {
        let Ok(position) = self.entries.binary_search_by_key(&id, |e| e.id) else {
            error!(id, "logical error in transaction list");
            return Err(Error::Internal("transaction not found in list".into()));
        };

        if self.entries[position].status == TransactionStatus::Running {
            self.num_running -= 1;
        } else {
            error!(id, "logical error in transaction list");
            return Err(Error::Internal(
                "removing a transaction that is not running".into(),
            ));
        }

        self.entries.remove(position);
        Ok(())
    }

    /// Mark a transaction aborted, keeping the entry for visibility
    pub fn update(&mut self, id: u64, status: TransactionStatus) -> Result<()> {
        debug_assert_eq!(status, TransactionStatus::Aborted);

        let Ok(position) = self.entries.binary_search_by_key(&id, |e| e.id) else {
            error!(id, "logical error in transaction list");
            return Err(Error::Internal("transaction not found in list".into()));
        };

        if self.entries[position].status == TransactionStatus::Running {
            self.num_running -= 1;
        } else {
            error!(id, "logical error in transaction list");
        }
        if status == TransactionStatus::Aborted {
            self.num_aborted += 1;
        }
        self.entries[position].status = status;
        Ok(())
    }

    /// Number of registered entries, aborted ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of running transactions
    pub fn num_running(&self) -> usize {
        self.num_running
    }

    /// Number of aborted transactions still listed
    pub fn num_aborted(&self) -> usize {
        self.num_aborted
    }

    /// All entries, sorted by id
    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }
}
