//! Id and tick newtypes shared across the engine
//!
//! Ticks are the engine's monotonic clock: revisions, index ids and
//! transaction ids are all derived from one. A [`TickSource`] is the only
//! producer; it hands out strictly increasing values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic tick value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    /// The zero tick, used for "not yet assigned"
    pub const ZERO: Tick = Tick(0);

    /// Raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strictly increasing tick generator
///
/// One per database. All revision and index-id allocation funnels through
/// the same source so the values stay globally ordered.
#[derive(Debug)]
pub struct TickSource {
    current: AtomicU64,
}

impl TickSource {
    /// Create a source starting after `last` (the first tick handed out is
    /// `last + 1`)
    pub fn new(last: u64) -> Self {
        TickSource {
            current: AtomicU64::new(last),
        }
    }

    /// Allocate the next tick
    pub fn next(&self) -> Tick {
        Tick(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The last tick handed out
    pub fn last(&self) -> Tick {
        Tick(self.current.load(Ordering::SeqCst))
    }
}

impl Default for TickSource {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Document revision, a tick at mutation time
pub type Revision = Tick;

/// Index identifier
///
/// `IndexId(0)` is reserved for the primary index of every collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexId(pub u64);

impl IndexId {
    /// The reserved primary index id
    pub const PRIMARY: IndexId = IndexId(0);

    /// Raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server identifier, distinguishes transaction-id namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub u64);

/// Globally unique transaction id: `(server id, local id)`
///
/// Local ids are strictly increasing per transaction context, so the pair
/// is unique across servers and sortable within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Server the transaction originated on
    pub server_id: ServerId,
    /// Context-local, strictly increasing component
    pub local_id: u64,
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_id.0, self.local_id)
    }
}
