//! The polymorphic index family
//!
//! Every collection carries an ordered list of indexes behind one contract:
//! insert, update, remove, describe, and an optional periodic cleanup hook.
//! Concrete variants:
//!
//! - [`PrimaryIndex`]: identity; the lookup itself lives in the collection's
//!   key map
//! - [`EdgeIndex`]: directional multi-key table for edge collections
//! - [`HashIndex`]: unique or multi equality index
//! - [`SkiplistIndex`]: ordered multi-key index with an operator-tree lookup
//! - [`GeoIndex`]: one list attribute or two numeric attributes, with
//!   `within`/`nearest` lookups
//! - [`FulltextIndex`]: tokenized text with incremental tombstone compaction
//! - [`BitarrayIndex`]: cross product of enumerated attribute values
//! - [`PriorityQueueIndex`]: top-n retrieval over one numeric attribute
//! - [`CapConstraint`]: FIFO size bound, a pseudo-index with no fields
//!
//! Index structures are mutated only under the owning collection's write
//! lock; reads under a shared lock are safe. Descriptions are persisted as
//! `index-<iid>.json` in the collection directory (see [`persist`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitarray;
pub mod cap;
pub mod edge;
pub mod fulltext;
pub mod geo;
pub mod hash;
pub mod key;
pub mod operator;
pub mod persist;
pub mod pqueue;
pub mod primary;
pub mod skiplist;

pub use bitarray::BitarrayIndex;
pub use cap::CapConstraint;
pub use edge::{EdgeDirection, EdgeIndex};
pub use fulltext::{FulltextIndex, MAX_WORD_LENGTH};
pub use geo::{GeoCoordinate, GeoIndex};
pub use hash::HashIndex;
pub use key::{IndexKey, KeyValue};
pub use operator::{IndexOperator, RelationOp};
pub use pqueue::PriorityQueueIndex;
pub use primary::PrimaryIndex;
pub use skiplist::SkiplistIndex;

use std::any::Any;
use vellum_core::{DocumentRef, IndexId, Result, ShapedDocument};

/// The concrete kind of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Identity index, one per collection, `iid = 0`
    Primary,
    /// Directional edge table, one per edge collection
    Edge,
    /// Equality index, unique or multi
    Hash,
    /// Ordered, range-capable multi-key index
    Skiplist,
    /// Geo index over one list attribute
    Geo1,
    /// Geo index over two numeric attributes
    Geo2,
    /// Tokenized text index
    Fulltext,
    /// Enumerated-value cross-product index
    Bitarray,
    /// Numeric top-n index
    PriorityQueue,
    /// FIFO size bound
    Cap,
}

impl IndexKind {
    /// Stable type name used in descriptions
    pub fn type_name(&self) -> &'static str {
        match self {
            IndexKind::Primary => "primary",
            IndexKind::Edge => "edge",
            IndexKind::Hash => "hash",
            IndexKind::Skiplist => "skiplist",
            IndexKind::Geo1 => "geo1",
            IndexKind::Geo2 => "geo2",
            IndexKind::Fulltext => "fulltext",
            IndexKind::Bitarray => "bitarray",
            IndexKind::PriorityQueue => "priorityqueue",
            IndexKind::Cap => "cap",
        }
    }

    /// Whether the index only yields meaningful results when every field
    /// is assigned a value
    pub fn needs_full_coverage(&self) -> bool {
        match self {
            IndexKind::Primary
            | IndexKind::Edge
            | IndexKind::Hash
            | IndexKind::Geo1
            | IndexKind::Geo2
            | IndexKind::Fulltext
            | IndexKind::PriorityQueue
            | IndexKind::Cap => true,
            IndexKind::Bitarray | IndexKind::Skiplist => false,
        }
    }
}

/// The contract every index variant implements
///
/// `update` is atomic from the caller's viewpoint: it behaves as
/// `remove(old)` followed by `insert(new)`, with per-variant elision.
/// `remove` is idempotent. Advisory errors (see
/// [`vellum_core::Error::is_advisory`]) mean the document does not
/// participate in the index and never abort the caller's transaction.
pub trait Index: Send + Sync {
    /// Index id; 0 is reserved for the primary index
    fn id(&self) -> IndexId;

    /// Concrete kind
    fn kind(&self) -> IndexKind;

    /// Whether the index enforces uniqueness
    fn is_unique(&self) -> bool;

    /// Indexed field names, in declaration order
    fn fields(&self) -> &[String];

    /// Make `doc` retrievable by the index's key function
    fn insert(&self, doc: &DocumentRef) -> Result<()>;

    /// Replace the entry derived from `old` with one derived from `new_doc`
    fn update(&self, new_doc: &DocumentRef, old: &ShapedDocument) -> Result<()>;

    /// Remove `doc` from the index
    fn remove(&self, doc: &DocumentRef) -> Result<()>;

    /// Structured description, the exact JSON persisted on disk
    fn describe(&self) -> serde_json::Value;

    /// Periodic maintenance hook, driven by the cleanup thread
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Downcast support for variant-specific lookup surfaces
    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}
