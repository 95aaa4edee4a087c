//! Error types for the Vellum storage engine
//!
//! One unified error type for the whole engine. We use `thiserror` for the
//! `Display` and `Error` impls. Every variant carries a stable numeric code
//! (see [`Error::code`]); clients key off the code, not the message.
//!
//! Two classes of variants deserve a note:
//!
//! - **Advisory warnings** (the `*AttributeMissing` and `*ItemMissing`
//!   family) are used for control flow between an index and its collection.
//!   They mean "this document does not participate in this index" and must
//!   never abort a transaction. Check with [`Error::is_advisory`].
//! - **Cluster transport errors** carry a severity ordering used when a
//!   retry budget is exhausted: `ClusterTimeout` beats
//!   `ClusterConnectionLost` beats `ClusterShardGone`.

use std::io;
use thiserror::Error;

/// Result type alias for Vellum operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the Vellum storage engine
#[derive(Debug, Error)]
pub enum Error {
    /// Memory allocation failed
    #[error("out of memory")]
    OutOfMemory,

    /// Internal error, a logic invariant was violated
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk data failed its checksum or structural validation
    #[error("data corruption: {0}")]
    Corruption(String),

    /// An option passed to a constructor was not usable
    #[error("illegal option: {0}")]
    IllegalOption(String),

    /// An empty query was handed to a lookup
    #[error("query is empty")]
    QueryEmpty,

    /// Named collection does not exist
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// Collection exists but has an unexpected type
    #[error("unknown collection type")]
    CollectionUnknownType,

    /// No index with the given id exists on the collection
    #[error("index not found: {0}")]
    NoIndex(u64),

    /// Operation attempted in the wrong lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Document with the given key does not exist
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// A geo constraint index rejected a non-indexable document
    #[error("geo index violated")]
    GeoIndexViolated,

    /// Unique hash index insert hit an existing entry for the same key
    #[error("unique constraint violated in hash index")]
    IndexHashInsertFailed,

    /// Priority queue index could not accept the element
    #[error("priority queue index insert failed")]
    IndexPqInsertFailed,

    /// A unique index already holds an entry for the same key
    #[error("unique constraint violated")]
    UniqueConstraintViolated,

    /// Bitarray index creation was given the same attribute twice
    #[error("bitarray index creation failed: duplicate attributes")]
    IndexBitarrayCreationDuplicateAttributes,

    /// Bitarray index creation was given duplicate values for an attribute
    #[error("bitarray index creation failed: duplicate values")]
    IndexBitarrayCreationDuplicateValues,

    /// Bitarray index cumulative value cardinality is outside 1..=64
    #[error("bitarray index creation failed: cardinality {0} out of range")]
    IndexBitarrayCreationCardinality(usize),

    /// A document attribute value is not in the bitarray's enumerated lists
    #[error("bitarray index insert failed: unsupported value")]
    IndexBitarrayInsertUnsupportedValue,

    /// Advisory: document lacks an attribute of a hash index
    #[error("hash index: document attribute missing")]
    IndexHashDocumentAttributeMissing,

    /// Advisory: document lacks an attribute of a skiplist index
    #[error("skiplist index: document attribute missing")]
    IndexSkiplistDocumentAttributeMissing,

    /// Advisory: the old revision lacks an attribute during a skiplist update
    #[error("skiplist index: update attribute missing")]
    IndexSkiplistUpdateAttributeMissing,

    /// Advisory: document lacks an attribute of a bitarray index
    #[error("bitarray index: document attribute missing")]
    IndexBitarrayDocumentAttributeMissing,

    /// Advisory: the old revision lacks an attribute during a bitarray update
    #[error("bitarray index: update attribute missing")]
    IndexBitarrayUpdateAttributeMissing,

    /// Advisory: a bitarray removal did not find the entry
    #[error("bitarray index: remove item missing")]
    IndexBitarrayRemoveItemMissing,

    /// The responsible shard has gone away
    #[error("cluster: shard is gone")]
    ClusterShardGone,

    /// A cluster-internal request ran into its deadline
    #[error("cluster: timeout")]
    ClusterTimeout,

    /// A cluster-internal connection broke before a full answer arrived
    #[error("cluster: connection lost")]
    ClusterConnectionLost,

    /// `_key` was given although `_key` is not the sole sharding attribute
    #[error("cluster: must not specify _key")]
    ClusterMustNotSpecifyKey,

    /// A patch document does not contain all sharding attributes
    #[error("cluster: not all sharding attributes given")]
    ClusterNotAllShardingAttributesGiven,

    /// Two or more shards claimed the same document
    #[error("cluster: got contradicting answers")]
    ClusterGotContradictingAnswers,
}

impl Error {
    /// Stable numeric code for this error
    ///
    /// Codes are part of the public surface and never change meaning.
    pub fn code(&self) -> u32 {
        match self {
            Error::OutOfMemory => 1,
            Error::Internal(_) => 2,
            Error::Io(_) => 3,
            Error::Corruption(_) => 4,
            Error::IllegalOption(_) => 5,
            Error::QueryEmpty => 10,
            Error::CollectionNotFound(_) => 100,
            Error::CollectionUnknownType => 101,
            Error::NoIndex(_) => 102,
            Error::InvalidState(_) => 103,
            Error::DocumentNotFound(_) => 104,
            Error::GeoIndexViolated => 200,
            Error::IndexHashInsertFailed => 201,
            Error::IndexPqInsertFailed => 202,
            Error::IndexBitarrayCreationDuplicateAttributes => 203,
            Error::IndexBitarrayCreationDuplicateValues => 204,
            Error::IndexBitarrayCreationCardinality(_) => 205,
            Error::IndexBitarrayInsertUnsupportedValue => 206,
            Error::UniqueConstraintViolated => 207,
            Error::IndexHashDocumentAttributeMissing => 300,
            Error::IndexSkiplistDocumentAttributeMissing => 301,
            Error::IndexSkiplistUpdateAttributeMissing => 302,
            Error::IndexBitarrayDocumentAttributeMissing => 303,
            Error::IndexBitarrayUpdateAttributeMissing => 304,
            Error::IndexBitarrayRemoveItemMissing => 305,
            Error::ClusterShardGone => 400,
            Error::ClusterTimeout => 401,
            Error::ClusterConnectionLost => 402,
            Error::ClusterMustNotSpecifyKey => 403,
            Error::ClusterNotAllShardingAttributesGiven => 404,
            Error::ClusterGotContradictingAnswers => 405,
        }
    }

    /// Whether this error is an advisory index warning
    ///
    /// Advisory warnings mean a document simply does not participate in an
    /// index. They are control flow, not failure: a write transaction must
    /// not be aborted because of one.
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            Error::IndexHashDocumentAttributeMissing
                | Error::IndexSkiplistDocumentAttributeMissing
                | Error::IndexSkiplistUpdateAttributeMissing
                | Error::IndexBitarrayDocumentAttributeMissing
                | Error::IndexBitarrayUpdateAttributeMissing
                | Error::IndexBitarrayRemoveItemMissing
        )
    }

    /// Whether this error is a unique-constraint conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::IndexHashInsertFailed
                | Error::UniqueConstraintViolated
                | Error::ClusterGotContradictingAnswers
        )
    }

    /// Severity rank for cluster transport errors
    ///
    /// When a retry budget is exhausted the highest-severity error wins:
    /// timeout > connection lost > shard gone. Non-transport errors rank 0.
    pub fn transport_severity(&self) -> u8 {
        match self {
            Error::ClusterTimeout => 3,
            Error::ClusterConnectionLost => 2,
            Error::ClusterShardGone => 1,
            _ => 0,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Corruption(e.to_string())
    }
}
