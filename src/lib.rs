//! Vellum: a multi-model document database storage engine
//!
//! This crate is the façade over the engine's member crates:
//!
//! - `vellum-core`: errors, ids, shaped documents, the shape registry
//! - `vellum-index`: the polymorphic index family
//! - `vellum-storage`: datafiles, barriers, collections, the cleanup loop
//! - `vellum-concurrency`: the transaction subsystem
//! - `vellum-durability`: the write-ahead log logfile abstraction
//! - `vellum-cluster`: the coordinator document-request layer

#![warn(missing_docs)]

pub use vellum_core::{
    Document, DocumentRef, EdgeHeaderData, Error, IndexId, Result, Revision, ServerId,
    ShapedDocument, Shaper, Tick, TickSource, TransactionId,
};

pub use vellum_index::{
    BitarrayIndex, CapConstraint, EdgeDirection, EdgeIndex, FulltextIndex, GeoIndex, HashIndex,
    Index, IndexKind, IndexOperator, PrimaryIndex, PriorityQueueIndex, RelationOp, SkiplistIndex,
};

pub use vellum_storage::{
    BarrierList, CleanupConfig, CleanupWorker, CollectionKind, CompactorLock, CursorRegistry,
    Database, DatabaseState, Datafile, DocumentCollection,
};

pub use vellum_concurrency::{
    AccessType, IsolationLevel, Transaction, TransactionContext, TransactionStatus,
};

pub use vellum_durability::{CollectionStatus, Logfile, SealStatus};

pub use vellum_cluster::{
    ClusterInfo, CollectionInfo, Coordinator, CoordinatorResponse, InMemoryTransport,
    ShardTransport, UpdatePolicy,
};
