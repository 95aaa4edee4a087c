//! Coordinator request layer
//!
//! Routes document operations against a logically sharded collection.
//! Given an operation keyed by `_key`, the coordinator either determines
//! the responsible shard from the document's sharding attributes and asks
//! it directly (the fast path), or broadcasts to all shards and accepts
//! at most one positive answer (the slow path).
//!
//! The transport is a trait seam ([`ShardTransport`]); an in-memory
//! implementation backs the tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod info;
pub mod methods;
pub mod transport;

pub use info::{ClusterInfo, CollectionInfo};
pub use methods::{Coordinator, CoordinatorResponse, UpdatePolicy};
pub use transport::{
    InMemoryTransport, Method, ShardRequest, ShardResponse, ShardTransport, TransportStatus,
};
