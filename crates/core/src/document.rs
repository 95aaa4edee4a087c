//! In-memory document markers
//!
//! A [`Document`] is the unit every index and transaction operates on: a
//! key, a revision tick, the shaped payload, and (for edge collections)
//! the edge header data. Markers are shared as `Arc`s; identity for index
//! purposes is the key.

use crate::shaper::ShapedDocument;
use crate::types::Revision;
use std::sync::Arc;

/// Shared handle to a document marker
pub type DocumentRef = Arc<Document>;

/// Edge header data carried by documents in edge collections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeHeaderData {
    /// Collection the edge points from
    pub from_collection: String,
    /// Key of the source document
    pub from_key: String,
    /// Collection the edge points to
    pub to_collection: String,
    /// Key of the target document
    pub to_key: String,
    /// Whether the edge is traversable in both directions
    pub bidirectional: bool,
}

impl EdgeHeaderData {
    /// Whether the edge is a self-loop (`_from` and `_to` identical)
    pub fn is_reflexive(&self) -> bool {
        self.from_collection == self.to_collection && self.from_key == self.to_key
    }
}

/// A document marker
#[derive(Debug)]
pub struct Document {
    key: String,
    revision: Revision,
    shaped: ShapedDocument,
    edge: Option<EdgeHeaderData>,
}

impl Document {
    /// Create a plain document marker
    pub fn new(key: String, revision: Revision, shaped: ShapedDocument) -> Self {
        Document {
            key,
            revision,
            shaped,
            edge: None,
        }
    }

    /// Create an edge document marker
    pub fn new_edge(
        key: String,
        revision: Revision,
        shaped: ShapedDocument,
        edge: EdgeHeaderData,
    ) -> Self {
        Document {
            key,
            revision,
            shaped,
            edge: Some(edge),
        }
    }

    /// Document key, unique within its collection
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Revision tick of the last mutation
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// The shaped payload
    pub fn shaped(&self) -> &ShapedDocument {
        &self.shaped
    }

    /// Edge header data, present only in edge collections
    pub fn edge(&self) -> Option<&EdgeHeaderData> {
        self.edge.as_ref()
    }
}
