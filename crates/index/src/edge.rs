//! Edge index
//!
//! Each inserted edge materializes two directional headers: one under its
//! IN key `(to collection, to key)` and one under its OUT key
//! `(from collection, from key)`. Both table entries resolve to a single
//! shared header allocation, so the document, its reflexive flag and its
//! bidirectional flag are stored once per edge. Table identity uses only
//! the direction and the peer coordinates; the reflexive/bidirectional
//! flags are payload, never part of hashing or equality.

use crate::{Index, IndexKind};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;
use vellum_core::{DocumentRef, Error, IndexId, Result, ShapedDocument};

/// Direction of an edge header relative to its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeDirection {
    /// Header stored under the edge's `_to` coordinates
    In,
    /// Header stored under the edge's `_from` coordinates
    Out,
}

/// Hash key of one directional header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EdgeKey {
    direction: EdgeDirection,
    peer_collection: String,
    peer_key: String,
}

/// The shared per-edge header allocation
///
/// The IN entry is considered the owner; dropping the last table reference
/// releases the header.
#[derive(Debug)]
struct EdgeHeader {
    doc: DocumentRef,
    reflexive: bool,
    bidirectional: bool,
}

/// Directional multi-key index over an edge collection
#[derive(Debug)]
pub struct EdgeIndex {
    id: IndexId,
    fields: Vec<String>,
    edges: RwLock<FxHashMap<EdgeKey, Vec<Arc<EdgeHeader>>>>,
}

impl EdgeIndex {
    /// Create the edge index for a collection
    pub fn new(id: IndexId) -> Self {
        EdgeIndex {
            id,
            fields: vec!["_from".to_string()],
            edges: RwLock::new(FxHashMap::default()),
        }
    }

    /// Look up edges by direction and peer coordinates
    ///
    /// A self-loop appears under both its IN and OUT key with
    /// `is_reflexive` set.
    pub fn lookup(
        &self,
        direction: EdgeDirection,
        peer_collection: &str,
        peer_key: &str,
    ) -> Vec<DocumentRef> {
        let key = EdgeKey {
            direction,
            peer_collection: peer_collection.to_string(),
            peer_key: peer_key.to_string(),
        };
        self.edges
            .read()
            .get(&key)
            .map(|headers| headers.iter().map(|h| Arc::clone(&h.doc)).collect())
            .unwrap_or_default()
    }

    /// Number of directional headers currently installed
    pub fn len(&self) -> usize {
        self.edges.read().values().map(Vec::len).sum()
    }

    /// Whether the index holds no headers
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every header; called when the collection is destroyed
    pub fn clear(&self) {
        self.edges.write().clear();
    }

    fn keys_for(doc: &DocumentRef) -> Result<(EdgeKey, EdgeKey)> {
        let edge = doc
            .edge()
            .ok_or_else(|| Error::Internal("document has no edge header".into()))?;
        let in_key = EdgeKey {
            direction: EdgeDirection::In,
            peer_collection: edge.to_collection.clone(),
            peer_key: edge.to_key.clone(),
        };
        let out_key = EdgeKey {
            direction: EdgeDirection::Out,
            peer_collection: edge.from_collection.clone(),
            peer_key: edge.from_key.clone(),
        };
        Ok((in_key, out_key))
    }
}

impl Index for EdgeIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Edge
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn insert(&self, doc: &DocumentRef) -> Result<()> {
        let edge = doc
            .edge()
            .ok_or_else(|| Error::Internal("document has no edge header".into()))?;

        // one shared allocation; the IN slot owns it
        let header = Arc::new(EdgeHeader {
            doc: Arc::clone(doc),
            reflexive: edge.is_reflexive(),
            bidirectional: edge.bidirectional,
        });

        let (in_key, out_key) = Self::keys_for(doc)?;
        let mut edges = self.edges.write();
        edges.entry(in_key).or_default().push(Arc::clone(&header));
        edges.entry(out_key).or_default().push(header);
        Ok(())
    }

    fn update(&self, _new_doc: &DocumentRef, _old: &ShapedDocument) -> Result<()> {
        // edge coordinates are immutable, nothing to reindex
        Ok(())
    }

    fn remove(&self, doc: &DocumentRef) -> Result<()> {
        let (in_key, out_key) = Self::keys_for(doc)?;
        let mut edges = self.edges.write();

        // the OUT entry is the borrowed view, unlink it first
        for key in [out_key, in_key] {
            if let Some(headers) = edges.get_mut(&key) {
                headers.retain(|h| h.doc.key() != doc.key());
                if headers.is_empty() {
                    edges.remove(&key);
                }
            } else {
                trace!(key = doc.key(), "edge header already absent");
            }
        }
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        json!({
            "id": self.id.as_u64(),
            "type": "edge",
            "fields": ["_from"],
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl EdgeIndex {
    /// Look up edges with their reflexive and bidirectional flags
    pub fn lookup_with_flags(
        &self,
        direction: EdgeDirection,
        peer_collection: &str,
        peer_key: &str,
    ) -> Vec<(DocumentRef, bool, bool)> {
        let key = EdgeKey {
            direction,
            peer_collection: peer_collection.to_string(),
            peer_key: peer_key.to_string(),
        };
        self.edges
            .read()
            .get(&key)
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| (Arc::clone(&h.doc), h.reflexive, h.bidirectional))
                    .collect()
            })
            .unwrap_or_default()
    }
}
