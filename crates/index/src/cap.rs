//! Cap constraint
//!
//! A pseudo-index with no fields: it maintains the insertion order of the
//! most recent documents and a numeric `size` bound. Insertion appends,
//! update moves the document to the tail, removal unlinks. The constraint
//! itself does not delete documents; the collection asks for the excess
//! over `size` after each insert and removes those through its normal
//! path.

use crate::{Index, IndexKind};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use vellum_core::{DocumentRef, IndexId, Result, ShapedDocument};

#[derive(Debug)]
struct CapInner {
    /// FIFO of document keys, oldest first
    order: VecDeque<String>,
    members: FxHashMap<String, DocumentRef>,
}

/// FIFO size bound over a collection
#[derive(Debug)]
pub struct CapConstraint {
    id: IndexId,
    size: usize,
    fields: Vec<String>,
    inner: RwLock<CapInner>,
}

impl CapConstraint {
    /// Create a cap constraint bounding the collection to `size` documents
    pub fn new(id: IndexId, size: usize) -> Self {
        CapConstraint {
            id,
            size,
            fields: Vec::new(),
            inner: RwLock::new(CapInner {
                order: VecDeque::new(),
                members: FxHashMap::default(),
            }),
        }
    }

    /// The configured maximum document count
    pub fn size(&self) -> usize {
        self.size
    }

    /// Oldest documents above the size bound, in eviction order
    ///
    /// The caller removes these through the collection's document path so
    /// that every index observes the removal.
    pub fn excess(&self) -> Vec<DocumentRef> {
        let inner = self.inner.read();
        let over = inner.order.len().saturating_sub(self.size);
        inner
            .order
            .iter()
            .take(over)
            .filter_map(|key| inner.members.get(key).map(Arc::clone))
            .collect()
    }

    /// Number of tracked documents
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Whether the constraint tracks no documents
    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    fn unlink(inner: &mut CapInner, doc_key: &str) {
        if inner.members.remove(doc_key).is_some() {
            inner.order.retain(|k| k != doc_key);
        }
    }
}

impl Index for CapConstraint {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Cap
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn insert(&self, doc: &DocumentRef) -> Result<()> {
        let mut inner = self.inner.write();
        Self::unlink(&mut inner, doc.key());
        inner.order.push_back(doc.key().to_string());
        inner
            .members
            .insert(doc.key().to_string(), Arc::clone(doc));
        Ok(())
    }

    fn update(&self, new_doc: &DocumentRef, _old: &ShapedDocument) -> Result<()> {
        // an updated document becomes the most recent one
        self.insert(new_doc)
    }

    fn remove(&self, doc: &DocumentRef) -> Result<()> {
        let mut inner = self.inner.write();
        Self::unlink(&mut inner, doc.key());
        Ok(())
    }

    fn describe(&self) -> Value {
        json!({
            "id": self.id.as_u64(),
            "type": "cap",
            "size": self.size,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
