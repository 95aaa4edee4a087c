//! Hash index
//!
//! Equality index over a shape-pid path list, unique or multi. The
//! missing-attribute policy differs by uniqueness: a unique index silently
//! skips documents that lack an indexed attribute, a multi index also
//! skips them but reports the advisory warning so interested callers can
//! observe it.

use crate::key::{extract_tuple, IndexKey, KeyValue};
use crate::{Index, IndexKind};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use tracing::debug;
use vellum_core::{DocumentRef, Error, IndexId, PathId, Result, ShapedDocument, Shaper};

/// Unique or multi equality index
#[derive(Debug)]
pub struct HashIndex {
    id: IndexId,
    unique: bool,
    fields: Vec<String>,
    paths: Vec<PathId>,
    shaper: Arc<Shaper>,
    table: RwLock<FxHashMap<IndexKey, Vec<DocumentRef>>>,
}

impl HashIndex {
    /// Create a hash index over the given fields
    ///
    /// `fields` and `paths` must have identical length and order.
    pub fn new(
        id: IndexId,
        shaper: Arc<Shaper>,
        fields: Vec<String>,
        paths: Vec<PathId>,
        unique: bool,
    ) -> Self {
        debug_assert_eq!(fields.len(), paths.len());
        HashIndex {
            id,
            unique,
            fields,
            paths,
            shaper,
            table: RwLock::new(FxHashMap::default()),
        }
    }

    /// Look up documents matching the given key values
    pub fn lookup(&self, values: &[Value]) -> Vec<DocumentRef> {
        let key: IndexKey = values.iter().map(KeyValue::from).collect();
        self.table.read().get(&key).cloned().unwrap_or_default()
    }

    /// Number of distinct key tuples in the table
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    fn missing_result(&self) -> Result<()> {
        if self.unique {
            Ok(())
        } else {
            Err(Error::IndexHashDocumentAttributeMissing)
        }
    }

    fn insert_tuple(&self, key: IndexKey, doc: &DocumentRef) -> Result<()> {
        let mut table = self.table.write();
        let bucket = table.entry(key).or_default();
        if self.unique && !bucket.is_empty() {
            return Err(Error::IndexHashInsertFailed);
        }
        bucket.push(Arc::clone(doc));
        Ok(())
    }

    fn remove_tuple(&self, key: &IndexKey, doc_key: &str) {
        let mut table = self.table.write();
        if let Some(bucket) = table.get_mut(key) {
            bucket.retain(|d| d.key() != doc_key);
            if bucket.is_empty() {
                table.remove(key);
            }
        } else {
            debug!(doc = doc_key, "hash entry already absent");
        }
    }
}

impl Index for HashIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hash
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn insert(&self, doc: &DocumentRef) -> Result<()> {
        match extract_tuple(&self.shaper, doc.shaped(), &self.paths) {
            Some(key) => self.insert_tuple(key, doc),
            None => self.missing_result(),
        }
    }

    fn update(&self, new_doc: &DocumentRef, old: &ShapedDocument) -> Result<()> {
        // remove the entry derived from the old revision, if it had one
        if let Some(old_key) = extract_tuple(&self.shaper, old, &self.paths) {
            self.remove_tuple(&old_key, new_doc.key());
        }

        match extract_tuple(&self.shaper, new_doc.shaped(), &self.paths) {
            Some(key) => self.insert_tuple(key, new_doc),
            None => self.missing_result(),
        }
    }

    fn remove(&self, doc: &DocumentRef) -> Result<()> {
        match extract_tuple(&self.shaper, doc.shaped(), &self.paths) {
            Some(key) => {
                self.remove_tuple(&key, doc.key());
                Ok(())
            }
            None => self.missing_result(),
        }
    }

    fn describe(&self) -> Value {
        json!({
            "id": self.id.as_u64(),
            "unique": self.unique,
            "type": "hash",
            "fields": self.fields,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
