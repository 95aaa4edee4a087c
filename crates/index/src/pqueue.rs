//! Priority queue index
//!
//! Exactly one attribute of numeric type. Documents lacking the attribute
//! or carrying a non-numeric value are silently ignored. The queue is
//! ordered ascending; `lookup(n)` returns the `n` smallest elements, and
//! an unspecified count defaults to 1.

use crate::key::KeyValue;
use crate::{Index, IndexKind};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use vellum_core::{DocumentRef, Error, IndexId, PathId, Result, ShapedDocument, Shaper};

#[derive(Debug)]
struct PqInner {
    /// ascending priority order; ties broken by document key
    queue: BTreeMap<(KeyValue, String), DocumentRef>,
    /// membership: document key → its priority in the queue
    positions: FxHashMap<String, KeyValue>,
}

/// Top-n index over one numeric attribute
#[derive(Debug)]
pub struct PriorityQueueIndex {
    id: IndexId,
    fields: Vec<String>,
    path: PathId,
    shaper: Arc<Shaper>,
    inner: RwLock<PqInner>,
}

impl PriorityQueueIndex {
    /// Create a priority queue index over one attribute
    pub fn new(id: IndexId, shaper: Arc<Shaper>, field: String, path: PathId) -> Self {
        PriorityQueueIndex {
            id,
            fields: vec![field],
            path,
            shaper,
            inner: RwLock::new(PqInner {
                queue: BTreeMap::new(),
                positions: FxHashMap::default(),
            }),
        }
    }

    /// The `count` smallest elements; `None` defaults to 1
    pub fn lookup(&self, count: Option<usize>) -> Vec<DocumentRef> {
        let n = count.unwrap_or(1);
        self.inner
            .read()
            .queue
            .values()
            .take(n)
            .map(Arc::clone)
            .collect()
    }

    /// Number of queued documents
    pub fn len(&self) -> usize {
        self.inner.read().queue.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().queue.is_empty()
    }

    /// Extract the numeric priority; `None` for missing or non-numeric
    fn priority_of(&self, shaped: &ShapedDocument) -> Option<KeyValue> {
        match self.shaper.extract(shaped, self.path)? {
            Value::Number(n) => Some(KeyValue::Number(n.as_f64()?)),
            _ => None,
        }
    }

    fn remove_key(&self, doc_key: &str) {
        let mut inner = self.inner.write();
        if let Some(priority) = inner.positions.remove(doc_key) {
            inner.queue.remove(&(priority, doc_key.to_string()));
        }
    }
}

impl Index for PriorityQueueIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::PriorityQueue
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn insert(&self, doc: &DocumentRef) -> Result<()> {
        let Some(priority) = self.priority_of(doc.shaped()) else {
            // not numeric or not present, skip the document
            return Ok(());
        };

        let mut inner = self.inner.write();
        if inner.positions.contains_key(doc.key()) {
            return Err(Error::IndexPqInsertFailed);
        }
        inner
            .positions
            .insert(doc.key().to_string(), priority.clone());
        inner
            .queue
            .insert((priority, doc.key().to_string()), Arc::clone(doc));
        Ok(())
    }

    fn update(&self, new_doc: &DocumentRef, _old: &ShapedDocument) -> Result<()> {
        self.remove_key(new_doc.key());
        self.insert(new_doc)
    }

    fn remove(&self, doc: &DocumentRef) -> Result<()> {
        self.remove_key(doc.key());
        Ok(())
    }

    fn describe(&self) -> Value {
        json!({
            "id": self.id.as_u64(),
            "unique": false,
            "type": "priorityqueue",
            "fields": self.fields,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_core::{Document, Tick};

    fn setup() -> (Arc<Shaper>, PriorityQueueIndex) {
        let shaper = Arc::new(Shaper::new());
        let pid = shaper.find_attribute_path_by_name("pri");
        let index = PriorityQueueIndex::new(IndexId(7), Arc::clone(&shaper), "pri".into(), pid);
        (shaper, index)
    }

    fn doc(shaper: &Shaper, key: &str, value: Value) -> DocumentRef {
        Arc::new(Document::new(key.to_string(), Tick(1), shaper.shape(value)))
    }

    #[test]
    fn test_lookup_returns_smallest_first() {
        let (shaper, index) = setup();
        index.insert(&doc(&shaper, "mid", json!({"pri": 5}))).unwrap();
        index.insert(&doc(&shaper, "low", json!({"pri": 1}))).unwrap();
        index
            .insert(&doc(&shaper, "high", json!({"pri": 9})))
            .unwrap();

        let top = index.lookup(Some(2));
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key(), "low");
        assert_eq!(top[1].key(), "mid");
    }

    #[test]
    fn test_empty_operand_defaults_to_one() {
        let (shaper, index) = setup();
        index.insert(&doc(&shaper, "a", json!({"pri": 2}))).unwrap();
        index.insert(&doc(&shaper, "b", json!({"pri": 1}))).unwrap();

        let top = index.lookup(None);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].key(), "b");
    }

    #[test]
    fn test_missing_attribute_is_silently_ignored() {
        let (shaper, index) = setup();
        index
            .insert(&doc(&shaper, "a", json!({"other": 1})))
            .unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_non_numeric_attribute_is_silently_ignored() {
        let (shaper, index) = setup();
        index
            .insert(&doc(&shaper, "a", json!({"pri": "high"})))
            .unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_double_insert_fails() {
        let (shaper, index) = setup();
        let d = doc(&shaper, "a", json!({"pri": 1}));
        index.insert(&d).unwrap();
        let err = index.insert(&d).unwrap_err();
        assert!(matches!(err, Error::IndexPqInsertFailed));
    }

    #[test]
    fn test_update_moves_priority() {
        let (shaper, index) = setup();
        let old = doc(&shaper, "a", json!({"pri": 1}));
        index.insert(&old).unwrap();
        index.insert(&doc(&shaper, "b", json!({"pri": 2}))).unwrap();

        let new = doc(&shaper, "a", json!({"pri": 9}));
        index.update(&new, old.shaped()).unwrap();

        let top = index.lookup(Some(1));
        assert_eq!(top[0].key(), "b");
    }

    #[test]
    fn test_remove_unlinks_document() {
        let (shaper, index) = setup();
        let d = doc(&shaper, "a", json!({"pri": 1}));
        index.insert(&d).unwrap();
        index.remove(&d).unwrap();
        assert!(index.is_empty());
        // removing again is harmless
        index.remove(&d).unwrap();
    }
}
