//! Skiplist index
//!
//! Ordered multi-key index over a shape-pid path list, range-capable.
//! Lookups take an [`IndexOperator`] tree; the operands are filled into
//! canonical key values before evaluation (see
//! [`crate::operator::fill_lookup_operator`]).
//!
//! Documents lacking an indexed attribute simply do not participate: the
//! insert and remove hooks report success for them. During an update, a
//! missing attribute on the old revision skips the removal step and a
//! missing attribute on the new revision skips the re-insert, so a pure
//! shape change reports success while the document leaves the index.

use crate::key::{extract_tuple, IndexKey, KeyValue};
use crate::operator::{fill_lookup_operator, IndexOperator, RelationOp};
use crate::{Index, IndexKind};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};
use vellum_core::{DocumentRef, Error, IndexId, PathId, Result, ShapedDocument, Shaper};

/// Ordered multi-key index
#[derive(Debug)]
pub struct SkiplistIndex {
    id: IndexId,
    unique: bool,
    fields: Vec<String>,
    paths: Vec<PathId>,
    shaper: Arc<Shaper>,
    table: RwLock<BTreeMap<IndexKey, Vec<DocumentRef>>>,
}

impl SkiplistIndex {
    /// Create a skiplist index over the given fields
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
        SkiplistIndex {
            id,
            unique,
            fields,
            paths,
            shaper,
            table: RwLock::new(BTreeMap::new()),
        }
    }

    /// Evaluate an operator tree against the index
    ///
    /// The tree's relation operands are filled in place first; a format
    /// violation (non-list parameters, increasing IN lengths) aborts the
    /// lookup. Results are deduplicated by document key and returned in
    /// index order.
    pub fn lookup(&self, mut operator: IndexOperator) -> Result<Vec<DocumentRef>> {
        fill_lookup_operator(&mut operator)?;
        let table = self.table.read();
        let matched = eval_operator(&table, &operator);

        let mut seen = FxHashMap::default();
        let mut out = Vec::new();
        for (key, docs) in table.iter() {
            if !matched.contains_key(key) {
                continue;
            }
            for doc in docs {
                if seen.insert(doc.key().to_string(), ()).is_none() {
                    out.push(Arc::clone(doc));
                }
            }
        }
        Ok(out)
    }

    /// Number of distinct key tuples in the table
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    fn insert_tuple(&self, key: IndexKey, doc: &DocumentRef) -> Result<()> {
        let mut table = self.table.write();
        let bucket = table.entry(key).or_default();
        if self.unique && !bucket.is_empty() {
            return Err(Error::UniqueConstraintViolated);
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
            debug!(doc = doc_key, "skiplist entry already absent");
        }
    }
}

/// Evaluate a filled operator tree, returning the matching key tuples
fn eval_operator(
    table: &BTreeMap<IndexKey, Vec<DocumentRef>>,
    operator: &IndexOperator,
) -> BTreeMap<IndexKey, ()> {
    match operator {
        IndexOperator::And(left, right) => {
            let l = eval_operator(table, left);
            let r = eval_operator(table, right);
            l.into_iter().filter(|(k, _)| r.contains_key(k)).collect()
        }
        IndexOperator::Or(left, right) => {
            let mut l = eval_operator(table, left);
            l.extend(eval_operator(table, right));
            l
        }
        IndexOperator::Not(inner) => {
            let excluded = eval_operator(table, inner);
            table
                .keys()
                .filter(|k| !excluded.contains_key(*k))
                .map(|k| (k.clone(), ()))
                .collect()
        }
        IndexOperator::Relation { op, fields, .. } => table
            .keys()
            .filter(|key| relation_matches(*op, key, fields))
            .map(|k| (k.clone(), ()))
            .collect(),
    }
}

/// Whether one key tuple satisfies a relation on its field prefix
fn relation_matches(op: RelationOp, key: &IndexKey, fields: &[KeyValue]) -> bool {
    let n = fields.len().min(key.len());
    let prefix = &key[..n];

    match op {
        RelationOp::Eq => prefix == &fields[..n] && key.len() >= fields.len(),
        RelationOp::Ne => prefix != &fields[..n],
        RelationOp::Lt | RelationOp::Le | RelationOp::Gt | RelationOp::Ge => {
            let cmp = compare_prefix(prefix, &fields[..n]);
            match op {
                RelationOp::Lt => cmp == Ordering::Less,
                RelationOp::Le => cmp != Ordering::Greater,
                RelationOp::Gt => cmp == Ordering::Greater,
                RelationOp::Ge => cmp != Ordering::Less,
                _ => unreachable!(),
            }
        }
        RelationOp::In => fields.iter().enumerate().all(|(i, operand)| {
            let KeyValue::List(candidates) = operand else {
                return false;
            };
            key.get(i).is_some_and(|v| candidates.contains(v))
        }),
    }
}

fn compare_prefix(prefix: &[KeyValue], fields: &[KeyValue]) -> Ordering {
    for (a, b) in prefix.iter().zip(fields.iter()) {
        let cmp = a.cmp(b);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

impl Index for SkiplistIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Skiplist
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
            // document does not participate, not an error
            None => Ok(()),
        }
    }

    fn update(&self, new_doc: &DocumentRef, old: &ShapedDocument) -> Result<()> {
        match extract_tuple(&self.shaper, old, &self.paths) {
            Some(old_key) => self.remove_tuple(&old_key, new_doc.key()),
            None => {
                trace!(doc = new_doc.key(), "old revision missing skiplist attributes");
            }
        }

        match extract_tuple(&self.shaper, new_doc.shaped(), &self.paths) {
            Some(key) => self.insert_tuple(key, new_doc),
            None => Ok(()),
        }
    }

    fn remove(&self, doc: &DocumentRef) -> Result<()> {
        if let Some(key) = extract_tuple(&self.shaper, doc.shaped(), &self.paths) {
            self.remove_tuple(&key, doc.key());
        }
        Ok(())
    }

    fn describe(&self) -> Value {
        json!({
            "id": self.id.as_u64(),
            "unique": self.unique,
            "type": "skiplist",
            "fields": self.fields,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
