//! Bitarray index
//!
//! A cross product of per-attribute enumerated value lists. Creation
//! validates the configuration: attributes must be pairwise distinct,
//! each attribute's value list must be duplicate-free, and the cumulative
//! cardinality must stay within 1..=64 so a document's membership fits in
//! one 64-bit mask.
//!
//! A document whose attribute values are all enumerated gets a mask with
//! one bit per attribute. Documents missing an indexed attribute either
//! stay out of the index or, with `supportUndef`, land in a distinguished
//! undefined column. A value outside the enumerated lists is a hard error.

use crate::key::KeyValue;
use crate::{Index, IndexKind};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use vellum_core::{DocumentRef, Error, IndexId, PathId, Result, ShapedDocument, Shaper};

#[derive(Debug)]
struct BitarrayInner {
    /// documents with all attributes enumerated: key → (mask, marker)
    masks: FxHashMap<String, (u64, DocumentRef)>,
    /// documents with missing attributes, kept only with `supportUndef`
    undefined: FxHashMap<String, DocumentRef>,
}

/// Enumerated-value cross-product index
#[derive(Debug)]
pub struct BitarrayIndex {
    id: IndexId,
    fields: Vec<String>,
    paths: Vec<PathId>,
    /// per-attribute enumerated values; bit offsets follow declaration order
    values: Vec<Vec<KeyValue>>,
    bit_offsets: Vec<usize>,
    support_undef: bool,
    shaper: Arc<Shaper>,
    inner: RwLock<BitarrayInner>,
}

impl BitarrayIndex {
    /// Create a bitarray index, validating the attribute/value configuration
    pub fn new(
        id: IndexId,
        shaper: Arc<Shaper>,
        fields: Vec<String>,
        paths: Vec<PathId>,
        values: Vec<Vec<Value>>,
        support_undef: bool,
    ) -> Result<Self> {
        debug_assert_eq!(fields.len(), paths.len());
        if values.len() != paths.len() {
            return Err(Error::IllegalOption(
                "bitarray needs one value list per attribute".into(),
            ));
        }

        // attributes must not repeat
        for (j, left) in paths.iter().enumerate() {
            if paths[j + 1..].contains(left) {
                return Err(Error::IndexBitarrayCreationDuplicateAttributes);
            }
        }

        let values: Vec<Vec<KeyValue>> = values
            .iter()
            .map(|list| list.iter().map(KeyValue::from).collect())
            .collect();

        // each attribute's value list must be duplicate-free
        for list in &values {
            for (j, left) in list.iter().enumerate() {
                if list[j + 1..].contains(left) {
                    return Err(Error::IndexBitarrayCreationDuplicateValues);
                }
            }
        }

        let cardinality: usize = values.iter().map(Vec::len).sum();
        if !(1..=64).contains(&cardinality) {
            return Err(Error::IndexBitarrayCreationCardinality(cardinality));
        }

        let mut bit_offsets = Vec::with_capacity(values.len());
        let mut offset = 0;
        for list in &values {
            bit_offsets.push(offset);
            offset += list.len();
        }

        Ok(BitarrayIndex {
            id,
            fields,
            paths,
            values,
            bit_offsets,
            support_undef,
            shaper,
            inner: RwLock::new(BitarrayInner {
                masks: FxHashMap::default(),
                undefined: FxHashMap::default(),
            }),
        })
    }

    /// Documents whose attribute at `field_index` equals `value`
    pub fn lookup_equals(&self, field_index: usize, value: &Value) -> Vec<DocumentRef> {
        let needle = KeyValue::from(value);
        let Some(position) = self.values[field_index].iter().position(|v| *v == needle) else {
            return Vec::new();
        };
        let bit = 1u64 << (self.bit_offsets[field_index] + position);

        self.inner
            .read()
            .masks
            .values()
            .filter(|(mask, _)| mask & bit != 0)
            .map(|(_, doc)| Arc::clone(doc))
            .collect()
    }

    /// Documents stored in the undefined column
    pub fn lookup_undefined(&self) -> Vec<DocumentRef> {
        self.inner
            .read()
            .undefined
            .values()
            .map(Arc::clone)
            .collect()
    }

    /// Total indexed documents, including the undefined column
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.masks.len() + inner.undefined.len()
    }

    /// Whether the index holds no documents
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute the membership mask; `Ok(None)` when an attribute is missing
    fn mask_for(&self, shaped: &ShapedDocument) -> Result<Option<u64>> {
        let mut mask = 0u64;
        for (j, pid) in self.paths.iter().enumerate() {
            let Some(value) = self.shaper.extract(shaped, *pid) else {
                return Ok(None);
            };
            let needle = KeyValue::from(value);
            let Some(position) = self.values[j].iter().position(|v| *v == needle) else {
                return Err(Error::IndexBitarrayInsertUnsupportedValue);
            };
            mask |= 1u64 << (self.bit_offsets[j] + position);
        }
        Ok(Some(mask))
    }

    fn insert_masked(&self, doc: &DocumentRef) -> Result<()> {
        match self.mask_for(doc.shaped())? {
            Some(mask) => {
                self.inner
                    .write()
                    .masks
                    .insert(doc.key().to_string(), (mask, Arc::clone(doc)));
                Ok(())
            }
            None => {
                if !self.support_undef {
                    return Ok(());
                }
                self.inner
                    .write()
                    .undefined
                    .insert(doc.key().to_string(), Arc::clone(doc));
                Ok(())
            }
        }
    }

    fn remove_entry(&self, doc_key: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.masks.remove(doc_key).is_some() || inner.undefined.remove(doc_key).is_some() {
            Ok(())
        } else {
            Err(Error::IndexBitarrayRemoveItemMissing)
        }
    }
}

impl Index for BitarrayIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Bitarray
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn insert(&self, doc: &DocumentRef) -> Result<()> {
        self.insert_masked(doc)
    }

    fn update(&self, new_doc: &DocumentRef, _old: &ShapedDocument) -> Result<()> {
        // remove-then-insert, tolerating a missing old entry
        match self.remove_entry(new_doc.key()) {
            Ok(()) | Err(Error::IndexBitarrayRemoveItemMissing) => {}
            Err(err) => return Err(err),
        }

        self.insert_masked(new_doc)
    }

    fn remove(&self, doc: &DocumentRef) -> Result<()> {
        match self.mask_for(doc.shaped()) {
            Ok(Some(_)) => self.remove_entry(doc.key()),
            Ok(None) => {
                if !self.support_undef {
                    // never indexed, nothing to do
                    return Ok(());
                }
                self.remove_entry(doc.key())
            }
            // value no longer enumerated; fall back to key removal
            Err(Error::IndexBitarrayInsertUnsupportedValue) => self.remove_entry(doc.key()),
            Err(err) => Err(err),
        }
    }

    fn describe(&self) -> Value {
        let key_values: Vec<Value> = self
            .fields
            .iter()
            .zip(self.values.iter())
            .map(|(field, list)| {
                let rendered: Vec<Value> = list.iter().map(key_value_to_json).collect();
                json!([field, rendered])
            })
            .collect();

        json!({
            "id": self.id.as_u64(),
            "unique": false,
            "type": "bitarray",
            "fields": key_values,
            "undefined": self.support_undef,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn key_value_to_json(value: &KeyValue) -> Value {
    match value {
        KeyValue::Null => Value::Null,
        KeyValue::Bool(b) => json!(b),
        KeyValue::Number(f) => json!(f),
        KeyValue::String(s) => json!(s),
        KeyValue::List(items) => Value::Array(items.iter().map(key_value_to_json).collect()),
        KeyValue::Object(attrs) => Value::Object(
            attrs
                .iter()
                .map(|(k, v)| (k.clone(), key_value_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_core::{Document, Tick};

    fn setup(support_undef: bool) -> (Arc<Shaper>, BitarrayIndex) {
        let shaper = Arc::new(Shaper::new());
        let paths = vec![
            shaper.find_attribute_path_by_name("color"),
            shaper.find_attribute_path_by_name("size"),
        ];
        let index = BitarrayIndex::new(
            IndexId(6),
            Arc::clone(&shaper),
            vec!["color".into(), "size".into()],
            paths,
            vec![
                vec![json!("red"), json!("green"), json!("blue")],
                vec![json!("s"), json!("m"), json!("l")],
            ],
            support_undef,
        )
        .unwrap();
        (shaper, index)
    }

    fn doc(shaper: &Shaper, key: &str, value: Value) -> DocumentRef {
        Arc::new(Document::new(key.to_string(), Tick(1), shaper.shape(value)))
    }

    #[test]
    fn test_creation_rejects_duplicate_attributes() {
        let shaper = Arc::new(Shaper::new());
        let pid = shaper.find_attribute_path_by_name("a");
        let err = BitarrayIndex::new(
            IndexId(6),
            shaper,
            vec!["a".into(), "a".into()],
            vec![pid, pid],
            vec![vec![json!(1)], vec![json!(2)]],
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::IndexBitarrayCreationDuplicateAttributes
        ));
    }

    #[test]
    fn test_creation_rejects_duplicate_values() {
        let shaper = Arc::new(Shaper::new());
        let pid = shaper.find_attribute_path_by_name("a");
        let err = BitarrayIndex::new(
            IndexId(6),
            shaper,
            vec!["a".into()],
            vec![pid],
            vec![vec![json!(1), json!(1)]],
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IndexBitarrayCreationDuplicateValues));
    }

    #[test]
    fn test_creation_rejects_oversized_cardinality() {
        let shaper = Arc::new(Shaper::new());
        let pid = shaper.find_attribute_path_by_name("a");
        let values: Vec<Value> = (0..65).map(|i| json!(i)).collect();
        let err = BitarrayIndex::new(
            IndexId(6),
            shaper,
            vec!["a".into()],
            vec![pid],
            vec![values],
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IndexBitarrayCreationCardinality(65)));
    }

    #[test]
    fn test_creation_rejects_empty_cardinality() {
        let shaper = Arc::new(Shaper::new());
        let pid = shaper.find_attribute_path_by_name("a");
        let err = BitarrayIndex::new(
            IndexId(6),
            shaper,
            vec!["a".into()],
            vec![pid],
            vec![vec![]],
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IndexBitarrayCreationCardinality(0)));
    }

    #[test]
    fn test_insert_and_lookup() {
        let (shaper, index) = setup(false);
        index
            .insert(&doc(&shaper, "d1", json!({"color": "red", "size": "m"})))
            .unwrap();
        index
            .insert(&doc(&shaper, "d2", json!({"color": "red", "size": "l"})))
            .unwrap();
        index
            .insert(&doc(&shaper, "d3", json!({"color": "blue", "size": "m"})))
            .unwrap();

        assert_eq!(index.lookup_equals(0, &json!("red")).len(), 2);
        assert_eq!(index.lookup_equals(1, &json!("m")).len(), 2);
        assert_eq!(index.lookup_equals(0, &json!("green")).len(), 0);
    }

    #[test]
    fn test_unsupported_value_is_hard_error() {
        let (shaper, index) = setup(false);
        let err = index
            .insert(&doc(&shaper, "d1", json!({"color": "pink", "size": "m"})))
            .unwrap_err();
        assert!(matches!(err, Error::IndexBitarrayInsertUnsupportedValue));
        assert!(!err.is_advisory());
    }

    #[test]
    fn test_missing_attribute_without_undef_support_is_skipped() {
        let (shaper, index) = setup(false);
        index
            .insert(&doc(&shaper, "d1", json!({"color": "red"})))
            .unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_missing_attribute_with_undef_support_goes_to_undefined_column() {
        let (shaper, index) = setup(true);
        index
            .insert(&doc(&shaper, "d1", json!({"color": "red"})))
            .unwrap();
        let undefined = index.lookup_undefined();
        assert_eq!(undefined.len(), 1);
        assert_eq!(undefined[0].key(), "d1");
    }

    #[test]
    fn test_remove_missing_entry_is_advisory() {
        let (shaper, index) = setup(true);
        let d = doc(&shaper, "d1", json!({"color": "red", "size": "m"}));
        let err = index.remove(&d).unwrap_err();
        assert!(matches!(err, Error::IndexBitarrayRemoveItemMissing));
        assert!(err.is_advisory());
    }

    #[test]
    fn test_update_moves_between_columns() {
        let (shaper, index) = setup(true);
        let old = doc(&shaper, "d1", json!({"color": "red", "size": "m"}));
        index.insert(&old).unwrap();

        // new revision lost the size attribute entirely
        let new = doc(&shaper, "d1", json!({"color": "red"}));
        index.update(&new, old.shaped()).unwrap();

        assert!(index.lookup_equals(0, &json!("red")).is_empty());
        assert_eq!(index.lookup_undefined().len(), 1);
    }

    #[test]
    fn test_update_tolerates_missing_old_entry() {
        let (shaper, index) = setup(false);
        let old = doc(&shaper, "d1", json!({"other": 1}));
        let new = doc(&shaper, "d1", json!({"color": "red", "size": "s"}));
        index.update(&new, old.shaped()).unwrap();
        assert_eq!(index.lookup_equals(0, &json!("red")).len(), 1);
    }

    #[test]
    fn test_describe_lists_attribute_value_pairs() {
        let (_s, index) = setup(true);
        let desc = index.describe();
        assert_eq!(desc["type"], "bitarray");
        assert_eq!(desc["undefined"], true);
        assert_eq!(desc["fields"][0][0], "color");
        assert_eq!(desc["fields"][0][1][0], "red");
    }
}
