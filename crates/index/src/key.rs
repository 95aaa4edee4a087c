//! Canonical index key values
//!
//! Index tables cannot key on raw JSON: they need equality, a total order
//! and a hash. [`KeyValue`] is the canonical form of an extracted attribute
//! value providing all three. The type order is
//! null < bool < number < string < list < object, numbers compare by total
//! order, objects by sorted attribute name.

use serde_json::Value;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A tuple of key values, one per indexed field
pub type IndexKey = SmallVec<[KeyValue; 4]>;

/// Canonical, hashable, totally ordered form of a JSON value
#[derive(Debug, Clone)]
pub enum KeyValue {
    /// JSON null
    Null,
    /// JSON boolean
    Bool(bool),
    /// JSON number, canonicalized to f64 (`-0.0` normalized to `0.0`)
    Number(f64),
    /// JSON string
    String(String),
    /// JSON array
    List(Vec<KeyValue>),
    /// JSON object, attributes sorted by name
    Object(Vec<(String, KeyValue)>),
}

impl KeyValue {
    fn type_rank(&self) -> u8 {
        match self {
            KeyValue::Null => 0,
            KeyValue::Bool(_) => 1,
            KeyValue::Number(_) => 2,
            KeyValue::String(_) => 3,
            KeyValue::List(_) => 4,
            KeyValue::Object(_) => 5,
        }
    }

    /// Build an [`IndexKey`] from a slice of JSON values
    pub fn tuple(values: &[&Value]) -> IndexKey {
        values.iter().map(|v| KeyValue::from(*v)).collect()
    }

    /// Length of a list value, `None` for non-lists
    pub fn list_len(&self) -> Option<usize> {
        match self {
            KeyValue::List(items) => Some(items.len()),
            _ => None,
        }
    }
}

impl From<&Value> for KeyValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => KeyValue::Null,
            Value::Bool(b) => KeyValue::Bool(*b),
            Value::Number(n) => {
                let mut f = n.as_f64().unwrap_or(0.0);
                if f == 0.0 {
                    f = 0.0; // normalize -0.0
                }
                KeyValue::Number(f)
            }
            Value::String(s) => KeyValue::String(s.clone()),
            Value::Array(items) => KeyValue::List(items.iter().map(KeyValue::from).collect()),
            Value::Object(map) => {
                let mut attrs: Vec<(String, KeyValue)> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), KeyValue::from(v)))
                    .collect();
                attrs.sort_by(|a, b| a.0.cmp(&b.0));
                KeyValue::Object(attrs)
            }
        }
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (KeyValue::Null, KeyValue::Null) => Ordering::Equal,
            (KeyValue::Bool(a), KeyValue::Bool(b)) => a.cmp(b),
            (KeyValue::Number(a), KeyValue::Number(b)) => a.total_cmp(b),
            (KeyValue::String(a), KeyValue::String(b)) => a.cmp(b),
            (KeyValue::List(a), KeyValue::List(b)) => a.cmp(b),
            (KeyValue::Object(a), KeyValue::Object(b)) => a.cmp(b),
            _ => unreachable!("type ranks already compared"),
        }
    }
}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.type_rank());
        match self {
            KeyValue::Null => {}
            KeyValue::Bool(b) => b.hash(state),
            KeyValue::Number(f) => f.to_bits().hash(state),
            KeyValue::String(s) => s.hash(state),
            KeyValue::List(items) => {
                for item in items {
                    item.hash(state);
                }
            }
            KeyValue::Object(attrs) => {
                for (name, value) in attrs {
                    name.hash(state);
                    value.hash(state);
                }
            }
        }
    }
}

/// Extract the key tuple for a document against a path list
///
/// Returns `None` as soon as one attribute is missing; the caller decides
/// whether that is benign or an advisory warning.
pub(crate) fn extract_tuple(
    shaper: &vellum_core::Shaper,
    shaped: &vellum_core::ShapedDocument,
    paths: &[vellum_core::PathId],
) -> Option<IndexKey> {
    let mut tuple = IndexKey::new();
    for pid in paths {
        tuple.push(KeyValue::from(shaper.extract(shaped, *pid)?));
    }
    Some(tuple)
}
