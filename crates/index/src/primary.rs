//! Primary index
//!
//! Every collection has exactly one, at slot 0 with `iid = 0`. The actual
//! key lookup is served by the collection's key→marker map, so the hooks
//! here do nothing; the object exists so the index list and the
//! description surface stay uniform.

use crate::{Index, IndexKind};
use serde_json::json;
use std::any::Any;
use vellum_core::{DocumentRef, IndexId, Result, ShapedDocument};

/// The identity index of a collection
#[derive(Debug)]
pub struct PrimaryIndex {
    fields: Vec<String>,
}

impl PrimaryIndex {
    /// Create the primary index
    pub fn new() -> Self {
        PrimaryIndex {
            fields: vec!["_id".to_string()],
        }
    }
}

impl Default for PrimaryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for PrimaryIndex {
    fn id(&self) -> IndexId {
        IndexId::PRIMARY
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Primary
    }

    fn is_unique(&self) -> bool {
        true
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn insert(&self, _doc: &DocumentRef) -> Result<()> {
        Ok(())
    }

    fn update(&self, _new_doc: &DocumentRef, _old: &ShapedDocument) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _doc: &DocumentRef) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        json!({
            "id": 0,
            "type": "primary",
            "fields": ["_id"],
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
