//! Document collections
//!
//! A collection owns its documents (the key→marker map serving primary
//! lookups), its ordered index list (the primary index at slot 0, plus
//! the edge index for edge collections), an optional cap-constraint side
//! reference, and its barrier list.
//!
//! Mutations drive every attached index's corresponding hook. Advisory
//! warnings (missing attributes) never fail the operation; the affected
//! index simply does not carry the document. Hard errors propagate to the
//! caller without rolling back index updates already performed; the
//! replay comes from the write-ahead log.

use crate::barrier::BarrierList;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vellum_core::{
    Document, DocumentRef, EdgeHeaderData, Error, IndexId, Result, Shaper, TickSource,
};
use vellum_index::{
    persist, BitarrayIndex, CapConstraint, EdgeIndex, FulltextIndex, GeoIndex, HashIndex, Index,
    IndexKind, PrimaryIndex, SkiplistIndex,
};

/// Type of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Plain documents
    Document,
    /// Directional links between documents
    Edge,
}

/// A named set of documents with its attached indexes
pub struct DocumentCollection {
    name: String,
    kind: CollectionKind,
    directory: PathBuf,
    shaper: Arc<Shaper>,
    ticks: Arc<TickSource>,
    documents: RwLock<FxHashMap<String, DocumentRef>>,
    indexes: RwLock<Vec<Arc<dyn Index>>>,
    cap: RwLock<Option<Arc<CapConstraint>>>,
    barriers: BarrierList,
}

impl std::fmt::Debug for DocumentCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCollection")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl DocumentCollection {
    /// Create a collection
    ///
    /// Every collection gets the primary index at slot 0; edge
    /// collections additionally get their edge index.
    pub fn new(
        name: String,
        kind: CollectionKind,
        directory: &Path,
        shaper: Arc<Shaper>,
        ticks: Arc<TickSource>,
    ) -> Self {
        let mut indexes: Vec<Arc<dyn Index>> = vec![Arc::new(PrimaryIndex::new())];
        if kind == CollectionKind::Edge {
            indexes.push(Arc::new(EdgeIndex::new(IndexId(ticks.next().as_u64()))));
        }

        DocumentCollection {
            name,
            kind,
            directory: directory.to_path_buf(),
            shaper,
            ticks,
            documents: RwLock::new(FxHashMap::default()),
            indexes: RwLock::new(indexes),
            cap: RwLock::new(None),
            barriers: BarrierList::new(),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection type
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Directory holding datafiles and index descriptions
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The shared shape registry
    pub fn shaper(&self) -> &Arc<Shaper> {
        &self.shaper
    }

    /// The collection's barrier list
    pub fn barriers(&self) -> &BarrierList {
        &self.barriers
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Whether the collection holds no documents
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Primary lookup by document key
    pub fn document(&self, key: &str) -> Option<DocumentRef> {
        self.documents.read().get(key).cloned()
    }

    /// Insert a plain document
    ///
    /// A missing key is generated from the tick source. The new marker is
    /// offered to every attached index; afterwards a cap constraint may
    /// evict the oldest documents through the normal removal path.
    pub fn insert(&self, key: Option<String>, value: Value) -> Result<DocumentRef> {
        let key = key.unwrap_or_else(|| self.ticks.next().as_u64().to_string());
        let shaped = self.shaper.shape(value);
        let doc = Arc::new(Document::new(key, self.ticks.next(), shaped));
        self.install(doc)
    }

    /// Insert an edge document
    pub fn insert_edge(
        &self,
        key: Option<String>,
        value: Value,
        edge: EdgeHeaderData,
    ) -> Result<DocumentRef> {
        if self.kind != CollectionKind::Edge {
            return Err(Error::CollectionUnknownType);
        }
        let key = key.unwrap_or_else(|| self.ticks.next().as_u64().to_string());
        let shaped = self.shaper.shape(value);
        let doc = Arc::new(Document::new_edge(key, self.ticks.next(), shaped, edge));
        self.install(doc)
    }

    fn install(&self, doc: DocumentRef) -> Result<DocumentRef> {
        {
            let mut documents = self.documents.write();
            if documents.contains_key(doc.key()) {
                return Err(Error::UniqueConstraintViolated);
            }
            documents.insert(doc.key().to_string(), Arc::clone(&doc));
        }

        for index in self.indexes.read().iter() {
            match index.insert(&doc) {
                Ok(()) => {}
                Err(err) if err.is_advisory() => {
                    debug!(
                        collection = %self.name,
                        index = index.id().as_u64(),
                        doc = doc.key(),
                        code = err.code(),
                        "document not carried by index"
                    );
                }
                Err(err) => {
                    // no index rollback here; recovery replays from the log
                    self.documents.write().remove(doc.key());
                    return Err(err);
                }
            }
        }

        self.enforce_cap()?;
        Ok(doc)
    }

    /// Replace a document's payload, bumping its revision
    pub fn update(&self, key: &str, value: Value) -> Result<DocumentRef> {
        let old = self
            .document(key)
            .ok_or_else(|| Error::DocumentNotFound(key.to_string()))?;

        let shaped = self.shaper.shape(value);
        let new = match old.edge() {
            Some(edge) => Arc::new(Document::new_edge(
                key.to_string(),
                self.ticks.next(),
                shaped,
                edge.clone(),
            )),
            None => Arc::new(Document::new(key.to_string(), self.ticks.next(), shaped)),
        };

        for index in self.indexes.read().iter() {
            match index.update(&new, old.shaped()) {
                Ok(()) => {}
                Err(err) if err.is_advisory() => {
                    debug!(
                        collection = %self.name,
                        index = index.id().as_u64(),
                        doc = key,
                        code = err.code(),
                        "update not carried by index"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        self.documents
            .write()
            .insert(key.to_string(), Arc::clone(&new));
        self.enforce_cap()?;
        Ok(new)
    }

    /// Remove a document by key
    pub fn remove(&self, key: &str) -> Result<()> {
        let doc = {
            let mut documents = self.documents.write();
            documents
                .remove(key)
                .ok_or_else(|| Error::DocumentNotFound(key.to_string()))?
        };

        for index in self.indexes.read().iter() {
            match index.remove(&doc) {
                Ok(()) => {}
                Err(err) if err.is_advisory() => {
                    debug!(
                        collection = %self.name,
                        index = index.id().as_u64(),
                        doc = key,
                        code = err.code(),
                        "removal not carried by index"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn enforce_cap(&self) -> Result<()> {
        let excess = match self.cap.read().as_ref() {
            Some(cap) => cap.excess(),
            None => return Ok(()),
        };
        for doc in excess {
            debug!(collection = %self.name, doc = doc.key(), "cap constraint evicting");
            self.remove(doc.key())?;
        }
        Ok(())
    }

    /// All attached indexes; slot 0 is the primary
    pub fn indexes(&self) -> Vec<Arc<dyn Index>> {
        self.indexes.read().clone()
    }

    /// Look up an index by id
    pub fn index_by_id(&self, iid: IndexId) -> Result<Arc<dyn Index>> {
        self.indexes
            .read()
            .iter()
            .find(|idx| idx.id() == iid)
            .cloned()
            .ok_or(Error::NoIndex(iid.as_u64()))
    }

    /// The edge index of an edge collection
    pub fn edge_index(&self) -> Result<Arc<dyn Index>> {
        if self.kind != CollectionKind::Edge {
            return Err(Error::CollectionUnknownType);
        }
        self.indexes
            .read()
            .iter()
            .find(|idx| idx.kind() == IndexKind::Edge)
            .cloned()
            .ok_or(Error::Internal("edge collection without edge index".into()))
    }

    /// Run every index's periodic cleanup hook
    pub fn cleanup_indexes(&self) -> Result<()> {
        for index in self.indexes.read().iter() {
            index.cleanup()?;
        }
        Ok(())
    }

    fn attach(&self, index: Arc<dyn Index>) -> Result<Arc<dyn Index>> {
        // backfill before the index becomes visible
        for doc in self.documents.read().values() {
            match index.insert(doc) {
                Ok(()) => {}
                Err(err) if err.is_advisory() => {}
                Err(err) => return Err(err),
            }
        }

        persist::save_description(&self.directory, index.as_ref())?;
        self.indexes.write().push(Arc::clone(&index));
        info!(
            collection = %self.name,
            index = index.id().as_u64(),
            kind = index.kind().type_name(),
            "created index"
        );
        Ok(index)
    }

    fn resolve_paths(&self, fields: &[String]) -> Vec<vellum_core::PathId> {
        fields
            .iter()
            .map(|f| self.shaper.find_attribute_path_by_name(f))
            .collect()
    }

    /// Create a hash index over `fields`
    pub fn ensure_hash_index(&self, fields: Vec<String>, unique: bool) -> Result<Arc<dyn Index>> {
        let paths = self.resolve_paths(&fields);
        let index = Arc::new(HashIndex::new(
            IndexId(self.ticks.next().as_u64()),
            Arc::clone(&self.shaper),
            fields,
            paths,
            unique,
        ));
        self.attach(index)
    }

    /// Create a skiplist index over `fields`
    pub fn ensure_skiplist_index(
        &self,
        fields: Vec<String>,
        unique: bool,
    ) -> Result<Arc<dyn Index>> {
        let paths = self.resolve_paths(&fields);
        let index = Arc::new(SkiplistIndex::new(
            IndexId(self.ticks.next().as_u64()),
            Arc::clone(&self.shaper),
            fields,
            paths,
            unique,
        ));
        self.attach(index)
    }

    /// Create a geo index over one list-valued attribute
    pub fn ensure_geo1_index(
        &self,
        field: String,
        geo_json: bool,
        constraint: bool,
        ignore_null: bool,
    ) -> Result<Arc<dyn Index>> {
        let pid = self.shaper.find_attribute_path_by_name(&field);
        let index = Arc::new(GeoIndex::new_location(
            IndexId(self.ticks.next().as_u64()),
            Arc::clone(&self.shaper),
            field,
            pid,
            geo_json,
            constraint,
            ignore_null,
        ));
        self.attach(index)
    }

    /// Create a geo index over two numeric attributes
    pub fn ensure_geo2_index(
        &self,
        latitude_field: String,
        longitude_field: String,
        constraint: bool,
        ignore_null: bool,
    ) -> Result<Arc<dyn Index>> {
        let lat = self.shaper.find_attribute_path_by_name(&latitude_field);
        let lon = self.shaper.find_attribute_path_by_name(&longitude_field);
        let index = Arc::new(GeoIndex::new_pair(
            IndexId(self.ticks.next().as_u64()),
            Arc::clone(&self.shaper),
            latitude_field,
            longitude_field,
            lat,
            lon,
            constraint,
            ignore_null,
        ));
        self.attach(index)
    }

    /// Create a fulltext index over one attribute
    pub fn ensure_fulltext_index(
        &self,
        field: String,
        index_substrings: bool,
        min_word_length: usize,
    ) -> Result<Arc<dyn Index>> {
        let pid = self.shaper.find_attribute_path_by_name(&field);
        let index = Arc::new(FulltextIndex::new(
            IndexId(self.ticks.next().as_u64()),
            Arc::clone(&self.shaper),
            field,
            pid,
            index_substrings,
            min_word_length,
        ));
        self.attach(index)
    }

    /// Create a bitarray index over enumerated attribute values
    pub fn ensure_bitarray_index(
        &self,
        fields: Vec<String>,
        values: Vec<Vec<Value>>,
        support_undef: bool,
    ) -> Result<Arc<dyn Index>> {
        let paths = self.resolve_paths(&fields);
        let index = Arc::new(BitarrayIndex::new(
            IndexId(self.ticks.next().as_u64()),
            Arc::clone(&self.shaper),
            fields,
            paths,
            values,
            support_undef,
        )?);
        self.attach(index)
    }

    /// Create the cap constraint; a collection has at most one
    pub fn ensure_cap_constraint(&self, size: usize) -> Result<Arc<dyn Index>> {
        if self.cap.read().is_some() {
            return Err(Error::IllegalOption(
                "collection already has a cap constraint".into(),
            ));
        }
        let cap = Arc::new(CapConstraint::new(
            IndexId(self.ticks.next().as_u64()),
            size,
        ));
        *self.cap.write() = Some(Arc::clone(&cap));
        let index = self.attach(cap)?;
        self.enforce_cap()?;
        Ok(index)
    }

    /// The cap constraint side reference, if one exists
    pub fn cap_constraint(&self) -> Option<Arc<CapConstraint>> {
        self.cap.read().clone()
    }

    /// Drop a secondary index by id
    ///
    /// The primary and edge indexes cannot be dropped.
    pub fn drop_index(&self, iid: IndexId) -> Result<()> {
        let index = self.index_by_id(iid)?;
        match index.kind() {
            IndexKind::Primary | IndexKind::Edge => {
                return Err(Error::IllegalOption(
                    "cannot drop a system index".into(),
                ));
            }
            IndexKind::Cap => {
                // clear the side reference
                *self.cap.write() = None;
            }
            _ => {}
        }

        self.indexes.write().retain(|idx| idx.id() != iid);
        if let Err(err) = persist::remove_description_file(&self.directory, iid) {
            warn!(collection = %self.name, index = iid.as_u64(), %err,
                  "cannot remove index description");
        }
        Ok(())
    }

    /// Tear down index-side state when the collection is destroyed
    pub fn destroy(&self) {
        info!(collection = %self.name, "destroying collection");
        for index in self.indexes.read().iter() {
            if let Some(edges) = index.as_any().downcast_ref::<EdgeIndex>() {
                edges.clear();
            }
        }
        *self.cap.write() = None;
        self.documents.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_index::EdgeDirection;

    fn collection(kind: CollectionKind) -> (tempfile::TempDir, DocumentCollection) {
        let dir = tempfile::tempdir().unwrap();
        let col = DocumentCollection::new(
            "test".into(),
            kind,
            dir.path(),
            Arc::new(Shaper::new()),
            Arc::new(TickSource::new(0)),
        );
        (dir, col)
    }

    #[test]
    fn test_collection_has_exactly_one_primary_index() {
        let (_dir, col) = collection(CollectionKind::Document);
        let indexes = col.indexes();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].kind(), IndexKind::Primary);
        assert_eq!(indexes[0].id(), IndexId::PRIMARY);
    }

    #[test]
    fn test_edge_collection_has_edge_index() {
        let (_dir, col) = collection(CollectionKind::Edge);
        let indexes = col.indexes();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[1].kind(), IndexKind::Edge);
    }

    #[test]
    fn test_insert_and_primary_lookup() {
        let (_dir, col) = collection(CollectionKind::Document);
        col.insert(Some("d1".into()), json!({"a": 1})).unwrap();
        let doc = col.document("d1").unwrap();
        assert_eq!(doc.key(), "d1");
        assert!(col.document("d2").is_none());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (_dir, col) = collection(CollectionKind::Document);
        col.insert(Some("d1".into()), json!({})).unwrap();
        let err = col.insert(Some("d1".into()), json!({})).unwrap_err();
        assert!(matches!(err, Error::UniqueConstraintViolated));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let (_dir, col) = collection(CollectionKind::Document);
        let a = col.insert(None, json!({})).unwrap();
        let b = col.insert(None, json!({})).unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_edge_insert_feeds_edge_index() {
        let (_dir, col) = collection(CollectionKind::Edge);
        col.insert_edge(
            Some("e1".into()),
            json!({"_from": "V/a", "_to": "V/b"}),
            EdgeHeaderData {
                from_collection: "V".into(),
                from_key: "a".into(),
                to_collection: "V".into(),
                to_key: "b".into(),
                bidirectional: false,
            },
        )
        .unwrap();

        let index = col.edge_index().unwrap();
        let edges = index.as_any().downcast_ref::<EdgeIndex>().unwrap();
        assert_eq!(edges.lookup(EdgeDirection::In, "V", "b").len(), 1);
        assert_eq!(edges.lookup(EdgeDirection::Out, "V", "a").len(), 1);
        assert!(col.document("e1").is_some());
    }

    #[test]
    fn test_edge_insert_on_document_collection_fails() {
        let (_dir, col) = collection(CollectionKind::Document);
        let err = col
            .insert_edge(
                None,
                json!({}),
                EdgeHeaderData {
                    from_collection: "V".into(),
                    from_key: "a".into(),
                    to_collection: "V".into(),
                    to_key: "b".into(),
                    bidirectional: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::CollectionUnknownType));
    }

    #[test]
    fn test_hash_index_unique_violation_propagates() {
        let (_dir, col) = collection(CollectionKind::Document);
        col.ensure_hash_index(vec!["u".into()], true).unwrap();
        col.insert(Some("d1".into()), json!({"u": 42})).unwrap();
        let err = col.insert(Some("d2".into()), json!({"u": 42})).unwrap_err();
        assert!(matches!(err, Error::IndexHashInsertFailed));
        // the conflicting document is not installed
        assert!(col.document("d2").is_none());
    }

    #[test]
    fn test_index_backfills_existing_documents() {
        let (_dir, col) = collection(CollectionKind::Document);
        col.insert(Some("d1".into()), json!({"u": 1})).unwrap();
        let index = col.ensure_hash_index(vec!["u".into()], false).unwrap();
        let hash = index.as_any().downcast_ref::<HashIndex>().unwrap();
        assert_eq!(hash.lookup(&[json!(1)]).len(), 1);
    }

    #[test]
    fn test_index_description_is_persisted() {
        let (dir, col) = collection(CollectionKind::Document);
        let index = col.ensure_hash_index(vec!["u".into()], true).unwrap();
        let file = dir
            .path()
            .join(format!("index-{}.json", index.id().as_u64()));
        assert!(file.exists());
    }

    #[test]
    fn test_update_bumps_revision_and_reindexes() {
        let (_dir, col) = collection(CollectionKind::Document);
        let index = col.ensure_hash_index(vec!["u".into()], false).unwrap();
        let old = col.insert(Some("d1".into()), json!({"u": 1})).unwrap();
        let new = col.update("d1", json!({"u": 2})).unwrap();

        assert!(new.revision() > old.revision());
        let hash = index.as_any().downcast_ref::<HashIndex>().unwrap();
        assert!(hash.lookup(&[json!(1)]).is_empty());
        assert_eq!(hash.lookup(&[json!(2)]).len(), 1);
    }

    #[test]
    fn test_remove_missing_document_errors() {
        let (_dir, col) = collection(CollectionKind::Document);
        let err = col.remove("ghost").unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[test]
    fn test_cap_constraint_evicts_through_removal_path() {
        let (_dir, col) = collection(CollectionKind::Document);
        let index = col.ensure_hash_index(vec!["u".into()], false).unwrap();
        col.ensure_cap_constraint(2).unwrap();

        col.insert(Some("a".into()), json!({"u": 1})).unwrap();
        col.insert(Some("b".into()), json!({"u": 2})).unwrap();
        col.insert(Some("c".into()), json!({"u": 3})).unwrap();

        assert_eq!(col.len(), 2);
        assert!(col.document("a").is_none());
        // eviction went through every index
        let hash = index.as_any().downcast_ref::<HashIndex>().unwrap();
        assert!(hash.lookup(&[json!(1)]).is_empty());
    }

    #[test]
    fn test_drop_index_clears_cap_slot() {
        let (_dir, col) = collection(CollectionKind::Document);
        let cap = col.ensure_cap_constraint(10).unwrap();
        assert!(col.cap_constraint().is_some());
        col.drop_index(cap.id()).unwrap();
        assert!(col.cap_constraint().is_none());
    }

    #[test]
    fn test_drop_system_index_rejected() {
        let (_dir, col) = collection(CollectionKind::Document);
        let err = col.drop_index(IndexId::PRIMARY).unwrap_err();
        assert!(matches!(err, Error::IllegalOption(_)));
    }

    #[test]
    fn test_index_by_id_missing_is_no_index() {
        let (_dir, col) = collection(CollectionKind::Document);
        let err = col.index_by_id(IndexId(999)).unwrap_err();
        assert!(matches!(err, Error::NoIndex(999)));
    }
}
