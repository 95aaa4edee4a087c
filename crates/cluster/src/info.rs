//! Cluster metadata
//!
//! [`ClusterInfo`] is the coordinator's view of the cluster: which
//! collections exist, how they are sharded, and which shard owns which
//! hash slice. [`CollectionInfo::responsible_shard`] hashes the values of
//! the sharding attributes out of a document to pick the shard.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vellum_core::{Error, Result};

/// Sharding metadata of one logical collection
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    id: u64,
    name: String,
    shard_keys: Vec<String>,
    /// shard id → owning server, iterated in stable order
    shards: BTreeMap<String, String>,
}

impl CollectionInfo {
    /// Describe a sharded collection
    pub fn new(
        id: u64,
        name: &str,
        shard_keys: Vec<String>,
        shards: BTreeMap<String, String>,
    ) -> Self {
        CollectionInfo {
            id,
            name: name.to_string(),
            shard_keys,
            shards,
        }
    }

    /// Numeric collection id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sharding attribute names
    pub fn shard_keys(&self) -> &[String] {
        &self.shard_keys
    }

    /// Shard → server map
    pub fn shards(&self) -> &BTreeMap<String, String> {
        &self.shards
    }

    /// Whether `_key` is the one and only sharding attribute
    pub fn uses_default_shard_keys(&self) -> bool {
        self.shard_keys.len() == 1 && self.shard_keys[0] == "_key"
    }

    /// Pick the shard responsible for a document
    ///
    /// With `doc_complete` false (a patch document), a missing sharding
    /// attribute means the shard cannot be determined and
    /// `ClusterNotAllShardingAttributesGiven` is returned. With
    /// `doc_complete` true, missing attributes hash as `null`.
    pub fn responsible_shard(&self, document: &Value, doc_complete: bool) -> Result<String> {
        let mut hasher = rustc_hash::FxHasher::default();
        for key in &self.shard_keys {
            let value = document.get(key);
            if value.is_none() && !doc_complete {
                return Err(Error::ClusterNotAllShardingAttributesGiven);
            }
            hash_value(&mut hasher, value.unwrap_or(&Value::Null));
        }

        let position = (hasher.finish() % self.shards.len() as u64) as usize;
        self.shards
            .keys()
            .nth(position)
            .cloned()
            .ok_or(Error::ClusterShardGone)
    }
}

/// Hash one JSON value into the shard hasher, canonically
fn hash_value(hasher: &mut rustc_hash::FxHasher, value: &Value) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(b) => {
            hasher.write_u8(1);
            hasher.write_u8(*b as u8);
        }
        Value::Number(n) => {
            hasher.write_u8(2);
            hasher.write_u64(n.as_f64().unwrap_or(0.0).to_bits());
        }
        Value::String(s) => {
            hasher.write_u8(3);
            hasher.write(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.write_u8(4);
            for item in items {
                hash_value(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.write_u8(5);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.write(key.as_bytes());
                hash_value(hasher, &map[key]);
            }
        }
    }
}

/// The coordinator's registry of sharded collections
pub struct ClusterInfo {
    collections: RwLock<FxHashMap<(String, String), Arc<CollectionInfo>>>,
    uniqid: AtomicU64,
}

impl ClusterInfo {
    /// Create an empty registry
    pub fn new() -> Self {
        ClusterInfo {
            collections: RwLock::new(FxHashMap::default()),
            uniqid: AtomicU64::new(0),
        }
    }

    /// Register a collection's sharding metadata
    pub fn register_collection(&self, database: &str, info: CollectionInfo) {
        self.collections.write().insert(
            (database.to_string(), info.name().to_string()),
            Arc::new(info),
        );
    }

    /// Look up a collection's sharding metadata
    pub fn collection(&self, database: &str, name: &str) -> Result<Arc<CollectionInfo>> {
        self.collections
            .read()
            .get(&(database.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Allocate a cluster-wide unique number (used for generated keys)
    pub fn uniqid(&self) -> u64 {
        self.uniqid.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self::new()
    }
}
