//! Shape registry and typed attribute extraction
//!
//! Every document payload is registered with the shaper before it enters a
//! collection. The shaper assigns each distinct attribute layout a stable
//! [`ShapeId`] and interns dotted attribute paths as [`PathId`]s. Index
//! code never walks raw JSON: it asks for an accessor for a `(sid, pid)`
//! pair and executes it against the shaped payload.
//!
//! Accessors are cached by `(sid, pid)` in an internally synchronized map.
//! There is no invalidation surface: shape and path ids are append-only,
//! so a cached accessor never goes stale.

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a registered document layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(pub u64);

/// Identifier of an interned dotted attribute path
///
/// `PathId(0)` is never handed out and means "no path".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(pub u64);

impl PathId {
    /// The reserved "no path" id
    pub const NONE: PathId = PathId(0);
}

/// A document payload bound to its registered shape
#[derive(Debug, Clone)]
pub struct ShapedDocument {
    sid: ShapeId,
    value: Value,
}

impl ShapedDocument {
    /// The shape this payload was registered under
    pub fn sid(&self) -> ShapeId {
        self.sid
    }

    /// The raw payload
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A compiled attribute-path accessor for one `(shape, path)` pair
#[derive(Debug)]
pub struct ShapeAccessor {
    steps: Vec<String>,
}

impl ShapeAccessor {
    /// Extract the attribute value from a shaped payload
    ///
    /// Returns `None` when the value is absent or JSON `null`; both mean
    /// "attribute missing" to every consumer of this API.
    pub fn execute<'a>(&self, doc: &'a ShapedDocument) -> Option<&'a Value> {
        let mut current = doc.value();
        for step in &self.steps {
            current = current.as_object()?.get(step)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }
}

/// Content-addressed shape registry
///
/// Shapes and paths are interned append-only. The registry is shared by
/// readers and writers; all maps are internally synchronized.
#[derive(Debug)]
pub struct Shaper {
    next_sid: AtomicU64,
    next_pid: AtomicU64,
    path_ids: DashMap<String, PathId>,
    path_names: DashMap<PathId, String>,
    shape_ids: DashMap<Vec<PathId>, ShapeId>,
    shape_paths: DashMap<ShapeId, Arc<FxHashSet<PathId>>>,
    accessors: DashMap<(ShapeId, PathId), Option<Arc<ShapeAccessor>>>,
}

impl Shaper {
    /// Create an empty registry
    pub fn new() -> Self {
        Shaper {
            next_sid: AtomicU64::new(0),
            next_pid: AtomicU64::new(0),
            path_ids: DashMap::new(),
            path_names: DashMap::new(),
            shape_ids: DashMap::new(),
            shape_paths: DashMap::new(),
            accessors: DashMap::new(),
        }
    }

    /// Register a payload, assigning (or reusing) its shape id
    pub fn shape(&self, value: Value) -> ShapedDocument {
        let mut pids = Vec::new();
        collect_paths(&value, String::new(), &mut |path| {
            pids.push(self.find_attribute_path_by_name(path));
        });
        pids.sort_unstable_by_key(|p| p.0);
        pids.dedup();

        let sid = match self.shape_ids.get(&pids) {
            Some(sid) => *sid,
            None => {
                let sid = ShapeId(self.next_sid.fetch_add(1, Ordering::SeqCst) + 1);
                self.shape_ids.insert(pids.clone(), sid);
                self.shape_paths
                    .insert(sid, Arc::new(pids.iter().copied().collect()));
                sid
            }
        };

        ShapedDocument { sid, value }
    }

    /// Intern a dotted attribute path, returning its id
    pub fn find_attribute_path_by_name(&self, name: &str) -> PathId {
        if let Some(pid) = self.path_ids.get(name) {
            return *pid;
        }
        let pid = PathId(self.next_pid.fetch_add(1, Ordering::SeqCst) + 1);
        // Two threads may race here; first insert wins, the loser's id leaks.
        match self.path_ids.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(pid);
                self.path_names.insert(pid, name.to_string());
                pid
            }
        }
    }

    /// Resolve a path id back to its dotted name
    pub fn lookup_attribute_path_by_pid(&self, pid: PathId) -> Option<String> {
        self.path_names.get(&pid).map(|n| n.clone())
    }

    /// Find (and cache) the accessor for a `(shape, path)` pair
    ///
    /// Returns `None` when the shape does not contain the path; the cached
    /// negative result is kept too.
    pub fn find_accessor(&self, sid: ShapeId, pid: PathId) -> Option<Arc<ShapeAccessor>> {
        if let Some(cached) = self.accessors.get(&(sid, pid)) {
            return cached.clone();
        }

        let accessor = self.build_accessor(sid, pid);
        self.accessors.insert((sid, pid), accessor.clone());
        accessor
    }

    /// Convenience: extract an attribute from a shaped payload
    ///
    /// `None` means the attribute is missing (no accessor for the shape, or
    /// the value is JSON `null`).
    pub fn extract<'a>(&self, doc: &'a ShapedDocument, pid: PathId) -> Option<&'a Value> {
        self.find_accessor(doc.sid(), pid)?.execute(doc)
    }

    fn build_accessor(&self, sid: ShapeId, pid: PathId) -> Option<Arc<ShapeAccessor>> {
        let paths = self.shape_paths.get(&sid)?;
        if !paths.contains(&pid) {
            return None;
        }
        let name = self.lookup_attribute_path_by_pid(pid)?;
        Some(Arc::new(ShapeAccessor {
            steps: name.split('.').map(str::to_string).collect(),
        }))
    }
}

impl Default for Shaper {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk an object tree, reporting every dotted attribute path
fn collect_paths(value: &Value, prefix: String, visit: &mut impl FnMut(&str)) {
    if let Value::Object(map) = value {
        for (key, child) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            visit(&path);
            collect_paths(child, path, visit);
        }
    }
}
