//! Cluster-internal transport
//!
//! The coordinator talks to shards through [`ShardTransport`]: one
//! synchronous call for the fast path, and an asynchronous
//! request/wait/drop triple for slow-path fan-outs. Responses carry plain
//! HTTP-ish status codes; transport failures are reported as statuses so
//! the caller can map them onto its error taxonomy.
//!
//! [`InMemoryTransport`] is the test double: per-shard handler functions
//! stand in for database servers.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::time::Duration;

/// Request method, mirroring the coordinator's HTTP verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read a document
    Get,
    /// Probe a document without a body
    Head,
    /// Create a document
    Post,
    /// Replace a document
    Put,
    /// Patch a document
    Patch,
    /// Remove a document
    Delete,
}

/// A request to one shard
#[derive(Debug, Clone)]
pub struct ShardRequest {
    /// Request method
    pub method: Method,
    /// Request path, already shard-qualified
    pub path: String,
    /// Optional body (JSON text)
    pub body: Option<String>,
    /// Extra headers, e.g. `If-None-Match`
    pub headers: Vec<(String, String)>,
}

impl ShardRequest {
    /// Build a request without body or headers
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ShardRequest {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    /// Attach a body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A shard's answer
#[derive(Debug, Clone)]
pub struct ShardResponse {
    /// HTTP-ish status code
    pub status: u16,
    /// Content type of the body
    pub content_type: String,
    /// Response body
    pub body: String,
}

impl ShardResponse {
    /// Build a JSON response
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        ShardResponse {
            status,
            content_type: "application/json; charset=utf-8".to_string(),
            body: body.into(),
        }
    }

    /// Whether the status is a 404
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Outcome of one transport operation
#[derive(Debug, Clone)]
pub enum TransportStatus {
    /// A complete answer arrived
    Received(ShardResponse),
    /// No answer within the deadline
    Timeout,
    /// The connection broke before a complete answer arrived
    ConnectionLost,
    /// The operation was dropped by the caller
    Dropped,
}

/// Transport seam between the coordinator and the shards
pub trait ShardTransport: Send + Sync {
    /// Send one request and wait for its answer
    fn sync_request(
        &self,
        shard: &str,
        request: ShardRequest,
        timeout: Duration,
    ) -> TransportStatus;

    /// Send one request belonging to the fan-out `operation_id`
    fn async_request(
        &self,
        operation_id: u64,
        shard: &str,
        request: ShardRequest,
        timeout: Duration,
    );

    /// Wait for the next answer of a fan-out
    ///
    /// Returns `None` once every outstanding answer has been consumed.
    fn wait(&self, operation_id: u64, timeout: Duration) -> Option<(String, TransportStatus)>;

    /// Discard all outstanding answers of a fan-out
    fn drop_requests(&self, operation_id: u64);
}

/// Handler standing in for one shard's database server
pub type ShardHandler = Box<dyn Fn(&ShardRequest) -> TransportStatus + Send + Sync>;

/// In-memory transport for tests: handlers per shard, delivered inline
pub struct InMemoryTransport {
    handlers: Mutex<FxHashMap<String, ShardHandler>>,
    pending: Mutex<FxHashMap<u64, VecDeque<(String, TransportStatus)>>>,
}

impl InMemoryTransport {
    /// Create a transport with no shards
    pub fn new() -> Self {
        InMemoryTransport {
            handlers: Mutex::new(FxHashMap::default()),
            pending: Mutex::new(FxHashMap::default()),
        }
    }

    /// Install the handler for one shard
    pub fn register_shard(
        &self,
        shard: &str,
        handler: impl Fn(&ShardRequest) -> TransportStatus + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .insert(shard.to_string(), Box::new(handler));
    }

    fn dispatch(&self, shard: &str, request: &ShardRequest) -> TransportStatus {
        match self.handlers.lock().get(shard) {
            Some(handler) => handler(request),
            None => TransportStatus::ConnectionLost,
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardTransport for InMemoryTransport {
    fn sync_request(
        &self,
        shard: &str,
        request: ShardRequest,
        _timeout: Duration,
    ) -> TransportStatus {
        self.dispatch(shard, &request)
    }

    fn async_request(
        &self,
        operation_id: u64,
        shard: &str,
        request: ShardRequest,
        _timeout: Duration,
    ) {
        let status = self.dispatch(shard, &request);
        self.pending
            .lock()
            .entry(operation_id)
            .or_default()
            .push_back((shard.to_string(), status));
    }

    fn wait(&self, operation_id: u64, _timeout: Duration) -> Option<(String, TransportStatus)> {
        self.pending
            .lock()
            .get_mut(&operation_id)
            .and_then(VecDeque::pop_front)
    }

    fn drop_requests(&self, operation_id: u64) {
        self.pending.lock().remove(&operation_id);
    }
}
