//! Coordinator document operations
//!
//! Each operation picks one of two strategies. The fast path applies when
//! the responsible shard can be determined from the attributes at hand
//! (and, for replace/update, the sharding attributes were not moved): one
//! synchronous request to that shard. The slow path broadcasts to every
//! shard and tallies the answers: all but one shard are expected to
//! answer 404, exactly one positive answer wins, two or more positive
//! answers are contradictory.
//!
//! Transport failures are retried within the per-request deadline and a
//! small retry budget; when the budget is exhausted the highest-severity
//! error wins (timeout over connection loss over a gone shard).

use crate::info::{ClusterInfo, CollectionInfo};
use crate::transport::{
    Method, ShardRequest, ShardResponse, ShardTransport, TransportStatus,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use vellum_core::{Error, Result};

/// Answer forwarded to the client
#[derive(Debug, Clone)]
pub struct CoordinatorResponse {
    /// HTTP-ish status code
    pub status: u16,
    /// Content type of the body
    pub content_type: String,
    /// Response body
    pub body: String,
}

impl From<ShardResponse> for CoordinatorResponse {
    fn from(response: ShardResponse) -> Self {
        CoordinatorResponse {
            status: response.status,
            content_type: response.content_type,
            body: response.body,
        }
    }
}

/// Conflict policy for replacing documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Reject on revision mismatch
    Error,
    /// Last write wins
    LastWrite,
}

/// The coordinator's document-operation surface
pub struct Coordinator {
    info: Arc<ClusterInfo>,
    transport: Arc<dyn ShardTransport>,
    next_operation: AtomicU64,
    retry_budget: usize,
}

impl Coordinator {
    /// Create a coordinator over cluster metadata and a transport
    pub fn new(info: Arc<ClusterInfo>, transport: Arc<dyn ShardTransport>) -> Self {
        Coordinator {
            info,
            transport,
            next_operation: AtomicU64::new(0),
            retry_budget: 2,
        }
    }

    /// Check whether two documents differ in any sharding attribute
    ///
    /// For patches, an attribute absent from the new document means "no
    /// change". Absent attributes otherwise compare as `null`. Non-object
    /// inputs count as changed.
    pub fn shard_keys_changed(
        &self,
        database: &str,
        collection: &str,
        old: &Value,
        new: &Value,
        is_patch: bool,
    ) -> bool {
        if !old.is_object() || !new.is_object() {
            return true;
        }
        let Ok(info) = self.info.collection(database, collection) else {
            return true;
        };

        for key in info.shard_keys() {
            let new_value = new.get(key);
            if new_value.is_none() && is_patch {
                continue;
            }
            let old_value = old.get(key).unwrap_or(&Value::Null);
            let new_value = new_value.unwrap_or(&Value::Null);
            if old_value != new_value {
                return true;
            }
        }
        false
    }

    /// Create a document
    ///
    /// The user may supply `_key` only when `_key` is the sole sharding
    /// attribute; otherwise a cluster-wide unique key is generated here
    /// and uniqueness is delegated to the responsible shard.
    pub fn create_document(
        &self,
        database: &str,
        collection: &str,
        wait_for_sync: bool,
        mut document: Value,
        timeout: Duration,
    ) -> Result<CoordinatorResponse> {
        let info = self.info.collection(database, collection)?;
        if !document.is_object() {
            return Err(Error::IllegalOption("document must be an object".into()));
        }

        let user_specified_key = document.get("_key").is_some();
        if !user_specified_key {
            let generated = self.info.uniqid().to_string();
            document["_key"] = Value::String(generated);
        }

        let shard = info.responsible_shard(&document, true)?;
        if user_specified_key && !info.uses_default_shard_keys() {
            return Err(Error::ClusterMustNotSpecifyKey);
        }

        let path = format!(
            "/_db/{}/_api/document?collection={}&waitForSync={}",
            database, shard, wait_for_sync
        );
        let request = ShardRequest::new(Method::Post, path).with_body(document.to_string());
        let response = self.fast_request(&shard, request, timeout)?;
        Ok(response.into())
    }

    /// Read a document, optionally conditional on its revision
    ///
    /// With `if_none_match`, the revision travels as an `If-None-Match`
    /// header (set on every request, fast and slow path alike); otherwise
    /// it travels as a query string. `generate_document` selects GET over
    /// HEAD.
    pub fn get_document(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        revision: Option<u64>,
        if_none_match: bool,
        generate_document: bool,
        timeout: Duration,
    ) -> Result<CoordinatorResponse> {
        let info = self.info.collection(database, collection)?;
        let method = if generate_document {
            Method::Get
        } else {
            Method::Head
        };

        let (query, header) = match revision {
            Some(rev) if if_none_match => (String::new(), Some(format!("\"{}\"", rev))),
            Some(rev) => (format!("?rev={}", rev), None),
            None => (String::new(), None),
        };

        let build = |shard: &str| {
            let path = format!("/_db/{}/_api/document/{}/{}{}", database, shard, key, query);
            let mut request = ShardRequest::new(method, path);
            if let Some(value) = &header {
                request = request.with_header("If-None-Match", value.clone());
            }
            request
        };

        if info.uses_default_shard_keys() {
            let shard = info.responsible_shard(&serde_json::json!({ "_key": key }), true)?;
            let response = self.fast_request(&shard, build(&shard), timeout)?;
            return Ok(response.into());
        }

        self.broadcast(&info, build, timeout)
    }

    /// Delete a document
    pub fn delete_document(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        revision: Option<u64>,
        policy: UpdatePolicy,
        wait_for_sync: bool,
        timeout: Duration,
    ) -> Result<CoordinatorResponse> {
        let info = self.info.collection(database, collection)?;

        let mut query = format!("?waitForSync={}", wait_for_sync);
        if let Some(rev) = revision {
            query.push_str(&format!("&rev={}", rev));
        }
        if policy == UpdatePolicy::LastWrite {
            query.push_str("&policy=last");
        }

        let build = |shard: &str| {
            let path = format!("/_db/{}/_api/document/{}/{}{}", database, shard, key, query);
            ShardRequest::new(Method::Delete, path)
        };

        if info.uses_default_shard_keys() {
            let shard = info.responsible_shard(&serde_json::json!({ "_key": key }), true)?;
            let response = self.fast_request(&shard, build(&shard), timeout)?;
            return Ok(response.into());
        }

        self.broadcast(&info, build, timeout)
    }

    /// Replace or patch a document
    ///
    /// A replace carries the complete new document, so the responsible
    /// shard can usually be read off it; if the user moved a sharding
    /// attribute the addressed shard answers negatively and the slow path
    /// takes over. A patch may lack sharding attributes entirely, in
    /// which case the slow path is used from the start.
    #[allow(clippy::too_many_arguments)]
    pub fn modify_document(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        revision: Option<u64>,
        is_patch: bool,
        keep_null: bool,
        document: &Value,
        timeout: Duration,
    ) -> Result<CoordinatorResponse> {
        let info = self.info.collection(database, collection)?;
        let started = Instant::now();

        let shard = match info.responsible_shard(document, !is_patch) {
            Ok(shard) => Some(shard),
            Err(Error::ClusterNotAllShardingAttributesGiven) if is_patch => None,
            Err(err) => return Err(err),
        };

        let method = if is_patch { Method::Patch } else { Method::Put };
        let mut query = String::new();
        if let Some(rev) = revision {
            query.push_str(&format!("?rev={}", rev));
        }
        if is_patch && !keep_null {
            query.push_str(if query.is_empty() {
                "?keepNull=false"
            } else {
                "&keepNull=false"
            });
        }

        let body = document.to_string();
        let build = |shard: &str| {
            let path = format!("/_db/{}/_api/document/{}/{}{}", database, shard, key, query);
            ShardRequest::new(method, path).with_body(body.clone())
        };

        if let Some(shard) = &shard {
            let response = self.fast_request(shard, build(shard), timeout)?;
            if response.status < 400 {
                return Ok(response.into());
            }
            debug!(
                shard = %shard,
                status = response.status,
                "fast path answered negatively, broadcasting"
            );
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        self.broadcast(&info, build, remaining)
    }

    /// Sum the document counts of every shard
    ///
    /// Every shard must answer; a missing or unparsable answer is an
    /// internal error.
    pub fn count(&self, database: &str, collection: &str, timeout: Duration) -> Result<u64> {
        let info = self.info.collection(database, collection)?;
        let operation = self.next_operation.fetch_add(1, Ordering::SeqCst) + 1;
        let deadline = Instant::now() + timeout;

        for shard in info.shards().keys() {
            let path = format!("/_db/{}/_api/collection/{}/count", database, shard);
            self.transport.async_request(
                operation,
                shard,
                ShardRequest::new(Method::Get, path),
                remaining(deadline),
            );
        }

        let mut total = 0u64;
        let mut answered = 0usize;
        for _ in 0..info.shards().len() {
            let Some((_, status)) = self.transport.wait(operation, remaining(deadline)) else {
                break;
            };
            if let TransportStatus::Received(response) = status {
                if response.status == 200 {
                    if let Ok(parsed) = serde_json::from_str::<Value>(&response.body) {
                        if let Some(count) = parsed.get("count").and_then(Value::as_u64) {
                            total += count;
                            answered += 1;
                        }
                    }
                }
            }
        }

        if answered != info.shards().len() {
            return Err(Error::Internal(
                "not all shards answered the count request".into(),
            ));
        }
        Ok(total)
    }

    /// One synchronous request with retries inside the deadline
    ///
    /// Elapsed time is deducted across attempts. On exhaustion the
    /// highest-severity transport error observed wins.
    fn fast_request(
        &self,
        shard: &str,
        request: ShardRequest,
        timeout: Duration,
    ) -> Result<ShardResponse> {
        let deadline = Instant::now() + timeout;
        let mut worst: Option<Error> = None;

        for attempt in 0..=self.retry_budget {
            let left = remaining(deadline);
            if left.is_zero() && attempt > 0 {
                break;
            }

            match self.transport.sync_request(shard, request.clone(), left) {
                TransportStatus::Received(response) => return Ok(response),
                TransportStatus::Timeout => record_worst(&mut worst, Error::ClusterTimeout),
                TransportStatus::ConnectionLost | TransportStatus::Dropped => {
                    record_worst(&mut worst, Error::ClusterConnectionLost)
                }
            }
            debug!(shard, attempt, "retrying cluster-internal request");
        }

        Err(worst.unwrap_or(Error::ClusterConnectionLost))
    }

    /// Fan a request out to all shards and tally the answers
    fn broadcast(
        &self,
        info: &CollectionInfo,
        build: impl Fn(&str) -> ShardRequest,
        timeout: Duration,
    ) -> Result<CoordinatorResponse> {
        let operation = self.next_operation.fetch_add(1, Ordering::SeqCst) + 1;
        let deadline = Instant::now() + timeout;

        for shard in info.shards().keys() {
            self.transport
                .async_request(operation, shard, build(shard), remaining(deadline));
        }

        let mut tally = ResponseTally::default();
        for _ in 0..info.shards().len() {
            let Some((shard, status)) = self.transport.wait(operation, remaining(deadline)) else {
                break;
            };
            match status {
                TransportStatus::Received(response) => tally.observe(&shard, response),
                TransportStatus::Timeout => {
                    self.transport.drop_requests(operation);
                    return Err(Error::ClusterTimeout);
                }
                TransportStatus::ConnectionLost | TransportStatus::Dropped => {
                    tally.transport_failure();
                }
            }
        }

        tally.finish()
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn record_worst(worst: &mut Option<Error>, candidate: Error) {
    let replace = match worst {
        Some(current) => candidate.transport_severity() > current.transport_severity(),
        None => true,
    };
    if replace {
        *worst = Some(candidate);
    }
}

/// Slow-path aggregation over per-shard responses
///
/// All but one shard are expected to answer 404. One positive answer
/// wins; two or more are contradictory; all-404 forwards the 404.
#[derive(Default)]
struct ResponseTally {
    positive: usize,
    winner: Option<ShardResponse>,
    last_not_found: Option<ShardResponse>,
    failures: usize,
}

impl ResponseTally {
    fn observe(&mut self, shard: &str, response: ShardResponse) {
        if response.is_not_found() {
            self.last_not_found = Some(response);
        } else {
            debug!(shard, status = response.status, "positive shard answer");
            self.positive += 1;
            self.winner = Some(response);
        }
    }

    fn transport_failure(&mut self) {
        self.failures += 1;
    }

    fn finish(self) -> Result<CoordinatorResponse> {
        if self.positive > 1 {
            return Err(Error::ClusterGotContradictingAnswers);
        }
        if let Some(winner) = self.winner {
            return Ok(winner.into());
        }
        if let Some(not_found) = self.last_not_found {
            // every answering shard said 404, forward it
            return Ok(not_found.into());
        }
        Err(Error::ClusterConnectionLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn cluster(shard_keys: Vec<&str>) -> (Arc<ClusterInfo>, Arc<InMemoryTransport>, Coordinator) {
        let info = Arc::new(ClusterInfo::new());
        let mut shards = BTreeMap::new();
        shards.insert("s1".to_string(), "serverA".to_string());
        shards.insert("s2".to_string(), "serverB".to_string());
        info.register_collection(
            "db",
            CollectionInfo::new(
                1,
                "users",
                shard_keys.into_iter().map(String::from).collect(),
                shards,
            ),
        );

        let transport = Arc::new(InMemoryTransport::new());
        let coordinator = Coordinator::new(
            Arc::clone(&info),
            Arc::clone(&transport) as Arc<dyn ShardTransport>,
        );
        (info, transport, coordinator)
    }

    fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    #[test]
    fn test_create_with_default_sharding_allows_user_key() {
        let (_info, transport, coordinator) = cluster(vec!["_key"]);
        for shard in ["s1", "s2"] {
            transport.register_shard(shard, |req| {
                assert_eq!(req.method, Method::Post);
                TransportStatus::Received(ShardResponse::json(201, "{}"))
            });
        }

        let response = coordinator
            .create_document("db", "users", false, json!({"_key": "k1"}), timeout())
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[test]
    fn test_create_with_custom_sharding_rejects_user_key() {
        let (_info, _transport, coordinator) = cluster(vec!["u"]);
        let err = coordinator
            .create_document("db", "users", false, json!({"_key": "k1", "u": 1}), timeout())
            .unwrap_err();
        assert!(matches!(err, Error::ClusterMustNotSpecifyKey));
    }

    #[test]
    fn test_create_generates_key_when_absent() {
        let (_info, transport, coordinator) = cluster(vec!["u"]);
        for shard in ["s1", "s2"] {
            transport.register_shard(shard, |req| {
                let body: Value =
                    serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
                assert!(body.get("_key").is_some(), "generated key must be present");
                TransportStatus::Received(ShardResponse::json(201, "{}"))
            });
        }

        coordinator
            .create_document("db", "users", false, json!({"u": 1}), timeout())
            .unwrap();
    }

    #[test]
    fn test_delete_fast_path_uses_single_shard() {
        let (info, transport, coordinator) = cluster(vec!["_key"]);
        let expected = info
            .collection("db", "users")
            .unwrap()
            .responsible_shard(&json!({"_key": "k"}), true)
            .unwrap();

        let hit = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for shard in ["s1", "s2"] {
            let hit = Arc::clone(&hit);
            let expected = expected.clone();
            let shard_name = shard.to_string();
            transport.register_shard(shard, move |_req| {
                assert_eq!(shard_name, expected, "only the responsible shard is asked");
                hit.fetch_add(1, Ordering::SeqCst);
                TransportStatus::Received(ShardResponse::json(200, "{}"))
            });
        }

        coordinator
            .delete_document(
                "db",
                "users",
                "k",
                None,
                UpdatePolicy::Error,
                false,
                timeout(),
            )
            .unwrap();
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slow_path_accepts_single_positive_answer() {
        let (_info, transport, coordinator) = cluster(vec!["u"]);
        transport.register_shard("s1", |_| {
            TransportStatus::Received(ShardResponse::json(404, ""))
        });
        transport.register_shard("s2", |_| {
            TransportStatus::Received(ShardResponse::json(200, "{\"_key\":\"k\"}"))
        });

        let response = coordinator
            .delete_document(
                "db",
                "users",
                "k",
                None,
                UpdatePolicy::Error,
                false,
                timeout(),
            )
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_slow_path_contradicting_answers() {
        let (_info, transport, coordinator) = cluster(vec!["u"]);
        for shard in ["s1", "s2"] {
            transport.register_shard(shard, |_| {
                TransportStatus::Received(ShardResponse::json(200, "{}"))
            });
        }

        let err = coordinator
            .delete_document(
                "db",
                "users",
                "k",
                None,
                UpdatePolicy::Error,
                false,
                timeout(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ClusterGotContradictingAnswers));
    }

    #[test]
    fn test_slow_path_all_not_found_forwards_404() {
        let (_info, transport, coordinator) = cluster(vec!["u"]);
        for shard in ["s1", "s2"] {
            transport.register_shard(shard, |_| {
                TransportStatus::Received(ShardResponse::json(404, "{}"))
            });
        }

        let response = coordinator
            .get_document("db", "users", "k", None, false, true, timeout())
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_get_sets_if_none_match_on_every_slow_path_request() {
        let (_info, transport, coordinator) = cluster(vec!["u"]);
        for shard in ["s1", "s2"] {
            transport.register_shard(shard, |req| {
                let header = req
                    .headers
                    .iter()
                    .find(|(name, _)| name == "If-None-Match");
                assert!(header.is_some(), "conditional header must be set per request");
                TransportStatus::Received(ShardResponse::json(404, ""))
            });
        }

        coordinator
            .get_document("db", "users", "k", Some(7), true, true, timeout())
            .unwrap();
    }

    #[test]
    fn test_modify_patch_without_sharding_attributes_broadcasts() {
        let (_info, transport, coordinator) = cluster(vec!["u"]);
        let asked = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for shard in ["s1", "s2"] {
            let asked = Arc::clone(&asked);
            transport.register_shard(shard, move |req| {
                assert_eq!(req.method, Method::Patch);
                asked.fetch_add(1, Ordering::SeqCst);
                TransportStatus::Received(ShardResponse::json(404, ""))
            });
        }

        coordinator
            .modify_document(
                "db",
                "users",
                "k",
                None,
                true,
                true,
                &json!({"name": "x"}),
                timeout(),
            )
            .unwrap();
        assert_eq!(asked.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_modify_replace_falls_back_to_slow_path_on_negative_answer() {
        let (info, transport, coordinator) = cluster(vec!["u"]);
        let doc = json!({"u": "moved", "name": "x"});
        let fast_shard = info
            .collection("db", "users")
            .unwrap()
            .responsible_shard(&doc, true)
            .unwrap();

        // the addressed shard does not know the document, the other does
        for shard in ["s1", "s2"] {
            let fast = fast_shard.clone();
            let name = shard.to_string();
            transport.register_shard(shard, move |_req| {
                if name == fast {
                    TransportStatus::Received(ShardResponse::json(404, ""))
                } else {
                    TransportStatus::Received(ShardResponse::json(200, "{}"))
                }
            });
        }

        let response = coordinator
            .modify_document("db", "users", "k", None, false, true, &doc, timeout())
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_timeout_maps_to_cluster_timeout() {
        let (_info, transport, coordinator) = cluster(vec!["_key"]);
        for shard in ["s1", "s2"] {
            transport.register_shard(shard, |_| TransportStatus::Timeout);
        }

        let err = coordinator
            .get_document("db", "users", "k", None, false, true, timeout())
            .unwrap_err();
        assert!(matches!(err, Error::ClusterTimeout));
    }

    #[test]
    fn test_timeout_outranks_connection_loss() {
        let (_info, transport, coordinator) = cluster(vec!["_key"]);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for shard in ["s1", "s2"] {
            let calls = Arc::clone(&calls);
            transport.register_shard(shard, move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    TransportStatus::ConnectionLost
                } else {
                    TransportStatus::Timeout
                }
            });
        }

        let err = coordinator
            .get_document("db", "users", "k", None, false, true, timeout())
            .unwrap_err();
        assert!(matches!(err, Error::ClusterTimeout));
    }

    #[test]
    fn test_count_sums_all_shards() {
        let (_info, transport, coordinator) = cluster(vec!["u"]);
        transport.register_shard("s1", |_| {
            TransportStatus::Received(ShardResponse::json(200, "{\"count\": 10}"))
        });
        transport.register_shard("s2", |_| {
            TransportStatus::Received(ShardResponse::json(200, "{\"count\": 32}"))
        });

        assert_eq!(coordinator.count("db", "users", timeout()).unwrap(), 42);
    }

    #[test]
    fn test_count_requires_every_shard() {
        let (_info, transport, coordinator) = cluster(vec!["u"]);
        transport.register_shard("s1", |_| {
            TransportStatus::Received(ShardResponse::json(200, "{\"count\": 10}"))
        });
        transport.register_shard("s2", |_| TransportStatus::ConnectionLost);

        assert!(coordinator.count("db", "users", timeout()).is_err());
    }

    #[test]
    fn test_shard_keys_changed() {
        let (_info, _transport, coordinator) = cluster(vec!["u"]);

        let old = json!({"u": 1, "name": "a"});
        assert!(!coordinator.shard_keys_changed("db", "users", &old, &json!({"u": 1}), false));
        assert!(coordinator.shard_keys_changed("db", "users", &old, &json!({"u": 2}), false));

        // patch without the attribute means no change
        assert!(!coordinator.shard_keys_changed("db", "users", &old, &json!({"name": "b"}), true));
        // replace without the attribute compares as null
        assert!(coordinator.shard_keys_changed("db", "users", &old, &json!({"name": "b"}), false));

        // non-objects always count as changed
        assert!(coordinator.shard_keys_changed("db", "users", &json!(1), &json!({}), false));
    }
}
