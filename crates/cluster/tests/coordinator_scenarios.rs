//! Fast-path vs slow-path routing scenarios

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vellum_cluster::{
    ClusterInfo, CollectionInfo, Coordinator, InMemoryTransport, Method, ShardResponse,
    ShardTransport, TransportStatus, UpdatePolicy,
};
use vellum_core::Error;

fn cluster(shard_keys: Vec<&str>) -> (Arc<ClusterInfo>, Arc<InMemoryTransport>, Coordinator) {
    let info = Arc::new(ClusterInfo::new());
    let mut shards = BTreeMap::new();
    for name in ["s1", "s2", "s3"] {
        shards.insert(name.to_string(), format!("server-{}", name));
    }
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

/// Collection sharded on ["u"]: a remove keyed by `_key` cannot determine
/// the shard, so it broadcasts; exactly one shard holds the document.
#[test]
fn remove_on_custom_sharding_broadcasts() {
    let (_info, transport, coordinator) = cluster(vec!["u"]);

    let deletes = Arc::new(AtomicUsize::new(0));
    for shard in ["s1", "s2", "s3"] {
        let deletes = Arc::clone(&deletes);
        let holder = shard == "s2";
        transport.register_shard(shard, move |req| {
            assert_eq!(req.method, Method::Delete);
            deletes.fetch_add(1, Ordering::SeqCst);
            if holder {
                TransportStatus::Received(ShardResponse::json(200, "{\"_key\":\"k\"}"))
            } else {
                TransportStatus::Received(ShardResponse::json(404, ""))
            }
        });
    }

    let response = coordinator
        .delete_document(
            "db",
            "users",
            "k",
            None,
            UpdatePolicy::Error,
            false,
            Duration::from_secs(5),
        )
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(deletes.load(Ordering::SeqCst), 3, "all shards were asked");
}

/// An update that moves a sharding attribute lands on the wrong shard
/// first and then broadcasts; two positive answers would be contradictory.
#[test]
fn update_moving_shard_key_contradicting_answers() {
    let (_info, transport, coordinator) = cluster(vec!["u"]);

    // two shards both claim the document: corrupted cluster state
    for shard in ["s1", "s2", "s3"] {
        let positive = shard != "s3";
        transport.register_shard(shard, move |_req| {
            if positive {
                TransportStatus::Received(ShardResponse::json(200, "{}"))
            } else {
                TransportStatus::Received(ShardResponse::json(404, ""))
            }
        });
    }

    let err = coordinator
        .modify_document(
            "db",
            "users",
            "k",
            None,
            true,
            true,
            &json!({"name": "x"}),
            Duration::from_secs(5),
        )
        .unwrap_err();
    assert!(matches!(err, Error::ClusterGotContradictingAnswers));
}

/// With `_key` as the sole sharding attribute the coordinator asks one
/// shard, and the answer is forwarded verbatim.
#[test]
fn fast_path_forwards_shard_answer() {
    let (info, transport, coordinator) = cluster(vec!["_key"]);
    let responsible = info
        .collection("db", "users")
        .unwrap()
        .responsible_shard(&json!({"_key": "k"}), true)
        .unwrap();

    let asked = Arc::new(AtomicUsize::new(0));
    for shard in ["s1", "s2", "s3"] {
        let asked = Arc::clone(&asked);
        let responsible = responsible.clone();
        let name = shard.to_string();
        transport.register_shard(shard, move |_req| {
            assert_eq!(name, responsible);
            asked.fetch_add(1, Ordering::SeqCst);
            TransportStatus::Received(ShardResponse::json(412, "{\"error\":true}"))
        });
    }

    let response = coordinator
        .get_document(
            "db",
            "users",
            "k",
            Some(9),
            false,
            true,
            Duration::from_secs(5),
        )
        .unwrap();

    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(response.status, 412, "shard answers pass through unchanged");
    assert_eq!(response.body, "{\"error\":true}");
}
