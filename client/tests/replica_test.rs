//! Integration tests for replica sync.
//!
//! These run against the in-memory transport, which keeps real revision
//! semantics and lets failures be injected per endpoint.

use datasync_client::{
    Client, ClientConfig, Context, ControllerState, Endpoint, Error, InMemoryTransport,
    MemoryCache, OpenOptions, PollingWatcher, Transport, TransportError, Watcher,
};
use datasync_engine::{ConflictKind, ConflictPolicy, Operation, Value};
use std::sync::Arc;
use std::time::Duration;

const DB: &str = "notes";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datasync_client=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Transport holding one database advanced to `revision` by empty deltas.
fn transport_at(revision: u64) -> Arc<InMemoryTransport> {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new());
    for _ in 0..revision {
        transport.commit_remote(Context::App, DB, vec![]).unwrap();
    }
    transport
}

fn client(transport: &Arc<InMemoryTransport>) -> Client {
    Client::new(ClientConfig::default(), transport.clone())
}

fn options() -> OpenOptions {
    OpenOptions::new(Context::App, DB)
}

fn x_of(record: Option<datasync_engine::Record>) -> Option<Value> {
    record.and_then(|r| r.get("x").cloned())
}

// ============================================================================
// Basic Sync
// ============================================================================

#[tokio::test]
async fn insert_and_commit() {
    let transport = transport_at(5);
    let db = client(&transport).open(options()).await.unwrap();
    assert_eq!(db.revision(), 5);
    assert_eq!(db.state(), ControllerState::Ready);

    let mut tx = db.transaction();
    tx.set_fields("c", "r1", [("x", Value::Integer(1))]).unwrap();
    assert_eq!(tx.base_revision(), 5);

    assert_eq!(tx.push(None).await.unwrap(), 6);
    assert_eq!(db.revision(), 6);
    assert_eq!(x_of(db.get_record(Some("c"), "r1").unwrap()), Some(Value::Integer(1)));
    assert_eq!(transport.head_revision(Context::App, DB), Some(6));
}

#[tokio::test]
async fn remote_changes_arrive_on_update() {
    let transport = transport_at(1);
    let db = client(&transport).open(options()).await.unwrap();

    transport
        .commit_remote(Context::App, DB, vec![Operation::insert("c", "r1", [("x", Value::Integer(7))])])
        .unwrap();
    assert_eq!(db.update().await.unwrap(), 2);
    assert_eq!(x_of(db.get_record(Some("c"), "r1").unwrap()), Some(Value::Integer(7)));
}

#[tokio::test]
async fn subscribers_see_new_revisions() {
    let transport = transport_at(0);
    let db = client(&transport).open(options()).await.unwrap();
    let mut revisions = db.subscribe();

    let mut tx = db.transaction();
    tx.set_fields("c", "r1", [("x", Value::Integer(1))]).unwrap();
    tx.push(None).await.unwrap();

    revisions.changed().await.unwrap();
    assert_eq!(*revisions.borrow(), 1);
}

#[tokio::test]
async fn empty_transaction_resolves_to_current_revision() {
    let transport = transport_at(3);
    let db = client(&transport).open(options()).await.unwrap();

    assert_eq!(db.transaction().push(None).await.unwrap(), 3);
    assert_eq!(transport.request_count(Endpoint::PostDelta), 0);
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn accept_theirs_drops_conflicting_update() {
    let transport = transport_at(4);
    transport
        .commit_remote(Context::App, DB, vec![Operation::insert("c", "r1", [("x", Value::Integer(1))])])
        .unwrap();
    let db = client(&transport).open(options()).await.unwrap();
    assert_eq!(db.revision(), 5);

    // Built against revision 5, before the remote write below.
    let mut tx = db.transaction();
    tx.update_fields("c", "r1", [("x", Value::Integer(3))]).unwrap();

    transport
        .commit_remote(Context::App, DB, vec![Operation::update_fields("c", "r1", [("x", Value::Integer(2))])])
        .unwrap();
    db.update().await.unwrap();

    let err = tx.push(None).await.unwrap_err();
    let conflict = err.as_conflict().unwrap();
    assert_eq!(conflict.base_revision, 5);
    assert_eq!(conflict.conflicts.len(), 1);
    assert_eq!(conflict.conflicts[0].index, 0);
    assert_eq!(conflict.conflicts[0].conflict, ConflictKind::BothModified);
    assert_eq!(conflict.revision_history_since.len(), 1);

    assert_eq!(tx.push(Some(ConflictPolicy::AcceptTheirs)).await.unwrap(), 6);
    assert_eq!(x_of(db.get_record(Some("c"), "r1").unwrap()), Some(Value::Integer(2)));
    assert_eq!(transport.request_count(Endpoint::PostDelta), 0);
}

#[tokio::test]
async fn accept_theirs_keeps_clean_operations() {
    let transport = transport_at(0);
    let db = client(&transport).open(options()).await.unwrap();

    let mut tx = db.transaction();
    tx.update_fields("c", "missing", [("x", Value::Integer(1))])
        .unwrap()
        .set_fields("c", "r2", [("y", Value::Integer(2))])
        .unwrap();

    assert!(matches!(tx.push(None).await, Err(Error::Conflict(_))));
    assert_eq!(tx.push(Some(ConflictPolicy::AcceptTheirs)).await.unwrap(), 1);
    assert!(db.get_record(Some("c"), "r2").unwrap().is_some());
    assert!(db.get_record(Some("c"), "missing").unwrap().is_none());
}

#[tokio::test]
async fn stale_revision_is_retried_after_catch_up() {
    let transport = transport_at(2);
    let db = client(&transport).open(options()).await.unwrap();

    // Unrelated remote write the replica has not seen yet.
    transport
        .commit_remote(Context::App, DB, vec![Operation::insert("c", "other", [("x", Value::Integer(0))])])
        .unwrap();

    let mut tx = db.transaction();
    tx.set_fields("c", "r1", [("x", Value::Integer(1))]).unwrap();

    assert_eq!(tx.push(None).await.unwrap(), 4);
    assert_eq!(transport.request_count(Endpoint::PostDelta), 2);
    assert!(db.get_record(Some("c"), "other").unwrap().is_some());
    assert_eq!(x_of(db.get_record(Some("c"), "r1").unwrap()), Some(Value::Integer(1)));
}

#[tokio::test]
async fn conflict_found_after_catch_up_is_reported() {
    let transport = transport_at(0);
    transport
        .commit_remote(Context::App, DB, vec![Operation::insert("c", "r1", [("x", Value::Integer(1))])])
        .unwrap();
    let db = client(&transport).open(options()).await.unwrap();

    transport
        .commit_remote(Context::App, DB, vec![Operation::delete("c", "r1")])
        .unwrap();

    let mut tx = db.transaction();
    tx.update_fields("c", "r1", [("x", Value::Integer(5))]).unwrap();

    let err = tx.push(None).await.unwrap_err();
    assert_eq!(
        err.as_conflict().unwrap().conflicts[0].conflict,
        ConflictKind::BothModified
    );
    assert_eq!(db.revision(), 2);
}

// ============================================================================
// Ambiguous Failures
// ============================================================================

#[tokio::test]
async fn possibly_missed_delta_is_not_resubmitted() {
    let transport = transport_at(1);
    let db = client(&transport).open(options()).await.unwrap();

    let mut tx = db.transaction();
    tx.set_fields("c", "r1", [("tags", Value::from(vec!["a"]))]).unwrap();

    // The server commits, but the response is lost.
    transport.fail_next_post_after_commit(TransportError::server_error("gateway timeout"));
    let err = tx.push(None).await.unwrap_err();
    assert!(matches!(err, Error::Transport(ref e) if e.is_server_error()));
    assert_eq!(transport.head_revision(Context::App, DB), Some(2));

    assert_eq!(tx.push(None).await.unwrap(), 2);
    assert_eq!(transport.request_count(Endpoint::PostDelta), 1);
    assert_eq!(db.revision(), 2);
    assert_eq!(
        db.get_record(Some("c"), "r1").unwrap().unwrap().get("tags"),
        Some(&Value::from(vec!["a"]))
    );
}

#[tokio::test]
async fn possibly_missed_delta_is_resubmitted_when_absent() {
    let transport = transport_at(1);
    let db = client(&transport).open(options()).await.unwrap();

    let mut tx = db.transaction();
    tx.set_fields("c", "r1", [("x", Value::Integer(1))]).unwrap();

    transport.fail_next(Endpoint::PostDelta, TransportError::server_error("unavailable"));
    assert!(tx.push(None).await.is_err());
    assert_eq!(transport.head_revision(Context::App, DB), Some(1));

    assert_eq!(tx.push(None).await.unwrap(), 2);
    assert_eq!(transport.request_count(Endpoint::PostDelta), 2);
}

#[tokio::test]
async fn client_errors_are_not_marked_missed() {
    let transport = transport_at(0);
    let db = client(&transport).open(options()).await.unwrap();

    let mut tx = db.transaction();
    tx.set_fields("c", "r1", [("x", Value::Integer(1))]).unwrap();

    transport.fail_next(Endpoint::PostDelta, TransportError::new(403, "forbidden"));
    assert!(matches!(tx.push(None).await, Err(Error::Transport(ref e)) if e.status == 403));

    let deltas_before = transport.request_count(Endpoint::Deltas);
    assert_eq!(tx.push(None).await.unwrap(), 1);
    assert_eq!(transport.request_count(Endpoint::Deltas), deltas_before);
}

#[tokio::test]
async fn trimmed_history_forgets_possibly_missed_deltas() {
    let transport = transport_at(1);
    let db = client(&transport).open(options()).await.unwrap();

    let mut tx = db.transaction();
    tx.set_fields("c", "r1", [("x", Value::Integer(1))]).unwrap();
    transport.fail_next_post_after_commit(TransportError::server_error("gateway timeout"));
    assert!(tx.push(None).await.is_err());

    assert_eq!(db.update().await.unwrap(), 2);
    assert_eq!(db.read(|dataset| dataset.revision_history().len()).unwrap(), 1);

    assert_eq!(db.trim_history_before(2).await.unwrap(), 2);
    assert!(db.read(|dataset| dataset.revision_history().is_empty()).unwrap());

    // Base revision 1 is now older than the history, so nothing can be proven clean.
    let err = tx.push(None).await.unwrap_err();
    assert_eq!(
        err.as_conflict().unwrap().conflicts[0].conflict,
        ConflictKind::BothModified
    );
    assert_eq!(transport.request_count(Endpoint::PostDelta), 1);
}

// ============================================================================
// Serialization
// ============================================================================

#[tokio::test]
async fn patches_run_one_at_a_time() {
    let transport = transport_at(0);
    let db = client(&transport).open(options()).await.unwrap();
    transport.set_post_delay(Some(Duration::from_millis(50)));

    let mut first = db.transaction();
    first.set_fields("c", "a", [("x", Value::Integer(1))]).unwrap();
    let mut second = db.transaction();
    second.set_fields("c", "b", [("x", Value::Integer(2))]).unwrap();

    let (a, b) = tokio::join!(first.push(None), second.push(None));
    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 2);

    let posts: Vec<String> = transport
        .events()
        .into_iter()
        .filter(|event| event.starts_with("post"))
        .collect();
    assert_eq!(
        posts,
        vec![
            format!("post app/{} {} start", DB, first.delta_id()),
            format!("post app/{} {} end", DB, first.delta_id()),
            format!("post app/{} {} start", DB, second.delta_id()),
            format!("post app/{} {} end", DB, second.delta_id()),
        ]
    );
}

#[tokio::test]
async fn queued_patch_dry_runs_after_earlier_commit() {
    let transport = transport_at(0);
    let db = client(&transport).open(options()).await.unwrap();
    transport.set_post_delay(Some(Duration::from_millis(50)));

    let mut first = db.transaction();
    first.set_fields("c", "a", [("x", Value::Integer(1))]).unwrap();
    let mut second = db.transaction();
    second.set_fields("c", "a", [("x", Value::Integer(2))]).unwrap();

    let deltas_before = transport.request_count(Endpoint::Deltas);
    let (a, b) = tokio::join!(first.push(None), second.push(None));
    assert_eq!(a.unwrap(), 1);

    // The second dry run already sees the first commit, so nothing is sent.
    let err = b.unwrap_err();
    let conflict = err.as_conflict().unwrap();
    assert_eq!(conflict.conflicts[0].conflict, ConflictKind::BothModified);
    assert_eq!(conflict.revision_history_since.len(), 1);
    assert_eq!(&conflict.revision_history_since[0].delta_id, first.delta_id());
    assert_eq!(transport.request_count(Endpoint::PostDelta), 1);
    assert_eq!(transport.request_count(Endpoint::Deltas), deltas_before);
}

#[tokio::test]
async fn concurrent_updates_share_one_fetch() {
    let transport = transport_at(0);
    let db = client(&transport).open(options()).await.unwrap();
    transport.set_post_delay(Some(Duration::from_millis(50)));
    transport
        .commit_remote(Context::App, DB, vec![Operation::insert("c", "r", [("x", Value::Integer(1))])])
        .unwrap();

    // Hold the queue with a slow patch so both updates wait behind it.
    let mut tx = db.transaction();
    tx.set_fields("c", "slow", [("x", Value::Integer(1))]).unwrap();

    let deltas_before = transport.request_count(Endpoint::Deltas);
    let (push, (a, b)) = tokio::join!(tx.push(None), async {
        tokio::join!(db.update(), db.update())
    });

    push.unwrap();
    assert_eq!(a.unwrap(), b.unwrap());
    // One fetch for the patch retry, one shared by both updates.
    assert_eq!(transport.request_count(Endpoint::Deltas), deltas_before + 2);
}

// ============================================================================
// Replica Lifecycle
// ============================================================================

#[tokio::test]
async fn removed_database_makes_replica_gone() {
    let transport = transport_at(1);
    let db = client(&transport).open(options()).await.unwrap();
    let mut tx = db.transaction();
    tx.set_fields("c", "r1", [("x", Value::Integer(1))]).unwrap();

    transport.remove_database(Context::App, DB);
    assert!(matches!(db.update().await, Err(Error::ReplicaGone(_))));
    assert_eq!(db.state(), ControllerState::Gone);
    assert!(matches!(db.get_record(Some("c"), "r1"), Err(Error::ReplicaGone(_))));

    let deltas = transport.request_count(Endpoint::Deltas);
    assert!(matches!(db.update().await, Err(Error::ReplicaGone(_))));
    assert!(matches!(tx.push(None).await, Err(Error::ReplicaGone(_))));
    assert_eq!(transport.request_count(Endpoint::Deltas), deltas);
    assert_eq!(transport.request_count(Endpoint::PostDelta), 0);
}

#[tokio::test]
async fn gone_replica_is_replaced_on_reopen() {
    let transport = transport_at(2);
    let client = client(&transport);
    let db = client.open(options()).await.unwrap();

    transport.remove_database(Context::App, DB);
    assert!(matches!(db.update().await, Err(Error::ReplicaGone(_))));

    transport.create_database(Context::App, DB).await.unwrap();
    let reopened = client.open(options()).await.unwrap();

    assert!(db.is_closed());
    assert_eq!(reopened.state(), ControllerState::Ready);
    assert_eq!(reopened.revision(), 0);
    assert_eq!(reopened.update().await.unwrap(), 0);
    assert_eq!(client.registry().len(), 1);
}

#[tokio::test]
async fn closed_replica_rejects_calls() {
    let transport = transport_at(0);
    let db = client(&transport).open(options()).await.unwrap();
    let tx = db.transaction();

    db.close();
    assert!(matches!(db.update().await, Err(Error::Closed(_))));
    assert!(matches!(tx.push(None).await, Err(Error::Closed(_))));
    assert!(matches!(db.get_record(Some("c"), "r"), Err(Error::Closed(_))));
}

#[tokio::test]
async fn collection_filter_limits_transactions() {
    let transport = transport_at(0);
    transport
        .commit_remote(
            Context::App,
            DB,
            vec![
                Operation::insert("todos", "t1", [("x", Value::Integer(1))]),
                Operation::insert("notes", "n1", [("x", Value::Integer(1))]),
            ],
        )
        .unwrap();
    let db = client(&transport)
        .open(options().collection("todos"))
        .await
        .unwrap();

    assert!(db.get_record(None, "t1").unwrap().is_some());
    assert_eq!(db.records("todos").unwrap().len(), 1);
    assert!(db.records("notes").is_err());

    let mut tx = db.transaction();
    let err = tx
        .set_fields("notes", "n2", [("x", Value::Integer(1))])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Engine(datasync_engine::Error::CollectionMismatch { .. })
    ));
    assert!(tx.is_empty());
}

#[tokio::test]
async fn client_reuses_open_replicas() {
    let transport = transport_at(0);
    let client = client(&transport);

    let a = client.open(options()).await.unwrap();
    let b = client.open(options()).await.unwrap();
    assert_eq!(transport.request_count(Endpoint::Snapshot), 1);
    assert_eq!(client.registry().len(), 1);

    assert!(client.close(a.key()));
    assert!(b.is_closed());

    let c = client.open(options()).await.unwrap();
    assert!(!c.is_closed());
    assert_eq!(client.close_all(), 1);
    assert!(c.is_closed());
}

#[tokio::test]
async fn missing_database_is_created_on_request() {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new());
    let client = client(&transport);

    assert!(client.open(options()).await.is_err());
    let db = client.open(options().create_if_absent(true)).await.unwrap();
    assert_eq!(db.revision(), 0);
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn corrupt_cache_falls_back_to_snapshot() {
    use datasync_client::Cache;

    let transport = transport_at(2);
    let cache = MemoryCache::new_shared();
    cache
        .set(&options().key(), "{definitely not a dataset".into())
        .await
        .unwrap();

    let db = client(&transport)
        .with_cache(cache.clone())
        .open(options())
        .await
        .unwrap();

    assert_eq!(db.revision(), 2);
    assert_eq!(transport.request_count(Endpoint::Snapshot), 1);
    let repaired = cache.get(&options().key()).await.unwrap().unwrap();
    assert!(datasync_engine::DatasetSnapshot::from_json(&repaired).is_ok());
}

#[tokio::test]
async fn file_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transport = transport_at(0);
    transport
        .commit_remote(Context::App, DB, vec![Operation::insert("c", "r1", [("x", Value::Integer(1))])])
        .unwrap();
    let config = ClientConfig {
        cache_dir: Some(dir.path().to_path_buf()),
        ..ClientConfig::default()
    };

    {
        let client = Client::new(config.clone(), transport.clone());
        client.open(options()).await.unwrap();
        client.close_all();
    }

    transport
        .commit_remote(Context::App, DB, vec![Operation::update_fields("c", "r1", [("x", Value::Integer(2))])])
        .unwrap();

    let client = Client::new(config, transport.clone());
    let db = client.open(options()).await.unwrap();

    assert_eq!(transport.request_count(Endpoint::Snapshot), 1);
    assert_eq!(db.revision(), 2);
    assert_eq!(x_of(db.get_record(Some("c"), "r1").unwrap()), Some(Value::Integer(2)));
}

// ============================================================================
// Watcher
// ============================================================================

#[tokio::test]
async fn polling_schedules_updates_for_stale_replicas() {
    let transport = transport_at(1);
    let db = client(&transport).open(options()).await.unwrap();
    let watcher = PollingWatcher::new_shared(transport.clone(), Duration::from_secs(3600));
    watcher.add_replica(db.clone());

    assert_eq!(watcher.poll_once().await, 0);

    transport.commit_remote(Context::App, DB, vec![]).unwrap();
    let mut revisions = db.subscribe();
    assert_eq!(watcher.poll_once().await, 1);

    tokio::time::timeout(Duration::from_secs(5), revisions.wait_for(|revision| *revision >= 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db.revision(), 2);

    watcher.remove_replica(db.key());
    assert_eq!(watcher.replica_count(), 0);
}

#[tokio::test]
async fn polling_stops_watching_removed_databases() {
    let transport = transport_at(1);
    let db = client(&transport).open(options()).await.unwrap();
    let watcher = PollingWatcher::new_shared(transport.clone(), Duration::from_secs(3600));
    watcher.add_replica(db.clone());

    transport.remove_database(Context::App, DB);
    let metadata_before = transport.request_count(Endpoint::Metadata);

    assert_eq!(watcher.poll_once().await, 0);
    assert_eq!(watcher.replica_count(), 0);
    assert_eq!(watcher.poll_once().await, 0);
    assert_eq!(transport.request_count(Endpoint::Metadata), metadata_before + 1);
    assert_eq!(transport.request_count(Endpoint::Deltas), 1);
}

#[tokio::test]
async fn gone_replicas_are_dropped_on_notification() {
    let transport = transport_at(1);
    let db = client(&transport).open(options()).await.unwrap();
    transport.remove_database(Context::App, DB);
    assert!(db.update().await.is_err());

    let watcher = PollingWatcher::new_shared(transport.clone(), Duration::from_secs(3600));
    watcher.add_replica(db.clone());

    assert!(!watcher.on_revision_advance(db.key(), 5));
    assert_eq!(watcher.replica_count(), 0);
}
