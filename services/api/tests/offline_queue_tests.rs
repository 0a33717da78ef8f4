use api_lib::adapters::QueuedStore;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use reading_tracker_core::connectivity::ConnectivityMonitor;
use reading_tracker_core::domain::CollectionKind;
use reading_tracker_core::ports::{PortError, PortResult, RemoteStore, Snapshot, SnapshotStream, WriteOp};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records what reaches it and serves one fixed snapshot per subscription.
#[derive(Default)]
struct RecordingStore {
    documents: Vec<Value>,
    delivered: Mutex<Vec<(String, Vec<WriteOp>)>>,
    failing: AtomicBool,
    latency: Duration,
}

impl RecordingStore {
    fn with_documents(documents: Vec<Value>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn delivered(&self) -> Vec<(String, Vec<WriteOp>)> {
        self.delivered.lock().unwrap().clone()
    }

    fn record(&self, user_id: &str, ops: Vec<WriteOp>) -> PortResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("store down".to_string()));
        }
        self.delivered.lock().unwrap().push((user_id.to_string(), ops));
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for RecordingStore {
    async fn subscribe(&self, _user_id: &str, _collection: CollectionKind) -> PortResult<SnapshotStream> {
        let snapshot = Snapshot {
            documents: self.documents.clone(),
            ..Snapshot::default()
        };
        Ok(Box::pin(stream::iter(vec![Ok(snapshot)]).chain(stream::pending())))
    }

    async fn write(&self, user_id: &str, op: WriteOp) -> PortResult<()> {
        tokio::time::sleep(self.latency).await;
        self.record(user_id, vec![op])
    }

    async fn commit(&self, user_id: &str, ops: Vec<WriteOp>) -> PortResult<()> {
        tokio::time::sleep(self.latency).await;
        self.record(user_id, ops)
    }
}

fn merge(id: &str, fields: Value) -> WriteOp {
    WriteOp::Merge {
        collection: CollectionKind::Books,
        id: id.to_string(),
        fields,
    }
}

fn setup(online: bool, documents: Vec<Value>) -> (Arc<RecordingStore>, Arc<ConnectivityMonitor>, Arc<QueuedStore>) {
    let inner = Arc::new(RecordingStore::with_documents(documents));
    let connectivity = Arc::new(ConnectivityMonitor::new(online));
    let store = Arc::new(QueuedStore::new(inner.clone(), connectivity.clone()));
    (inner, connectivity, store)
}

async fn next_snapshot(stream: &mut SnapshotStream) -> Snapshot {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("no snapshot within two seconds")
        .expect("subscription ended")
        .expect("subscription failed")
}

#[tokio::test]
async fn online_writes_go_straight_through() {
    let (inner, _connectivity, store) = setup(true, Vec::new());

    store.write("reader-1", merge("b1", json!({"order": 0}))).await.unwrap();

    assert_eq!(store.queued().await, 0);
    assert_eq!(inner.delivered().len(), 1);
}

#[tokio::test]
async fn offline_writes_are_queued_and_shown_as_pending() {
    let (inner, _connectivity, store) = setup(false, vec![json!({"id": "b1", "title": "Dune", "order": 0})]);
    let mut books = store.subscribe("reader-1", CollectionKind::Books).await.unwrap();

    let confirmed = next_snapshot(&mut books).await;
    assert!(!confirmed.has_pending_writes);
    assert!(confirmed.from_cache);

    store.write("reader-1", merge("b1", json!({"isFavorite": true}))).await.unwrap();
    let pending = next_snapshot(&mut books).await;

    assert!(inner.delivered().is_empty());
    assert_eq!(store.queued().await, 1);
    assert!(pending.has_pending_writes);
    assert_eq!(pending.documents[0]["isFavorite"], json!(true));
    assert_eq!(pending.documents[0]["title"], json!("Dune"));
}

#[tokio::test]
async fn other_users_do_not_see_queued_writes() {
    let (_inner, _connectivity, store) = setup(false, Vec::new());
    let mut theirs = store.subscribe("reader-2", CollectionKind::Books).await.unwrap();
    next_snapshot(&mut theirs).await;

    store.write("reader-1", merge("b1", json!({"title": "Dune"}))).await.unwrap();

    let quiet = tokio::time::timeout(Duration::from_millis(100), theirs.next()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn replay_delivers_in_fifo_order() {
    let (inner, connectivity, store) = setup(false, Vec::new());

    store.write("reader-1", merge("b1", json!({"order": 1}))).await.unwrap();
    store
        .commit(
            "reader-1",
            vec![merge("b1", json!({"order": 0})), merge("b2", json!({"order": 1}))],
        )
        .await
        .unwrap();
    store.write("reader-1", merge("b3", json!({"order": 2}))).await.unwrap();

    connectivity.set_online(true);
    assert_eq!(store.replay().await, 3);

    let delivered = inner.delivered();
    assert_eq!(delivered.len(), 3);
    assert_eq!(delivered[0].1, vec![merge("b1", json!({"order": 1}))]);
    assert_eq!(delivered[1].1.len(), 2);
    assert_eq!(delivered[2].1, vec![merge("b3", json!({"order": 2}))]);
    assert_eq!(store.queued().await, 0);
}

#[tokio::test]
async fn a_failed_replay_keeps_the_write_at_the_front() {
    let (inner, connectivity, store) = setup(false, Vec::new());
    store.write("reader-1", merge("b1", json!({"order": 0}))).await.unwrap();
    store.write("reader-1", merge("b2", json!({"order": 1}))).await.unwrap();

    connectivity.set_online(true);
    inner.failing.store(true, Ordering::SeqCst);
    assert_eq!(store.replay().await, 0);
    assert_eq!(store.queued().await, 2);

    inner.failing.store(false, Ordering::SeqCst);
    assert_eq!(store.replay().await, 2);
    let ids: Vec<String> = inner
        .delivered()
        .iter()
        .map(|(_, ops)| ops[0].id().to_string())
        .collect();
    assert_eq!(ids, vec!["b1", "b2"]);
}

#[tokio::test]
async fn a_write_stays_queued_until_the_store_accepts_it() {
    let inner = Arc::new(RecordingStore::with_latency(Duration::from_millis(300)));
    let connectivity = Arc::new(ConnectivityMonitor::new(false));
    let store = Arc::new(QueuedStore::new(inner.clone(), connectivity.clone()));
    store.write("reader-1", merge("b1", json!({"title": "Dune"}))).await.unwrap();

    connectivity.set_online(true);
    let replay = tokio::spawn({
        let store = store.clone();
        async move { store.replay().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // In flight: not yet accepted, so still pending.
    assert!(inner.delivered().is_empty());
    assert_eq!(store.queued().await, 1);

    assert_eq!(replay.await.unwrap(), 1);
    assert_eq!(store.queued().await, 0);
    assert_eq!(inner.delivered().len(), 1);
}

#[tokio::test]
async fn overlapping_replays_deliver_each_write_once() {
    let inner = Arc::new(RecordingStore::with_latency(Duration::from_millis(50)));
    let connectivity = Arc::new(ConnectivityMonitor::new(false));
    let store = Arc::new(QueuedStore::new(inner.clone(), connectivity.clone()));
    for id in ["b1", "b2"] {
        store.write("reader-1", merge(id, json!({}))).await.unwrap();
    }

    connectivity.set_online(true);
    let (first, second) = tokio::join!(store.replay(), store.replay());

    assert_eq!(first + second, 2);
    assert_eq!(inner.delivered().len(), 2);
}

#[tokio::test]
async fn a_full_queue_drops_the_oldest_write() {
    let inner = Arc::new(RecordingStore::default());
    let connectivity = Arc::new(ConnectivityMonitor::new(false));
    let store = QueuedStore::new(inner.clone(), connectivity.clone()).with_max_queue(2);

    for id in ["b1", "b2", "b3"] {
        store.write("reader-1", merge(id, json!({}))).await.unwrap();
    }
    assert_eq!(store.queued().await, 2);

    connectivity.set_online(true);
    store.replay().await;
    let ids: Vec<String> = inner
        .delivered()
        .iter()
        .map(|(_, ops)| ops[0].id().to_string())
        .collect();
    assert_eq!(ids, vec!["b2", "b3"]);
}

#[tokio::test]
async fn reconnecting_replays_in_the_background() {
    let (inner, connectivity, store) = setup(false, Vec::new());
    let replay = store.spawn_replay();
    store.write("reader-1", merge("b1", json!({"order": 0}))).await.unwrap();

    connectivity.set_online(true);

    let delivered = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !inner.delivered().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(delivered.is_ok(), "queued write was not replayed");
    assert_eq!(store.queued().await, 0);
    replay.abort();
}
