//! In-memory doubles of every port, shared by the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures::stream;
use reading_tracker_core::*;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub fn user(id: &str) -> UserIdentity {
    UserIdentity {
        user_id: id.to_string(),
        display_name: None,
    }
}

pub fn day(text: &str) -> NaiveDate {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Waits until the published collection satisfies `accept`.
pub async fn published<T>(collection: &mut PublishedCollection<T>, accept: impl Fn(&[T]) -> bool) -> Arc<Vec<T>> {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let current = collection.current();
            if accept(&current) {
                return current;
            }
            if !collection.changed().await {
                panic!("publisher dropped");
            }
        }
    })
    .await;
    waited.expect("timed out waiting for a publication")
}

//=========================================================================================
// Remote store
//=========================================================================================

#[derive(Debug, Clone)]
enum StoreEvent {
    Changed(String, CollectionKind),
    Broken(String, CollectionKind),
}

type CollectionKey = (String, CollectionKind);

#[derive(Default)]
struct StoreState {
    documents: Mutex<HashMap<CollectionKey, BTreeMap<String, Value>>>,
    writes: AtomicUsize,
    commits: AtomicUsize,
    fail_subscribe: AtomicBool,
    fail_writes: AtomicBool,
    fail_commit: AtomicBool,
}

/// A document store whose subscriptions are driven by a change fan-out.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<StoreState>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(StoreState::default()),
            events,
        }
    }

    pub fn seed(&self, user_id: &str, collection: CollectionKind, documents: Vec<Value>) {
        let mut all = self.state.documents.lock().unwrap();
        let entry = all.entry((user_id.to_string(), collection)).or_default();
        for document in documents {
            let id = document["id"].as_str().unwrap().to_string();
            entry.insert(id, document);
        }
    }

    pub fn documents(&self, user_id: &str, collection: CollectionKind) -> Vec<Value> {
        self.state
            .documents
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), collection))
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn document(&self, user_id: &str, collection: CollectionKind, id: &str) -> Option<Value> {
        self.state
            .documents
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), collection))
            .and_then(|docs| docs.get(id).cloned())
    }

    pub fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.state.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.state.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes every live subscription to `collection` of `user_id` emit an error.
    pub fn break_subscription(&self, user_id: &str, collection: CollectionKind) {
        let _ = self.events.send(StoreEvent::Broken(user_id.to_string(), collection));
    }

    fn snapshot(&self, user_id: &str, collection: CollectionKind) -> Snapshot {
        Snapshot {
            documents: self.documents(user_id, collection),
            has_pending_writes: false,
            from_cache: false,
        }
    }

    fn apply(&self, user_id: &str, op: WriteOp) {
        let mut all = self.state.documents.lock().unwrap();
        let docs = all.entry((user_id.to_string(), op.collection())).or_default();
        match op {
            WriteOp::Set { id, document, .. } => {
                docs.insert(id, document);
            }
            WriteOp::Merge { id, fields, .. } => {
                let target = docs.entry(id.clone()).or_insert_with(|| {
                    let mut fresh = Map::new();
                    fresh.insert("id".to_string(), Value::from(id));
                    Value::Object(fresh)
                });
                if let (Some(target), Value::Object(fields)) = (target.as_object_mut(), fields) {
                    target.extend(fields);
                }
            }
            WriteOp::Delete { id, .. } => {
                docs.remove(&id);
            }
        }
    }

    fn changed(&self, user_id: &str, collection: CollectionKind) {
        let _ = self.events.send(StoreEvent::Changed(user_id.to_string(), collection));
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn subscribe(&self, user_id: &str, collection: CollectionKind) -> PortResult<SnapshotStream> {
        if self.state.fail_subscribe.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("subscriptions disabled".to_string()));
        }
        let events = self.events.subscribe();
        let first = Some(self.snapshot(user_id, collection));
        let initial = (self.clone(), events, user_id.to_string(), first);

        let snapshots = stream::unfold(initial, move |(store, mut events, user_id, first)| async move {
            if let Some(first) = first {
                return Some((Ok(first), (store, events, user_id, None)));
            }
            loop {
                match events.recv().await {
                    Ok(StoreEvent::Changed(user, kind)) if user == user_id && kind == collection => {
                        let snapshot = store.snapshot(&user_id, collection);
                        return Some((Ok(snapshot), (store, events, user_id, None)));
                    }
                    Ok(StoreEvent::Broken(user, kind)) if user == user_id && kind == collection => {
                        let error = PortError::Unavailable("subscription broken".to_string());
                        return Some((Err(error), (store, events, user_id, None)));
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(snapshots))
    }

    async fn write(&self, user_id: &str, op: WriteOp) -> PortResult<()> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("writes disabled".to_string()));
        }
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        let collection = op.collection();
        self.apply(user_id, op);
        self.changed(user_id, collection);
        Ok(())
    }

    async fn commit(&self, user_id: &str, ops: Vec<WriteOp>) -> PortResult<()> {
        if self.state.fail_commit.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("commit rejected".to_string()));
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        let mut touched: Vec<CollectionKind> = ops.iter().map(WriteOp::collection).collect();
        touched.sort();
        touched.dedup();
        for op in ops {
            self.apply(user_id, op);
        }
        for collection in touched {
            self.changed(user_id, collection);
        }
        Ok(())
    }
}

//=========================================================================================
// Local cache and legacy storage
//=========================================================================================

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CollectionKey, String>>,
}

impl MemoryCache {
    pub fn get(&self, user_id: &str, collection: CollectionKind) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), collection))
            .cloned()
    }

    pub fn put(&self, user_id: &str, collection: CollectionKind, payload: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert((user_id.to_string(), collection), payload.to_string());
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn load(&self, user_id: &str, collection: CollectionKind) -> PortResult<Option<String>> {
        Ok(self.get(user_id, collection))
    }

    async fn store(&self, user_id: &str, collection: CollectionKind, payload: String) -> PortResult<()> {
        self.put(user_id, collection, &payload);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLegacy {
    blobs: Mutex<HashMap<LegacyKey, String>>,
}

impl MemoryLegacy {
    pub fn with(self, key: LegacyKey, blob: &str) -> Self {
        self.blobs.lock().unwrap().insert(key, blob.to_string());
        self
    }

    pub fn get(&self, key: LegacyKey) -> Option<String> {
        self.blobs.lock().unwrap().get(&key).cloned()
    }
}

#[async_trait]
impl LegacyStorage for MemoryLegacy {
    async fn read(&self, key: LegacyKey) -> PortResult<Option<String>> {
        Ok(self.get(key))
    }

    async fn remove(&self, key: LegacyKey) -> PortResult<()> {
        self.blobs.lock().unwrap().remove(&key);
        Ok(())
    }
}

//=========================================================================================
// Metadata lookup, auth, clock
//=========================================================================================

#[derive(Default)]
pub struct StaticLookup {
    results: Vec<BookSuggestion>,
    latency: Duration,
    fail: AtomicBool,
    queries: Mutex<Vec<String>>,
}

impl StaticLookup {
    pub fn returning(results: Vec<BookSuggestion>) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataLookup for StaticLookup {
    async fn search(&self, query: &str, max_results: usize) -> PortResult<Vec<BookSuggestion>> {
        self.queries.lock().unwrap().push(query.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("lookup down".to_string()));
        }
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

pub fn suggestion(id: &str, title: &str, author: &str) -> BookSuggestion {
    BookSuggestion {
        id: id.to_string(),
        title: title.to_string(),
        author: Some(author.to_string()),
        cover_url: Some(format!("https://covers.example/{}.jpg", id)),
        genre: Some("Science Fiction".to_string()),
        page_count: Some(412),
    }
}

pub struct MockAuth {
    user: UserIdentity,
    sign_ins: AtomicUsize,
    reject: AtomicBool,
    fail_sign_out: AtomicBool,
}

impl MockAuth {
    pub fn new(user: UserIdentity) -> Self {
        Self {
            user,
            sign_ins: AtomicUsize::new(0),
            reject: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
        }
    }

    pub fn sign_ins(&self) -> usize {
        self.sign_ins.load(Ordering::SeqCst)
    }

    pub fn reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for MockAuth {
    async fn sign_in(&self, _credentials: &Credentials) -> PortResult<UserIdentity> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(PortError::Unauthorized);
        }
        Ok(self.user.clone())
    }

    async fn sign_out(&self) -> PortResult<()> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("auth down".to_string()));
        }
        Ok(())
    }
}

pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub today: NaiveDate,
}

impl FixedClock {
    /// 2024-03-15 12:00 UTC.
    pub fn new() -> Self {
        Self {
            now: Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap(),
            today: day("2024-03-15"),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn today(&self) -> NaiveDate {
        self.today
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub store: MemoryStore,
    pub cache: Arc<MemoryCache>,
    pub legacy: Arc<MemoryLegacy>,
    pub lookup: Arc<StaticLookup>,
    pub auth: Arc<MockAuth>,
    pub clock: Arc<FixedClock>,
    pub connectivity: Arc<ConnectivityMonitor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_legacy(MemoryLegacy::default())
    }

    pub fn with_legacy(legacy: MemoryLegacy) -> Self {
        Self {
            store: MemoryStore::new(),
            cache: Arc::new(MemoryCache::default()),
            legacy: Arc::new(legacy),
            lookup: Arc::new(StaticLookup::returning(vec![suggestion("g1", "Dune", "Frank Herbert")])),
            auth: Arc::new(MockAuth::new(user("reader-1"))),
            clock: Arc::new(FixedClock::new()),
            connectivity: Arc::new(ConnectivityMonitor::new(true)),
        }
    }

    pub fn services(&self) -> LibraryServices {
        LibraryServices {
            store: Arc::new(self.store.clone()),
            cache: self.cache.clone(),
            legacy: self.legacy.clone(),
            metadata: self.lookup.clone(),
            auth: self.auth.clone(),
            clock: self.clock.clone(),
            connectivity: self.connectivity.clone(),
        }
    }

    pub fn library(&self) -> Library {
        Library::new(self.services())
    }

    /// A library with `reader-1` signed in and both collections live.
    pub async fn signed_in(&self) -> Library {
        let library = self.library();
        library.resume(user("reader-1")).await;
        let mut status = library.books_status();
        wait_for_status(&mut status, |s| matches!(s, SyncStatus::Live { .. })).await;
        library
    }
}

pub async fn wait_for_status(
    status: &mut tokio::sync::watch::Receiver<SyncStatus>,
    accept: impl Fn(&SyncStatus) -> bool,
) -> SyncStatus {
    let waited = tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| accept(s))).await;
    *waited.expect("timed out waiting for sync status").expect("sync engine dropped")
}

/// Runs `op` with a two second budget.
pub async fn within<T>(op: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), op).await.expect("timed out")
}
