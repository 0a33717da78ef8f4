//! crates/reading_tracker_core/src/sync.rs
//!
//! The sync engine. For each of the user's collections it keeps a live store
//! subscription, orders every snapshot, publishes it, and mirrors it into the
//! local cache. When a subscription fails it republishes the cached mirror.

use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{Book, CollectionKind, ReadingSession, UserIdentity};
use crate::ports::{LocalCache, RemoteStore, Snapshot};
use crate::publish::{CollectionPublisher, PublishedCollection};

//=========================================================================================
// Synced Record Kinds
//=========================================================================================

/// A record kind that lives in one store collection.
pub trait SyncedRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: CollectionKind;

    fn record_id(&self) -> &str;

    /// Applies the display order of the collection.
    fn sort_for_display(records: &mut [Self]);
}

impl SyncedRecord for Book {
    const COLLECTION: CollectionKind = CollectionKind::Books;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn sort_for_display(records: &mut [Self]) {
        records.sort_by_key(|book| book.order);
    }
}

impl SyncedRecord for ReadingSession {
    const COLLECTION: CollectionKind = CollectionKind::Sessions;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn sort_for_display(records: &mut [Self]) {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

/// Decodes and orders the documents of a snapshot.
///
/// Decoding tolerates odd field shapes, so only documents without an id (or
/// sessions without a date) are skipped.
pub fn ordered_records<R: SyncedRecord>(snapshot: &Snapshot) -> Vec<R> {
    let mut records: Vec<R> = snapshot
        .documents
        .iter()
        .filter_map(|document| match serde_json::from_value::<R>(document.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    "Skipping undecodable {} document {}: {}",
                    R::COLLECTION,
                    document.get("id").and_then(|id| id.as_str()).unwrap_or("<no id>"),
                    e
                );
                None
            }
        })
        .collect();
    R::sort_for_display(&mut records);
    records
}

//=========================================================================================
// Sync Status
//=========================================================================================

/// Where the currently published sequence of a collection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    /// No subscription (signed out).
    Idle,
    /// Following the live subscription.
    Live { pending_writes: bool, from_cache: bool },
    /// The subscription failed; the local cache mirror is published.
    Fallback,
}

//=========================================================================================
// The Sync Engine
//=========================================================================================

struct Channel<R> {
    records: CollectionPublisher<R>,
    status: watch::Sender<SyncStatus>,
}

impl<R> Channel<R> {
    fn new() -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            records: CollectionPublisher::new(),
            status,
        }
    }

    fn reset(&self) {
        self.records.clear();
        self.status.send_replace(SyncStatus::Idle);
    }
}

struct RunningSync {
    user_id: String,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the published book and session collections.
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
    books: Arc<Channel<Book>>,
    sessions: Arc<Channel<ReadingSession>>,
    running: Mutex<Option<RunningSync>>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, cache: Arc<dyn LocalCache>) -> Self {
        Self {
            store,
            cache,
            books: Arc::new(Channel::new()),
            sessions: Arc::new(Channel::new()),
            running: Mutex::new(None),
        }
    }

    pub fn books(&self) -> PublishedCollection<Book> {
        self.books.records.subscribe()
    }

    pub fn sessions(&self) -> PublishedCollection<ReadingSession> {
        self.sessions.records.subscribe()
    }

    pub fn current_books(&self) -> Arc<Vec<Book>> {
        self.books.records.current()
    }

    pub fn current_sessions(&self) -> Arc<Vec<ReadingSession>> {
        self.sessions.records.current()
    }

    pub fn books_status(&self) -> watch::Receiver<SyncStatus> {
        self.books.status.subscribe()
    }

    pub fn sessions_status(&self) -> watch::Receiver<SyncStatus> {
        self.sessions.status.subscribe()
    }

    /// Publishes a locally computed book order ahead of the store's confirmation.
    pub fn republish_books(&self, books: Vec<Book>) {
        self.books.records.publish(books);
    }

    /// Opens both subscriptions for `user`, replacing any running ones.
    pub async fn start(&self, user: &UserIdentity) {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            info!("Replacing sync subscriptions of user {}", previous.user_id);
            shut_down(previous).await;
            self.books.reset();
            self.sessions.reset();
        }

        info!("Starting sync for user {}", user.user_id);
        let token = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(follow_collection(
                self.store.clone(),
                self.cache.clone(),
                user.user_id.clone(),
                self.books.clone(),
                token.clone(),
            )),
            tokio::spawn(follow_collection(
                self.store.clone(),
                self.cache.clone(),
                user.user_id.clone(),
                self.sessions.clone(),
                token.clone(),
            )),
        ];
        *running = Some(RunningSync {
            user_id: user.user_id.clone(),
            token,
            tasks,
        });
    }

    /// Tears down both subscriptions and clears the published collections.
    pub async fn stop(&self) {
        let previous = self.running.lock().await.take();
        if let Some(previous) = previous {
            info!("Stopping sync for user {}", previous.user_id);
            shut_down(previous).await;
        }
        self.books.reset();
        self.sessions.reset();
    }

    pub async fn active_user(&self) -> Option<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.user_id.clone())
    }
}

async fn shut_down(running: RunningSync) {
    running.token.cancel();
    for task in running.tasks {
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!("Sync task for user {} panicked: {:?}", running.user_id, e);
            }
        }
    }
}

/// Follows one collection until the subscription ends, fails, or is cancelled.
async fn follow_collection<R: SyncedRecord>(
    store: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
    user_id: String,
    channel: Arc<Channel<R>>,
    token: CancellationToken,
) {
    let collection = R::COLLECTION;
    let subscription = tokio::select! {
        _ = token.cancelled() => return,
        subscription = store.subscribe(&user_id, collection) => subscription,
    };
    let mut snapshots = match subscription {
        Ok(snapshots) => snapshots,
        Err(e) => {
            error!("Could not subscribe to {} of user {}: {}", collection, user_id, e);
            fall_back_to_cache(cache.as_ref(), &user_id, &channel).await;
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                debug!("Subscription to {} of user {} cancelled", collection, user_id);
                return;
            }
            next = snapshots.next() => next,
        };

        match next {
            Some(Ok(snapshot)) => {
                let records = ordered_records::<R>(&snapshot);
                debug!(
                    "Publishing {} {} for user {} (pending writes: {})",
                    records.len(),
                    collection,
                    user_id,
                    snapshot.has_pending_writes
                );
                channel.records.publish(records.clone());
                channel.status.send_replace(SyncStatus::Live {
                    pending_writes: snapshot.has_pending_writes,
                    from_cache: snapshot.from_cache,
                });
                mirror_to_cache(cache.as_ref(), &user_id, &records).await;
            }
            Some(Err(e)) => {
                error!("Subscription to {} of user {} failed: {}", collection, user_id, e);
                fall_back_to_cache(cache.as_ref(), &user_id, &channel).await;
                return;
            }
            None => {
                info!("Subscription to {} of user {} closed by the store", collection, user_id);
                return;
            }
        }
    }
}

async fn mirror_to_cache<R: SyncedRecord>(cache: &dyn LocalCache, user_id: &str, records: &[R]) {
    let payload = match serde_json::to_string(records) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Could not serialize {} mirror: {}", R::COLLECTION, e);
            return;
        }
    };
    if let Err(e) = cache.store(user_id, R::COLLECTION, payload).await {
        warn!("Could not mirror {} of user {} to the local cache: {}", R::COLLECTION, user_id, e);
    }
}

/// Publishes the cached mirror verbatim, or an empty collection when there is none.
async fn fall_back_to_cache<R: SyncedRecord>(cache: &dyn LocalCache, user_id: &str, channel: &Channel<R>) {
    let records = match cache.load(user_id, R::COLLECTION).await {
        Ok(Some(payload)) => match serde_json::from_str::<Vec<R>>(&payload) {
            Ok(records) => records,
            Err(e) => {
                warn!("Cached {} of user {} are unreadable: {}", R::COLLECTION, user_id, e);
                Vec::new()
            }
        },
        Ok(None) => {
            warn!("No cached {} for user {}; publishing an empty collection", R::COLLECTION, user_id);
            Vec::new()
        }
        Err(e) => {
            warn!("Could not read cached {} of user {}: {}", R::COLLECTION, user_id, e);
            Vec::new()
        }
    };
    info!("Falling back to {} cached {} for user {}", records.len(), R::COLLECTION, user_id);
    channel.records.publish(records);
    channel.status.send_replace(SyncStatus::Fallback);
}
