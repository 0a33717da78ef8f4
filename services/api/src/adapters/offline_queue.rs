//! services/api/src/adapters/offline_queue.rs
//!
//! Offline write queuing in front of another `RemoteStore`. While the
//! connectivity signal reads offline, writes are queued instead of sent and
//! are echoed into the live subscriptions as pending writes. When the signal
//! comes back online the queue is replayed in FIFO order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reading_tracker_core::connectivity::ConnectivityMonitor;
use reading_tracker_core::domain::CollectionKind;
use reading_tracker_core::ports::{PortResult, RemoteStore, Snapshot, SnapshotStream, WriteOp};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_QUEUE: usize = 10_000;

/// A write (or an atomic batch) issued while offline.
#[derive(Debug, Clone)]
struct QueuedWrite {
    seq: u64,
    user_id: String,
    ops: Vec<WriteOp>,
    queued_at: DateTime<Utc>,
}

type Queue = Arc<Mutex<VecDeque<QueuedWrite>>>;

pub struct QueuedStore {
    inner: Arc<dyn RemoteStore>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Queue,
    /// Fires whenever the queue changes for a user and collection.
    overlay: broadcast::Sender<(String, CollectionKind)>,
    max_queue: usize,
    next_seq: AtomicU64,
    /// Held for a whole replay so two replays never deliver the same write.
    replaying: Mutex<()>,
}

impl QueuedStore {
    pub fn new(inner: Arc<dyn RemoteStore>, connectivity: Arc<ConnectivityMonitor>) -> Self {
        let (overlay, _) = broadcast::channel(256);
        Self {
            inner,
            connectivity,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            overlay,
            max_queue: DEFAULT_MAX_QUEUE,
            next_seq: AtomicU64::new(0),
            replaying: Mutex::new(()),
        }
    }

    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue.max(1);
        self
    }

    pub async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    async fn enqueue(&self, user_id: &str, ops: Vec<WriteOp>) {
        let touched = touched_collections(&ops);
        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.max_queue {
                if let Some(dropped) = queue.pop_front() {
                    warn!(
                        "Offline queue full, dropping the oldest write of user {} (queued at {})",
                        dropped.user_id, dropped.queued_at
                    );
                }
            }
            queue.push_back(QueuedWrite {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                user_id: user_id.to_string(),
                ops,
                queued_at: Utc::now(),
            });
        }
        for collection in touched {
            let _ = self.overlay.send((user_id.to_string(), collection));
        }
    }

    /// Sends every queued write to the inner store, oldest first.
    ///
    /// A write stays queued, and visible as pending, until the inner store has
    /// accepted it. Stops at the first failure and keeps that write (and
    /// everything after it) for the next reconnect. Returns the number of
    /// writes delivered.
    pub async fn replay(&self) -> usize {
        let _replaying = self.replaying.lock().await;
        let mut delivered = 0;
        loop {
            let Some(next) = self.queue.lock().await.front().cloned() else {
                break;
            };
            let result = if next.ops.len() == 1 {
                match next.ops.first() {
                    Some(op) => self.inner.write(&next.user_id, op.clone()).await,
                    None => Ok(()),
                }
            } else {
                self.inner.commit(&next.user_id, next.ops.clone()).await
            };
            if let Err(e) = result {
                error!("Replaying an offline write of user {} failed, keeping it queued: {}", next.user_id, e);
                break;
            }
            // The front may have been dropped by a full queue while the write was in flight.
            self.queue.lock().await.retain(|queued| queued.seq != next.seq);
            delivered += 1;
            for collection in touched_collections(&next.ops) {
                let _ = self.overlay.send((next.user_id.clone(), collection));
            }
        }
        if delivered > 0 {
            info!("Replayed {} offline writes", delivered);
        }
        delivered
    }

    /// Replays the queue on every offline to online transition.
    pub fn spawn_replay(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let mut online = self.connectivity.subscribe();
        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online {
                    store.replay().await;
                }
            }
        })
    }
}

fn touched_collections(ops: &[WriteOp]) -> Vec<CollectionKind> {
    let mut touched: Vec<CollectionKind> = ops.iter().map(WriteOp::collection).collect();
    touched.sort();
    touched.dedup();
    touched
}

/// The pending ops of `user_id` that touch `collection`, in queue order.
async fn pending_ops(queue: &Queue, user_id: &str, collection: CollectionKind) -> Vec<WriteOp> {
    queue
        .lock()
        .await
        .iter()
        .filter(|queued| queued.user_id == user_id)
        .flat_map(|queued| queued.ops.iter())
        .filter(|op| op.collection() == collection)
        .cloned()
        .collect()
}

/// Applies pending ops over a confirmed snapshot.
fn overlay_snapshot(base: &Snapshot, pending: &[WriteOp], offline: bool) -> Snapshot {
    let mut documents = base.documents.clone();
    for op in pending {
        let position = documents
            .iter()
            .position(|doc| doc.get("id").and_then(Value::as_str) == Some(op.id()));
        match (op, position) {
            (WriteOp::Set { document, .. }, Some(index)) => documents[index] = document.clone(),
            (WriteOp::Set { document, .. }, None) => documents.push(document.clone()),
            (WriteOp::Merge { fields, .. }, Some(index)) => {
                if let (Some(target), Some(fields)) = (documents[index].as_object_mut(), fields.as_object()) {
                    target.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            (WriteOp::Merge { id, fields, .. }, None) => {
                let mut document = fields.clone();
                if let Some(object) = document.as_object_mut() {
                    object.insert("id".to_string(), Value::from(id.clone()));
                }
                documents.push(document);
            }
            (WriteOp::Delete { .. }, Some(index)) => {
                documents.remove(index);
            }
            (WriteOp::Delete { .. }, None) => {}
        }
    }
    Snapshot {
        documents,
        has_pending_writes: base.has_pending_writes || !pending.is_empty(),
        from_cache: base.from_cache || offline,
    }
}

#[async_trait]
impl RemoteStore for QueuedStore {
    async fn subscribe(&self, user_id: &str, collection: CollectionKind) -> PortResult<SnapshotStream> {
        let mut overlay = self.overlay.subscribe();
        let mut confirmed = self.inner.subscribe(user_id, collection).await?;
        let queue = self.queue.clone();
        let connectivity = self.connectivity.clone();
        let user_id = user_id.to_string();

        let snapshots = async_stream::stream! {
            let mut base: Option<Snapshot> = None;
            loop {
                tokio::select! {
                    next = confirmed.next() => match next {
                        Some(Ok(snapshot)) => base = Some(snapshot),
                        Some(Err(e)) => {
                            yield Err(e);
                            break;
                        }
                        None => break,
                    },
                    change = overlay.recv() => match change {
                        Ok((user, kind)) if user == user_id && kind == collection => {}
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
                if let Some(base) = &base {
                    let pending = pending_ops(&queue, &user_id, collection).await;
                    yield Ok(overlay_snapshot(base, &pending, !connectivity.is_online()));
                }
            }
        };
        Ok(Box::pin(snapshots))
    }

    async fn write(&self, user_id: &str, op: WriteOp) -> PortResult<()> {
        if self.connectivity.is_online() {
            return self.inner.write(user_id, op).await;
        }
        self.enqueue(user_id, vec![op]).await;
        Ok(())
    }

    async fn commit(&self, user_id: &str, ops: Vec<WriteOp>) -> PortResult<()> {
        if self.connectivity.is_online() {
            return self.inner.commit(user_id, ops).await;
        }
        self.enqueue(user_id, ops).await;
        Ok(())
    }
}
