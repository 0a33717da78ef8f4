//! crates/reading_tracker_core/src/publish.rs
//!
//! The published collection: a single-producer broadcast of the latest ordered
//! sequence of records. The sync engine owns the producer side; derived state
//! and the presentation hold readers.

use std::sync::Arc;
use tokio::sync::watch;

/// Producer side of a published collection.
#[derive(Debug)]
pub struct CollectionPublisher<T> {
    tx: watch::Sender<Arc<Vec<T>>>,
}

impl<T> CollectionPublisher<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self { tx }
    }

    /// Replaces the published sequence and wakes every reader.
    pub fn publish(&self, records: Vec<T>) {
        self.tx.send_replace(Arc::new(records));
    }

    /// Publishes an empty sequence (logout).
    pub fn clear(&self) {
        self.publish(Vec::new());
    }

    pub fn current(&self) -> Arc<Vec<T>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> PublishedCollection<T> {
        PublishedCollection {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T> Default for CollectionPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader side of a published collection.
///
/// Dropping the reader is the unsubscribe.
#[derive(Debug)]
pub struct PublishedCollection<T> {
    rx: watch::Receiver<Arc<Vec<T>>>,
}

impl<T> Clone for PublishedCollection<T> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<T> PublishedCollection<T> {
    /// The latest published sequence. Marks it as seen.
    pub fn current(&mut self) -> Arc<Vec<T>> {
        self.rx.borrow_and_update().clone()
    }

    /// The latest published sequence, without marking it as seen.
    pub fn peek(&self) -> Arc<Vec<T>> {
        self.rx.borrow().clone()
    }

    /// Waits for the next publication. Returns `false` once the producer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
