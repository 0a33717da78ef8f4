//! crates/reading_tracker_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the reading tracker core.
//! These traits form the boundary of the hexagonal architecture: the remote
//! document store, the local cache, the legacy storage, the metadata lookup,
//! the authentication provider and the clock are all reached through them.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::domain::{BookSuggestion, CollectionKind, Credentials, UserIdentity};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Remote Store Types
//=========================================================================================

/// A complete view of one collection as emitted by a store subscription.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub documents: Vec<Value>,
    /// True while locally issued writes have not been acknowledged by the store.
    pub has_pending_writes: bool,
    /// True when the snapshot was served from the store's local persistence.
    pub from_cache: bool,
}

/// A live subscription to one collection. Ends when the store closes it.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = PortResult<Snapshot>> + Send>>;

/// A single document write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace (or create) the whole document.
    Set {
        collection: CollectionKind,
        id: String,
        document: Value,
    },
    /// Merge the given top-level fields into the document, creating it if missing.
    Merge {
        collection: CollectionKind,
        id: String,
        fields: Value,
    },
    Delete {
        collection: CollectionKind,
        id: String,
    },
}

impl WriteOp {
    pub fn collection(&self) -> CollectionKind {
        match self {
            WriteOp::Set { collection, .. }
            | WriteOp::Merge { collection, .. }
            | WriteOp::Delete { collection, .. } => *collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Set { id, .. } | WriteOp::Merge { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }
}

/// The legacy local-only storage keys written by the pre-sync version of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyKey {
    Books,
    Sessions,
    /// Obsolete list of read dates; only ever deleted.
    ReadDates,
}

impl LegacyKey {
    pub fn storage_key(&self) -> &'static str {
        match self {
            LegacyKey::Books => "my_books_v3",
            LegacyKey::Sessions => "my_reading_sessions",
            LegacyKey::ReadDates => "my_reading_dates",
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The authoritative per-user document store.
///
/// Implementations are expected to queue writes issued while offline and
/// replay them on reconnect; the core never retries on its own.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Opens a live subscription to one of the user's collections.
    async fn subscribe(&self, user_id: &str, collection: CollectionKind) -> PortResult<SnapshotStream>;

    /// Applies a single write.
    async fn write(&self, user_id: &str, op: WriteOp) -> PortResult<()>;

    /// Applies every write or none of them.
    async fn commit(&self, user_id: &str, ops: Vec<WriteOp>) -> PortResult<()>;
}

/// Best-effort local mirror of the last ordered snapshot per user and collection.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn load(&self, user_id: &str, collection: CollectionKind) -> PortResult<Option<String>>;

    /// Overwrites the previous mirror.
    async fn store(&self, user_id: &str, collection: CollectionKind, payload: String) -> PortResult<()>;
}

#[async_trait]
pub trait LegacyStorage: Send + Sync {
    async fn read(&self, key: LegacyKey) -> PortResult<Option<String>>;

    /// Removing a key that does not exist is not an error.
    async fn remove(&self, key: LegacyKey) -> PortResult<()>;
}

#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Returns at most `max_results` candidates for a free-text title query.
    async fn search(&self, query: &str, max_results: usize) -> PortResult<Vec<BookSuggestion>>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> PortResult<UserIdentity>;

    async fn sign_out(&self) -> PortResult<()>;
}

/// Wall-clock access, so "today" can be pinned in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The current local calendar date.
    fn today(&self) -> NaiveDate;
}

/// The host's real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}
