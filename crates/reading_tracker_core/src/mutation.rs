//! crates/reading_tracker_core/src/mutation.rs
//!
//! The mutation gateway: every create, update, delete and reorder of books and
//! sessions goes through here. Writes always target the remote store; the
//! published collections only change when the store emits a new snapshot,
//! except for the optimistic reorder.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connectivity::{ConnectivityMonitor, Gated};
use crate::domain::{
    parse_minutes, Book, BookDraft, CollectionKind, ReadingSession, SessionDraft, UserIdentity,
    DEFAULT_RATING, DEFAULT_SPINE_COLOR, FALLBACK_BOOK_TITLE,
};
use crate::ports::{Clock, MetadataLookup, PortError, RemoteStore, WriteOp};
use crate::sync::SyncEngine;

//=========================================================================================
// Errors and Outcomes
//=========================================================================================

/// Input rejected before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("A book needs a title")]
    MissingTitle,
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
    #[error("Choose the book you read")]
    MissingBook,
    #[error("Duration must be a positive number of minutes, got '{0}'")]
    InvalidDuration(String),
}

/// Errors surfaced by the primary save flows (save book, log session).
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("Write failed: {0}")]
    Write(#[from] PortError),
}

/// How a write ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum WriteOutcome<T> {
    /// Written while online.
    Saved(T),
    /// Queued by the store while offline; it will sync on reconnect.
    SavedOffline(T),
    /// Nothing was attempted: no signed-in user, or the target is unknown.
    Skipped,
    /// A background write failed. The failure has been logged.
    Failed,
}

impl<T> WriteOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            WriteOutcome::Saved(value) | WriteOutcome::SavedOffline(value) => Some(value),
            WriteOutcome::Skipped | WriteOutcome::Failed => None,
        }
    }
}

/// The result of logging a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReceipt {
    pub session: ReadingSession,
    /// True when this is the first session logged today.
    pub first_today: bool,
}

//=========================================================================================
// The Gateway
//=========================================================================================

pub struct MutationGateway {
    store: Arc<dyn RemoteStore>,
    sync: Arc<SyncEngine>,
    connectivity: Arc<ConnectivityMonitor>,
    metadata: Arc<dyn MetadataLookup>,
    clock: Arc<dyn Clock>,
    user: watch::Receiver<Option<UserIdentity>>,
}

impl MutationGateway {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        sync: Arc<SyncEngine>,
        connectivity: Arc<ConnectivityMonitor>,
        metadata: Arc<dyn MetadataLookup>,
        clock: Arc<dyn Clock>,
        user: watch::Receiver<Option<UserIdentity>>,
    ) -> Self {
        Self {
            store,
            sync,
            connectivity,
            metadata,
            clock,
            user,
        }
    }

    fn signed_in_user(&self) -> Option<String> {
        self.user.borrow().as_ref().map(|u| u.user_id.clone())
    }

    fn saved<T>(&self, value: T) -> WriteOutcome<T> {
        if self.connectivity.is_online() {
            WriteOutcome::Saved(value)
        } else {
            WriteOutcome::SavedOffline(value)
        }
    }

    /// Creates a book (`editing == None`) or updates an existing one.
    ///
    /// An update merges only the fields present in the draft, so a form that
    /// leaves a field out never resets the stored value. Creation fills the
    /// missing fields with their defaults.
    pub async fn save_book(
        &self,
        editing: Option<&str>,
        mut draft: BookDraft,
    ) -> Result<WriteOutcome<String>, MutationError> {
        let Some(user_id) = self.signed_in_user() else {
            return Ok(WriteOutcome::Skipped);
        };
        draft.title = draft.title.map(|title| title.trim().to_string());
        match (&draft.title, editing) {
            (Some(title), _) if title.is_empty() => return Err(ValidationError::MissingTitle.into()),
            (None, None) => return Err(ValidationError::MissingTitle.into()),
            _ => {}
        }
        if let Some(rating) = draft.rating.filter(|r| !(1..=5).contains(r)) {
            return Err(ValidationError::InvalidRating(rating).into());
        }

        let op = match editing {
            Some(id) => {
                if draft.is_empty() {
                    debug!("Nothing to update for book {}", id);
                    return Ok(WriteOutcome::Skipped);
                }
                WriteOp::Merge {
                    collection: CollectionKind::Books,
                    id: id.to_string(),
                    fields: to_document(&draft)?,
                }
            }
            None => {
                if draft.cover_url.is_none() || draft.author.as_deref().map_or(true, |a| a.trim().is_empty()) {
                    self.enrich(&mut draft).await;
                }
                let book = self.new_book(draft);
                WriteOp::Set {
                    collection: CollectionKind::Books,
                    id: book.id.clone(),
                    document: to_document(&book)?,
                }
            }
        };
        let id = op.id().to_string();

        if let Err(e) = self.store.write(&user_id, op).await {
            error!("Failed to save book {}: {}", id, e);
            return Err(e.into());
        }
        info!("Saved book {} for user {}", id, user_id);
        Ok(self.saved(id))
    }

    /// Fills blank fields from the first metadata match. Skipped offline; lookup errors are ignored.
    async fn enrich(&self, draft: &mut BookDraft) {
        let title = draft.title.clone().unwrap_or_default();
        let found = self
            .connectivity
            .when_online("book metadata lookup", || self.metadata.search(&title, 1))
            .await;
        match found {
            Gated::Ready(Ok(results)) => {
                if let Some(first) = results.first() {
                    draft.enrich_from(first);
                }
            }
            Gated::Ready(Err(e)) => {
                warn!("Metadata lookup for '{}' failed: {}", title, e);
            }
            Gated::Offline => {}
        }
    }

    fn new_book(&self, draft: BookDraft) -> Book {
        let highest = self.sync.current_books().iter().map(|b| b.order).max();
        let now_ms = self.clock.now().timestamp_millis();
        let order = match highest {
            Some(highest) if highest >= now_ms => highest + 1,
            _ => now_ms,
        };
        Book {
            id: Uuid::new_v4().to_string(),
            title: draft.title.unwrap_or_default(),
            author: draft.author.unwrap_or_default(),
            genre: draft.genre.unwrap_or_default(),
            rating: draft.rating.unwrap_or(DEFAULT_RATING),
            cover_url: draft.cover_url,
            is_favorite: draft.is_favorite.unwrap_or(false),
            color: draft
                .color
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SPINE_COLOR.to_string()),
            page_count: draft.page_count,
            order,
            date_added: Some(self.clock.today()),
        }
    }

    /// Deletes a book. Sessions that reference it are kept.
    pub async fn delete_book(&self, book_id: &str) -> WriteOutcome<()> {
        let Some(user_id) = self.signed_in_user() else {
            return WriteOutcome::Skipped;
        };
        let op = WriteOp::Delete {
            collection: CollectionKind::Books,
            id: book_id.to_string(),
        };
        match self.store.write(&user_id, op).await {
            Ok(()) => self.saved(()),
            Err(e) => {
                error!("Failed to delete book {}: {}", book_id, e);
                WriteOutcome::Failed
            }
        }
    }

    /// Flips the favorite flag of a published book.
    pub async fn toggle_favorite(&self, book_id: &str) -> WriteOutcome<bool> {
        let Some(user_id) = self.signed_in_user() else {
            return WriteOutcome::Skipped;
        };
        let Some(is_favorite) = self
            .sync
            .current_books()
            .iter()
            .find(|b| b.id == book_id)
            .map(|b| !b.is_favorite)
        else {
            warn!("Cannot toggle favorite of unknown book {}", book_id);
            return WriteOutcome::Skipped;
        };

        let op = WriteOp::Merge {
            collection: CollectionKind::Books,
            id: book_id.to_string(),
            fields: json!({ "isFavorite": is_favorite }),
        };
        match self.store.write(&user_id, op).await {
            Ok(()) => self.saved(is_favorite),
            Err(e) => {
                error!("Failed to toggle favorite of book {}: {}", book_id, e);
                WriteOutcome::Failed
            }
        }
    }

    /// Logs a session for today against the selected book.
    pub async fn create_session(&self, draft: SessionDraft) -> Result<WriteOutcome<SessionReceipt>, MutationError> {
        let Some(user_id) = self.signed_in_user() else {
            return Ok(WriteOutcome::Skipped);
        };
        let book_id = draft
            .book_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ValidationError::MissingBook)?;
        let duration_minutes =
            parse_minutes(&draft.duration).ok_or_else(|| ValidationError::InvalidDuration(draft.duration.clone()))?;

        let today = self.clock.today();
        let book_title = self
            .sync
            .current_books()
            .iter()
            .find(|b| b.id == book_id)
            .map(|b| b.title.clone())
            .unwrap_or_else(|| FALLBACK_BOOK_TITLE.to_string());
        let first_today = !self.sync.current_sessions().iter().any(|s| s.date == today);

        let session = ReadingSession {
            id: Uuid::new_v4().to_string(),
            book_id,
            book_title,
            date: today,
            duration_minutes,
            note: draft.note.trim().to_string(),
            created_at: self.clock.now(),
        };
        let op = WriteOp::Set {
            collection: CollectionKind::Sessions,
            id: session.id.clone(),
            document: to_document(&session)?,
        };
        if let Err(e) = self.store.write(&user_id, op).await {
            error!("Failed to save session for book {}: {}", session.book_id, e);
            return Err(e.into());
        }
        info!("Logged {} minutes of '{}' for user {}", duration_minutes, session.book_title, user_id);
        Ok(self.saved(SessionReceipt { session, first_today }))
    }

    /// Moves `dragged_id` to the position `target_id` held and persists the new order.
    ///
    /// The new order is published immediately; the per-book writes run in the
    /// background and failures are only logged.
    pub async fn reorder(&self, dragged_id: &str, target_id: &str) -> WriteOutcome<Vec<String>> {
        let Some(user_id) = self.signed_in_user() else {
            return WriteOutcome::Skipped;
        };
        let current = self.sync.current_books();
        let Some(mut books) = moved(&current, dragged_id, target_id) else {
            return WriteOutcome::Skipped;
        };
        for (index, book) in books.iter_mut().enumerate() {
            book.order = index as i64;
        }
        let ids: Vec<String> = books.iter().map(|b| b.id.clone()).collect();
        self.sync.republish_books(books);

        let store = self.store.clone();
        let writes: Vec<WriteOp> = ids
            .iter()
            .enumerate()
            .map(|(index, id)| WriteOp::Merge {
                collection: CollectionKind::Books,
                id: id.clone(),
                fields: json!({ "order": index }),
            })
            .collect();
        tokio::spawn(async move {
            let results = join_all(writes.into_iter().map(|op| {
                let store = store.clone();
                let user_id = user_id.clone();
                async move {
                    let id = op.id().to_string();
                    store.write(&user_id, op).await.map_err(|e| (id, e))
                }
            }))
            .await;
            for (id, e) in results.into_iter().filter_map(Result::err) {
                error!("Failed to persist order of book {}: {}", id, e);
            }
        });

        self.saved(ids)
    }
}

/// Array-splice move: remove the dragged book, insert it at the target's original index.
pub fn moved(books: &[Book], dragged_id: &str, target_id: &str) -> Option<Vec<Book>> {
    if dragged_id == target_id {
        return None;
    }
    let source = books.iter().position(|b| b.id == dragged_id)?;
    let target = books.iter().position(|b| b.id == target_id)?;
    let mut reordered = books.to_vec();
    let book = reordered.remove(source);
    reordered.insert(target, book);
    Some(reordered)
}

fn to_document<T: Serialize>(record: &T) -> Result<Value, PortError> {
    serde_json::to_value(record).map_err(|e| PortError::Unexpected(e.to_string()))
}
