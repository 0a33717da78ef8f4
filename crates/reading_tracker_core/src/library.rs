//! crates/reading_tracker_core/src/library.rs
//!
//! The session controller. Wires the sync engine, the migrator, the mutation
//! gateway and the suggestion search to the signed-in user and exposes the
//! derived views the presentation renders.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, warn};

use crate::connectivity::{ConnectivityMonitor, Gated};
use crate::derived::{
    books_matching, calendar_month, genre_options, CalendarMonth, LibraryFilter, LibraryView, SortMode,
};
use crate::domain::{Book, BookSuggestion, Credentials, ReadingSession, SessionDraft, UserIdentity};
use crate::migration::{LegacyMigrator, MigrationOutcome};
use crate::mutation::{MutationError, MutationGateway, SessionReceipt, WriteOutcome};
use crate::ports::{AuthProvider, Clock, LegacyStorage, LocalCache, MetadataLookup, PortResult, RemoteStore};
use crate::publish::PublishedCollection;
use crate::search::{SuggestionSearch, MAX_SUGGESTIONS};
use crate::sync::{SyncEngine, SyncStatus};

const NOTICE_CAPACITY: usize = 32;

/// Events worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    SignedIn { user_id: String },
    SignedOut,
    MigrationCompleted { count: usize },
    /// The legacy import failed and will be retried at the next sign-in.
    MigrationDeferred,
    ConnectivityChanged { online: bool },
    /// The first session of the day was logged.
    StreakCelebration,
}

/// The adapters the library runs on.
#[derive(Clone)]
pub struct LibraryServices {
    pub store: Arc<dyn RemoteStore>,
    pub cache: Arc<dyn LocalCache>,
    pub legacy: Arc<dyn LegacyStorage>,
    pub metadata: Arc<dyn MetadataLookup>,
    pub auth: Arc<dyn AuthProvider>,
    pub clock: Arc<dyn Clock>,
    /// Shared with any adapter that queues writes while offline.
    pub connectivity: Arc<ConnectivityMonitor>,
}

pub struct Library {
    connectivity: Arc<ConnectivityMonitor>,
    sync: Arc<SyncEngine>,
    migrator: LegacyMigrator,
    mutations: MutationGateway,
    suggestions: SuggestionSearch,
    auth: Arc<dyn AuthProvider>,
    metadata: Arc<dyn MetadataLookup>,
    clock: Arc<dyn Clock>,
    user: watch::Sender<Option<UserIdentity>>,
    filter: watch::Sender<LibraryFilter>,
    notices: broadcast::Sender<Notice>,
    session_guard: Mutex<()>,
}

impl Library {
    pub fn new(services: LibraryServices) -> Self {
        let LibraryServices {
            store,
            cache,
            legacy,
            metadata,
            auth,
            clock,
            connectivity,
        } = services;

        let (user, user_rx) = watch::channel(None);
        let (filter, _) = watch::channel(LibraryFilter::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let sync = Arc::new(SyncEngine::new(store.clone(), cache));

        Self {
            migrator: LegacyMigrator::new(legacy, store.clone(), clock.clone()),
            mutations: MutationGateway::new(
                store,
                sync.clone(),
                connectivity.clone(),
                metadata.clone(),
                clock.clone(),
                user_rx,
            ),
            suggestions: SuggestionSearch::new(metadata.clone(), connectivity.clone()),
            connectivity,
            sync,
            auth,
            metadata,
            clock,
            user,
            filter,
            notices,
            session_guard: Mutex::new(()),
        }
    }

    //--- Session -------------------------------------------------------------------------

    /// Signs in. Skipped entirely while offline.
    pub async fn login(&self, credentials: &Credentials) -> PortResult<Gated<UserIdentity>> {
        let signed_in = self
            .connectivity
            .when_online("sign in", || self.auth.sign_in(credentials))
            .await;
        match signed_in {
            Gated::Offline => Ok(Gated::Offline),
            Gated::Ready(Err(e)) => {
                warn!("Sign in for {} failed: {}", credentials.email, e);
                Err(e)
            }
            Gated::Ready(Ok(user)) => {
                self.resume(user.clone()).await;
                Ok(Gated::Ready(user))
            }
        }
    }

    /// Starts a session for an already authenticated user: migrate, then sync.
    pub async fn resume(&self, user: UserIdentity) {
        let _guard = self.session_guard.lock().await;
        info!("Starting session for user {}", user.user_id);
        self.user.send_replace(Some(user.clone()));

        match self.migrator.run(&user.user_id).await {
            MigrationOutcome::NothingToMigrate => {}
            MigrationOutcome::Migrated { count } => self.notify(Notice::MigrationCompleted { count }),
            MigrationOutcome::Deferred => self.notify(Notice::MigrationDeferred),
        }

        self.sync.start(&user).await;
        self.notify(Notice::SignedIn { user_id: user.user_id });
    }

    /// Signs out, tears down sync and clears both collections.
    pub async fn logout(&self) {
        let _guard = self.session_guard.lock().await;
        if let Err(e) = self.auth.sign_out().await {
            error!("Sign out failed: {}", e);
        }
        self.suggestions.cancel();
        self.sync.stop().await;
        if self.user.send_replace(None).is_some() {
            self.notify(Notice::SignedOut);
        }
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.user.borrow().clone()
    }

    pub fn watch_user(&self) -> watch::Receiver<Option<UserIdentity>> {
        self.user.subscribe()
    }

    //--- Connectivity and notices --------------------------------------------------------

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Records a host `online`/`offline` event.
    pub fn set_online(&self, online: bool) {
        if self.connectivity.is_online() != online {
            self.connectivity.set_online(online);
            self.notify(Notice::ConnectivityChanged { online });
        }
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn notify(&self, notice: Notice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }

    //--- Collections ---------------------------------------------------------------------

    pub fn books(&self) -> PublishedCollection<Book> {
        self.sync.books()
    }

    pub fn sessions(&self) -> PublishedCollection<ReadingSession> {
        self.sync.sessions()
    }

    pub fn books_status(&self) -> watch::Receiver<SyncStatus> {
        self.sync.books_status()
    }

    pub fn sessions_status(&self) -> watch::Receiver<SyncStatus> {
        self.sync.sessions_status()
    }

    //--- Mutations -----------------------------------------------------------------------

    pub fn mutations(&self) -> &MutationGateway {
        &self.mutations
    }

    pub fn suggestions(&self) -> &SuggestionSearch {
        &self.suggestions
    }

    /// Logs a session and raises the streak celebration for the first one of the day.
    pub async fn log_session(&self, draft: SessionDraft) -> Result<WriteOutcome<SessionReceipt>, MutationError> {
        let outcome = self.mutations.create_session(draft).await?;
        if outcome.value().map(|receipt| receipt.first_today).unwrap_or(false) {
            self.notify(Notice::StreakCelebration);
        }
        Ok(outcome)
    }

    /// Dragging a book switches the library back to the custom order first.
    pub async fn reorder(&self, dragged_id: &str, target_id: &str) -> WriteOutcome<Vec<String>> {
        self.filter.send_if_modified(|filter| {
            let changed = filter.sort != SortMode::Custom;
            filter.sort = SortMode::Custom;
            changed
        });
        self.mutations.reorder(dragged_id, target_id).await
    }

    //--- Filter and queries --------------------------------------------------------------

    pub fn filter(&self) -> LibraryFilter {
        self.filter.borrow().clone()
    }

    pub fn watch_filter(&self) -> watch::Receiver<LibraryFilter> {
        self.filter.subscribe()
    }

    pub fn set_filter(&self, filter: LibraryFilter) {
        self.filter.send_replace(filter);
    }

    pub fn update_filter(&self, update: impl FnOnce(&mut LibraryFilter)) {
        self.filter.send_modify(update);
    }

    pub fn view(&self, viewport_width: u32) -> LibraryView {
        LibraryView::compute(
            &self.sync.current_books(),
            &self.sync.current_sessions(),
            &self.filter.borrow(),
            viewport_width,
            self.clock.today(),
        )
    }

    pub fn calendar(&self, year: i32, month: u32, selected: Option<chrono::NaiveDate>) -> Option<CalendarMonth> {
        calendar_month(&self.sync.current_sessions(), year, month, self.clock.today(), selected)
    }

    /// Sessions newest first, each titled by the snapshot taken when it was logged.
    pub fn journal(&self) -> Arc<Vec<ReadingSession>> {
        self.sync.current_sessions()
    }

    pub fn genre_options(&self, typed: &str) -> Vec<String> {
        genre_options(&self.sync.current_books(), typed)
    }

    /// Books offered by the session form's picker.
    pub fn book_picker(&self, term: &str) -> Vec<Book> {
        books_matching(&self.sync.current_books(), term)
    }

    /// The explicit search button of the book form. Lookup errors yield an empty list.
    pub async fn manual_search(&self, query: &str) -> Gated<Vec<BookSuggestion>> {
        let query = query.trim();
        let found = self
            .connectivity
            .when_online("manual book search", || self.metadata.search(query, MAX_SUGGESTIONS))
            .await;
        found.map(|result| {
            result.unwrap_or_else(|e| {
                warn!("Manual search for '{}' failed: {}", query, e);
                Vec::new()
            })
        })
    }
}
