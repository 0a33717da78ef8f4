//! crates/reading_tracker_core/src/search.rs
//!
//! Debounced title suggestions for the book form.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connectivity::{ConnectivityMonitor, Gated};
use crate::domain::BookSuggestion;
use crate::ports::MetadataLookup;

pub const QUIET_PERIOD: Duration = Duration::from_millis(500);
pub const MIN_QUERY_CHARS: usize = 3;
pub const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum SuggestionOutcome {
    Suggestions(Vec<BookSuggestion>),
    /// A newer keystroke (or a cancel) arrived; nothing to show.
    Superseded,
    Offline,
    TooShort,
}

/// A cancellable countdown per keystroke. Only the latest keystroke reaches the lookup.
pub struct SuggestionSearch {
    lookup: Arc<dyn MetadataLookup>,
    connectivity: Arc<ConnectivityMonitor>,
    generation: AtomicU64,
}

impl SuggestionSearch {
    pub fn new(lookup: Arc<dyn MetadataLookup>, connectivity: Arc<ConnectivityMonitor>) -> Self {
        Self {
            lookup,
            connectivity,
            generation: AtomicU64::new(0),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Supersedes any pending countdown or in-flight lookup.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Handles one keystroke of the title field.
    ///
    /// Resolves after the quiet period with the suggestions, or with
    /// `Superseded` if another keystroke arrived meanwhile.
    pub async fn on_keystroke(&self, query: &str) -> SuggestionOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            return SuggestionOutcome::TooShort;
        }

        tokio::time::sleep(QUIET_PERIOD).await;
        if !self.is_current(generation) {
            return SuggestionOutcome::Superseded;
        }

        let found = self
            .connectivity
            .when_online("title suggestions", || self.lookup.search(query, MAX_SUGGESTIONS))
            .await;
        if !self.is_current(generation) {
            debug!("Discarding stale suggestions for '{}'", query);
            return SuggestionOutcome::Superseded;
        }
        match found {
            Gated::Offline => SuggestionOutcome::Offline,
            Gated::Ready(Ok(results)) => SuggestionOutcome::Suggestions(distinct(results)),
            Gated::Ready(Err(e)) => {
                warn!("Suggestion lookup for '{}' failed: {}", query, e);
                SuggestionOutcome::Suggestions(Vec::new())
            }
        }
    }
}

/// First occurrence of each id, capped at `MAX_SUGGESTIONS`.
fn distinct(results: Vec<BookSuggestion>) -> Vec<BookSuggestion> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .take(MAX_SUGGESTIONS)
        .collect()
}
