pub mod connectivity;
pub mod derived;
pub mod domain;
pub mod library;
pub mod migration;
pub mod mutation;
pub mod ports;
pub mod publish;
pub mod search;
pub mod sync;
pub mod ui_state;

pub use connectivity::{ConnectivityMonitor, Gated};
pub use derived::{CalendarMonth, GenreFilter, LibraryFilter, LibraryView, SortMode};
pub use domain::{Book, BookDraft, BookSuggestion, CollectionKind, Credentials, ReadingSession, SessionDraft, Streak,
    StreakStatus, UserIdentity};
pub use library::{Library, LibraryServices, Notice};
pub use mutation::{MutationError, SessionReceipt, ValidationError, WriteOutcome};
pub use ports::{AuthProvider, Clock, LegacyKey, LegacyStorage, LocalCache, MetadataLookup, PortError, PortResult,
    RemoteStore, Snapshot, SnapshotStream, SystemClock, WriteOp};
pub use publish::PublishedCollection;
pub use search::SuggestionOutcome;
pub use sync::SyncStatus;
pub use ui_state::{Dialog, DialogState, TransitionError};
