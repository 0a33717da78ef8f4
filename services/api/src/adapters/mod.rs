pub mod auth;
pub mod cache;
pub mod db;
pub mod legacy;
pub mod metadata;
pub mod offline_queue;

pub use auth::PgAuthProvider;
pub use cache::FileCache;
pub use db::PgDocumentStore;
pub use legacy::FileLegacyStorage;
pub use metadata::GoogleBooksLookup;
pub use offline_queue::QueuedStore;
