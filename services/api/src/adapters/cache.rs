//! services/api/src/adapters/cache.rs
//!
//! The local cache: one JSON file per user and collection, replaced atomically
//! through a temporary file.

use async_trait::async_trait;
use reading_tracker_core::domain::CollectionKind;
use reading_tracker_core::ports::{LocalCache, PortError, PortResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, user_id: &str, collection: CollectionKind) -> PathBuf {
        self.dir
            .join(format!("backup_{}_{}.json", collection.as_str(), file_safe(user_id)))
    }
}

/// Keeps ids from escaping the cache directory.
pub(crate) fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub(crate) async fn read_optional(path: &Path) -> PortResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PortError::Unexpected(format!("{}: {}", path.display(), e))),
    }
}

#[async_trait]
impl LocalCache for FileCache {
    async fn load(&self, user_id: &str, collection: CollectionKind) -> PortResult<Option<String>> {
        read_optional(&self.path_for(user_id, collection)).await
    }

    async fn store(&self, user_id: &str, collection: CollectionKind, payload: String) -> PortResult<()> {
        let path = self.path_for(user_id, collection);
        let staging = path.with_extension("json.tmp");
        let io_error = |e: std::io::Error| PortError::Unexpected(format!("{}: {}", path.display(), e));

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        tokio::fs::write(&staging, payload.as_bytes()).await.map_err(io_error)?;
        tokio::fs::rename(&staging, &path).await.map_err(io_error)?;
        debug!("Mirrored {} of user {} to {}", collection, user_id, path.display());
        Ok(())
    }
}
