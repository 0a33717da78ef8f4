//! services/api/src/adapters/legacy.rs
//!
//! Reads the blobs the pre-sync app kept in local storage, one file per key.

use async_trait::async_trait;
use reading_tracker_core::ports::{LegacyKey, LegacyStorage, PortError, PortResult};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::info;

use super::cache::read_optional;

#[derive(Debug, Clone)]
pub struct FileLegacyStorage {
    dir: PathBuf,
}

impl FileLegacyStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: LegacyKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.storage_key()))
    }
}

#[async_trait]
impl LegacyStorage for FileLegacyStorage {
    async fn read(&self, key: LegacyKey) -> PortResult<Option<String>> {
        read_optional(&self.path_for(key)).await
    }

    async fn remove(&self, key: LegacyKey) -> PortResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Removed legacy key {}", key.storage_key());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortError::Unexpected(format!("{}: {}", path.display(), e))),
        }
    }
}
