//! crates/reading_tracker_core/src/migration.rs
//!
//! One-time import of the records the pre-sync version of the app kept in
//! local storage. Records are copied as they were stored: only the `id` and
//! the book `order` are normalized, and decoding is left to the lenient
//! readers of the synced collections. Everything found is written in a single
//! atomic commit. A legacy key is only deleted once that commit succeeds, and
//! only if every record under it was staged.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::CollectionKind;
use crate::ports::{Clock, LegacyKey, LegacyStorage, RemoteStore, WriteOp};

/// What a migration run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy records were found.
    NothingToMigrate,
    /// Legacy records were committed. Keys whose records all made it were removed.
    Migrated { count: usize },
    /// The commit failed; the legacy keys were kept for the next session.
    Deferred,
}

pub struct LegacyMigrator {
    legacy: Arc<dyn LegacyStorage>,
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
}

impl LegacyMigrator {
    pub fn new(legacy: Arc<dyn LegacyStorage>, store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Self {
        Self { legacy, store, clock }
    }

    /// Moves any legacy records of this device into `user_id`'s collections.
    ///
    /// Failures are logged and reported as `Deferred`; they never block the session.
    pub async fn run(&self, user_id: &str) -> MigrationOutcome {
        let books_blob = match self.legacy.read(LegacyKey::Books).await {
            Ok(blob) => blob,
            Err(e) => {
                error!("Could not read legacy books: {}", e);
                return MigrationOutcome::Deferred;
            }
        };
        let sessions_blob = match self.legacy.read(LegacyKey::Sessions).await {
            Ok(blob) => blob,
            Err(e) => {
                error!("Could not read legacy sessions: {}", e);
                return MigrationOutcome::Deferred;
            }
        };
        if books_blob.is_none() && sessions_blob.is_none() {
            return MigrationOutcome::NothingToMigrate;
        }

        let now_ms = self.clock.now().timestamp_millis();
        let books = books_blob.map(|blob| stage_blob(LegacyKey::Books, &blob, now_ms));
        let sessions = sessions_blob.map(|blob| stage_blob(LegacyKey::Sessions, &blob, now_ms));

        let mut ops = Vec::new();
        let mut removable = Vec::new();
        for (key, staged) in [(LegacyKey::Books, books), (LegacyKey::Sessions, sessions)] {
            match staged {
                Some(Some(blob_ops)) => {
                    ops.extend(blob_ops);
                    removable.push(key);
                }
                Some(None) => warn!("Keeping legacy {} until it can be migrated whole", key.storage_key()),
                None => removable.push(key),
            }
        }
        // Read dates are derived from the sessions and go with them.
        if removable.contains(&LegacyKey::Sessions) {
            removable.push(LegacyKey::ReadDates);
        }

        let count = ops.len();
        if count == 0 {
            warn!("Legacy storage holds no migratable records; leaving it untouched");
            return MigrationOutcome::NothingToMigrate;
        }

        if let Err(e) = self.store.commit(user_id, ops).await {
            error!("Legacy migration of {} records failed, will retry next session: {}", count, e);
            return MigrationOutcome::Deferred;
        }

        for key in removable {
            if let Err(e) = self.legacy.remove(key).await {
                warn!("Could not remove legacy key {}: {}", key.storage_key(), e);
            }
        }
        info!("Migrated {} legacy records for user {}", count, user_id);
        MigrationOutcome::Migrated { count }
    }
}

/// Stages every record of a blob, or returns `None` if any part of it cannot be staged.
fn stage_blob(key: LegacyKey, blob: &str, now_ms: i64) -> Option<Vec<WriteOp>> {
    let records = match serde_json::from_str::<Vec<Value>>(blob) {
        Ok(records) => records,
        Err(e) => {
            error!("Legacy {} is not a JSON array: {}", key.storage_key(), e);
            return None;
        }
    };
    let collection = match key {
        LegacyKey::Books => CollectionKind::Books,
        LegacyKey::Sessions => CollectionKind::Sessions,
        LegacyKey::ReadDates => return Some(Vec::new()),
    };
    records
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let Value::Object(mut fields) = raw else {
                error!("Legacy {} entry {} is not a record", key.storage_key(), index);
                return None;
            };
            let id = ensure_id(&mut fields);
            if collection == CollectionKind::Books {
                ensure_order(&mut fields, now_ms);
            }
            Some(WriteOp::Set {
                collection,
                id,
                document: Value::Object(fields),
            })
        })
        .collect()
}

/// Ids are strings in the synced collections. Records that never had one get a fresh id.
fn ensure_id(fields: &mut Map<String, Value>) -> String {
    let id = match fields.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            let id = Uuid::new_v4().to_string();
            warn!("Legacy record without an id was given {}", id);
            id
        }
    };
    fields.insert("id".to_string(), Value::from(id.clone()));
    id
}

/// A missing, zero or non-numeric `order` becomes the current time, as for new books.
fn ensure_order(fields: &mut Map<String, Value>, now_ms: i64) {
    let order = match fields.get("order") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|order| order.is_finite() && *order != 0.0);
    let order = match order {
        Some(order) if order.fract() == 0.0 => Value::from(order as i64),
        Some(order) => Value::from(order),
        None => Value::from(now_ms),
    };
    fields.insert("order".to_string(), order);
}
