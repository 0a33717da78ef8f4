//! services/api/src/adapters/db.rs
//!
//! This module contains the document store adapter, the concrete implementation
//! of the `RemoteStore` port from the `core` crate. Every record is one JSONB
//! row keyed by user, collection and id. Writes are announced on an in-process
//! channel that drives the live subscriptions.

use async_trait::async_trait;
use reading_tracker_core::domain::CollectionKind;
use reading_tracker_core::ports::{PortError, PortResult, RemoteStore, Snapshot, SnapshotStream, WriteOp};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::broadcast;
use tracing::{debug, error};

const CHANGE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Change {
    user_id: String,
    collection: CollectionKind,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter that implements the `RemoteStore` port.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    changes: broadcast::Sender<Change>,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self { pool, changes }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn snapshot(&self, user_id: &str, collection: CollectionKind) -> PortResult<Snapshot> {
        let rows: Vec<(Json<Value>,)> = sqlx::query_as(
            "SELECT body FROM documents WHERE user_id = $1 AND collection = $2 ORDER BY id",
        )
        .bind(user_id)
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(port_error)?;

        Ok(Snapshot {
            documents: rows.into_iter().map(|(Json(body),)| body).collect(),
            has_pending_writes: false,
            from_cache: false,
        })
    }

    fn announce(&self, user_id: &str, collection: CollectionKind) {
        // No live subscription is fine.
        let _ = self.changes.send(Change {
            user_id: user_id.to_string(),
            collection,
        });
    }
}

//=========================================================================================
// Write Application
//=========================================================================================

async fn apply(tx: &mut Transaction<'_, Postgres>, user_id: &str, op: WriteOp) -> Result<(), sqlx::Error> {
    match op {
        WriteOp::Set { collection, id, document } => {
            sqlx::query(
                "INSERT INTO documents (user_id, collection, id, body) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (user_id, collection, id) DO UPDATE SET body = EXCLUDED.body, updated_at = now()",
            )
            .bind(user_id)
            .bind(collection.as_str())
            .bind(&id)
            .bind(Json(document))
            .execute(&mut **tx)
            .await?;
        }
        WriteOp::Merge { collection, id, fields } => {
            // Merging into a missing document creates it, carrying its id.
            let mut body = match fields {
                Value::Object(fields) => fields,
                other => {
                    let mut wrapped = Map::new();
                    wrapped.insert("value".to_string(), other);
                    wrapped
                }
            };
            body.insert("id".to_string(), Value::from(id.clone()));
            sqlx::query(
                "INSERT INTO documents (user_id, collection, id, body) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (user_id, collection, id) DO UPDATE SET body = documents.body || EXCLUDED.body, updated_at = now()",
            )
            .bind(user_id)
            .bind(collection.as_str())
            .bind(&id)
            .bind(Json(Value::Object(body)))
            .execute(&mut **tx)
            .await?;
        }
        WriteOp::Delete { collection, id } => {
            sqlx::query("DELETE FROM documents WHERE user_id = $1 AND collection = $2 AND id = $3")
                .bind(user_id)
                .bind(collection.as_str())
                .bind(&id)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

fn port_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// `RemoteStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RemoteStore for PgDocumentStore {
    async fn subscribe(&self, user_id: &str, collection: CollectionKind) -> PortResult<SnapshotStream> {
        // Subscribe before the first read so no change falls in between.
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let user_id = user_id.to_string();

        let snapshots = async_stream::stream! {
            let mut refresh = true;
            loop {
                if refresh {
                    match store.snapshot(&user_id, collection).await {
                        Ok(snapshot) => yield Ok(snapshot),
                        Err(e) => {
                            error!("Snapshot of {} for user {} failed: {}", collection, user_id, e);
                            yield Err(e);
                            break;
                        }
                    }
                }
                refresh = match changes.recv().await {
                    Ok(change) => change.user_id == user_id && change.collection == collection,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Subscription to {} lagged by {} changes", collection, skipped);
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
            }
        };
        Ok(Box::pin(snapshots))
    }

    async fn write(&self, user_id: &str, op: WriteOp) -> PortResult<()> {
        let collection = op.collection();
        let mut tx = self.pool.begin().await.map_err(port_error)?;
        apply(&mut tx, user_id, op).await.map_err(port_error)?;
        tx.commit().await.map_err(port_error)?;
        self.announce(user_id, collection);
        Ok(())
    }

    async fn commit(&self, user_id: &str, ops: Vec<WriteOp>) -> PortResult<()> {
        let mut touched: Vec<CollectionKind> = ops.iter().map(WriteOp::collection).collect();
        touched.sort();
        touched.dedup();

        let mut tx = self.pool.begin().await.map_err(port_error)?;
        for op in ops {
            apply(&mut tx, user_id, op).await.map_err(port_error)?;
        }
        tx.commit().await.map_err(port_error)?;
        for collection in touched {
            self.announce(user_id, collection);
        }
        Ok(())
    }
}
