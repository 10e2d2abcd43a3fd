//! Postgres-backed persistence context.
//!
//! Aggregate projections live in `aggregates (kind, id, state jsonb)`; the
//! event log lives in the append-only `events` table whose columns follow the
//! log entry wire shape. Each `save_changes` runs in one transaction.
//!
//! Staged inserts are committed as upserts of the projection row: a context
//! that never queried a row cannot tell it apart from a new one. Duplicate
//! log entries still fail the batch with `Conflict`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | PersistenceError |
//! |------------|----------------------|------------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key / check violation) | `23503` / `23514` | `Rejected` |
//! | Database (other) | Any other | `Database` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | PoolClosed / Io / other | N/A | `Database` |

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use eventstore_core::AggregateId;
use eventstore_events::EventRecord;

use super::{AggregateRow, ChangeSet, ContextFactory, PersistenceContext, RowFilter, RowOp};
use crate::cancel::Cancellation;
use crate::error::PersistenceError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS aggregates (
        kind TEXT NOT NULL,
        id UUID NOT NULL,
        state JSONB NOT NULL,
        PRIMARY KEY (kind, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        position BIGSERIAL NOT NULL,
        id UUID PRIMARY KEY,
        stream_id UUID NOT NULL,
        data TEXT NOT NULL,
        "type" TEXT NOT NULL,
        "timestamp" TIMESTAMPTZ NOT NULL,
        dotnet_type TEXT NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS events_stream_idx ON events (stream_id, position)"#,
];

/// Connection pool handle; hands out one [`PostgresContext`] per unit of work.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    pub fn context(&self) -> PostgresContext {
        PostgresContext {
            pool: self.pool.clone(),
            changes: ChangeSet::new(),
            seen: Mutex::new(HashSet::new()),
        }
    }
}

impl ContextFactory for PostgresStore {
    fn create_context(&self) -> Box<dyn PersistenceContext> {
        Box::new(self.context())
    }
}

/// One unit of work over Postgres.
///
/// Rows returned by queries are remembered, so insert-vs-update decisions for
/// loaded aggregates need no extra round trip.
#[derive(Debug)]
pub struct PostgresContext {
    pool: Arc<PgPool>,
    changes: ChangeSet,
    seen: Mutex<HashSet<(String, AggregateId)>>,
}

impl PostgresContext {
    fn remember<'a>(&self, keys: impl IntoIterator<Item = (&'a str, AggregateId)>) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.extend(keys.into_iter().map(|(kind, id)| (kind.to_string(), id)));
    }

    fn apply_committed(&self, changes: &ChangeSet) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        for op in changes.row_ops() {
            let key = (op.kind().to_string(), op.id());
            match op {
                RowOp::Insert(_) | RowOp::Update(_) => {
                    seen.insert(key);
                }
                RowOp::Delete { .. } => {
                    seen.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
impl PersistenceContext for PostgresContext {
    #[instrument(skip(self, cancel), fields(operation), err)]
    async fn query(
        &self,
        kind: &str,
        filter: RowFilter,
        cancel: &Cancellation,
    ) -> Result<Vec<AggregateRow>, PersistenceError> {
        cancel.check()?;
        Span::current().record("operation", "query_aggregates");

        let rows = match filter {
            RowFilter::ById(id) => {
                sqlx::query("SELECT kind, id, state FROM aggregates WHERE kind = $1 AND id = $2")
                    .bind(kind)
                    .bind(id.as_uuid())
                    .fetch_all(&*self.pool)
                    .await
            }
            RowFilter::All => {
                sqlx::query("SELECT kind, id, state FROM aggregates WHERE kind = $1 ORDER BY id")
                    .bind(kind)
                    .fetch_all(&*self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("query_aggregates", e))?;

        let rows = rows
            .iter()
            .map(aggregate_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.remember(rows.iter().map(|row| (row.kind.as_str(), row.id)));
        Ok(rows)
    }

    #[instrument(skip(self, cancel), fields(stream_id = %stream_id, event_count), err)]
    async fn load_stream(
        &self,
        stream_id: AggregateId,
        cancel: &Cancellation,
    ) -> Result<Vec<EventRecord>, PersistenceError> {
        cancel.check()?;

        let rows = sqlx::query(
            r#"
            SELECT id, stream_id, data, "type", "timestamp", dotnet_type
            FROM events
            WHERE stream_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(stream_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let records = rows.iter().map(event_record).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("event_count", records.len());
        Ok(records)
    }

    fn is_persisted(&self, kind: &str, id: AggregateId) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(kind.to_string(), id))
    }

    fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    fn changes_mut(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    #[instrument(
        skip(self, cancel),
        fields(
            row_ops = self.changes.row_ops().len(),
            event_count = self.changes.events().len()
        ),
        err
    )]
    async fn save_changes(&mut self, cancel: &Cancellation) -> Result<usize, PersistenceError> {
        cancel.check()?;
        if self.changes.is_empty() {
            return Ok(0);
        }

        // Dropping the transaction on any early return rolls it back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for op in self.changes.row_ops() {
            match op {
                // This context only knows rows it has queried, so an insert may
                // target a row committed through another context.
                RowOp::Insert(row) => {
                    sqlx::query(
                        r#"
                        INSERT INTO aggregates (kind, id, state) VALUES ($1, $2, $3)
                        ON CONFLICT (kind, id) DO UPDATE SET state = EXCLUDED.state
                        "#,
                    )
                    .bind(&row.kind)
                    .bind(row.id.as_uuid())
                    .bind(&row.state)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("insert_aggregate", e))?;
                }
                RowOp::Update(row) => {
                    let result = sqlx::query("UPDATE aggregates SET state = $3 WHERE kind = $1 AND id = $2")
                        .bind(&row.kind)
                        .bind(row.id.as_uuid())
                        .bind(&row.state)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("update_aggregate", e))?;
                    if result.rows_affected() == 0 {
                        return Err(missing_row(&row.kind, row.id));
                    }
                }
                RowOp::Delete { kind, id } => {
                    let result = sqlx::query("DELETE FROM aggregates WHERE kind = $1 AND id = $2")
                        .bind(kind)
                        .bind(id.as_uuid())
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("delete_aggregate", e))?;
                    if result.rows_affected() == 0 {
                        return Err(missing_row(kind, *id));
                    }
                }
            }
        }

        for record in self.changes.events() {
            sqlx::query(
                r#"
                INSERT INTO events (id, stream_id, data, "type", "timestamp", dotnet_type)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(record.id)
            .bind(record.stream_id.as_uuid())
            .bind(&record.data)
            .bind(&record.event_type)
            .bind(record.timestamp)
            .bind(&record.type_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_event", e))?;
        }

        if cancel.is_cancelled() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(PersistenceError::Cancelled);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let applied = self.changes.len();
        self.apply_committed(&self.changes);
        self.changes.clear();
        Ok(applied)
    }
}

fn missing_row(kind: &str, id: AggregateId) -> PersistenceError {
    PersistenceError::Rejected(format!("{kind} `{id}` does not exist"))
}

fn aggregate_row(row: &PgRow) -> Result<AggregateRow, PersistenceError> {
    let kind: String = row.try_get("kind").map_err(|e| map_sqlx_error("decode_aggregate", e))?;
    let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("decode_aggregate", e))?;
    let state: JsonValue = row.try_get("state").map_err(|e| map_sqlx_error("decode_aggregate", e))?;
    Ok(AggregateRow::new(kind, AggregateId::from_uuid(id), state))
}

fn event_record(row: &PgRow) -> Result<EventRecord, PersistenceError> {
    let decode = |e| map_sqlx_error("decode_event", e);
    let stream_id: Uuid = row.try_get("stream_id").map_err(decode)?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp").map_err(decode)?;
    Ok(EventRecord {
        id: row.try_get("id").map_err(decode)?,
        stream_id: AggregateId::from_uuid(stream_id),
        data: row.try_get("data").map_err(decode)?,
        event_type: row.try_get("type").map_err(decode)?,
        timestamp,
        type_name: row.try_get("dotnet_type").map_err(decode)?,
    })
}

/// Map SQLx errors to persistence errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> PersistenceError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => PersistenceError::Conflict(msg),
                Some("23503") | Some("23514") => PersistenceError::Rejected(msg),
                _ => PersistenceError::Database(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            PersistenceError::Serialization(format!("{operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            PersistenceError::Database(format!("connection pool closed in {operation}"))
        }
        _ => PersistenceError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_map_to_serialization() {
        let err = map_sqlx_error("decode_event", sqlx::Error::ColumnNotFound("type".into()));
        assert!(matches!(err, PersistenceError::Serialization(msg) if msg.contains("decode_event")));
    }

    #[test]
    fn pool_closed_is_a_database_error() {
        assert_eq!(
            map_sqlx_error("query_aggregates", sqlx::Error::PoolClosed),
            PersistenceError::Database("connection pool closed in query_aggregates".into())
        );
    }

    #[test]
    fn schema_columns_follow_the_log_entry_shape() {
        let events = SCHEMA[1];
        for column in ["id", "stream_id", "data", "\"type\"", "\"timestamp\"", "dotnet_type"] {
            assert!(events.contains(column), "missing column {column}");
        }
    }

    /// Requires a reachable database: `DATABASE_URL=... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn commits_rows_and_events_atomically() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let store = PostgresStore::connect(&url, 2).await.unwrap();
        store.ensure_schema().await.unwrap();
        let cancel = Cancellation::new();
        let id = AggregateId::new();

        let mut ctx = store.context();
        ctx.add(AggregateRow::new("widget", id, serde_json::json!({ "n": 1 })));
        ctx.append_event(EventRecord::new(id, "{}", "touched", Utc::now(), "widget::Touched"));
        assert_eq!(ctx.save_changes(&cancel).await.unwrap(), 2);
        assert!(ctx.is_persisted("widget", id));

        let mut dup = store.context();
        dup.add(AggregateRow::new("widget", id, serde_json::json!({ "n": 2 })));
        dup.append_event(ctx.load_stream(id, &cancel).await.unwrap().remove(0));
        assert!(matches!(
            dup.save_changes(&cancel).await,
            Err(PersistenceError::Conflict(_))
        ));

        let fresh = store.context();
        let rows = fresh.query("widget", RowFilter::ById(id), &cancel).await.unwrap();
        assert_eq!(rows[0].state["n"], 1);
        assert_eq!(fresh.load_stream(id, &cancel).await.unwrap().len(), 1);
    }

    /// Requires a reachable database: `DATABASE_URL=... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn rows_committed_elsewhere_are_updated_not_duplicated() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let store = PostgresStore::connect(&url, 2).await.unwrap();
        store.ensure_schema().await.unwrap();
        let cancel = Cancellation::new();
        let id = AggregateId::new();

        let mut first = store.context();
        first.add(AggregateRow::new("widget", id, serde_json::json!({ "n": 1 })));
        first.append_event(EventRecord::new(id, "{}", "touched", Utc::now(), "widget::Touched"));
        first.save_changes(&cancel).await.unwrap();

        // Replay-style access: the stream is read but the row never queried.
        let mut second = store.context();
        assert_eq!(second.load_stream(id, &cancel).await.unwrap().len(), 1);
        assert!(!second.exists("widget", id));
        second.add(AggregateRow::new("widget", id, serde_json::json!({ "n": 2 })));
        second.append_event(EventRecord::new(id, "{}", "touched", Utc::now(), "widget::Touched"));
        assert_eq!(second.save_changes(&cancel).await.unwrap(), 2);
        assert!(second.is_persisted("widget", id));

        let rows = store
            .context()
            .query("widget", RowFilter::All, &cancel)
            .await
            .unwrap();
        let rows: Vec<_> = rows.into_iter().filter(|row| row.id == id).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state["n"], 2);
    }
}
