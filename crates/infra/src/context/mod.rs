//! Persistence context boundary.
//!
//! A context is one unit of work over a store: it answers queries over
//! aggregate projection rows and the event log, stages additions, updates
//! and removals, and commits everything staged as a single atomic batch.
//!
//! ## Design Principles
//!
//! - **No storage assumptions**: rows carry the aggregate state as a JSON
//!   document, so in-memory and SQL backends implement the same surface
//! - **Staging is in-memory**: `add`/`update`/`remove`/`append_event` never
//!   suspend; only queries and `save_changes` perform I/O
//! - **All or nothing**: `save_changes` applies every staged change or none
//!
//! A context is not meant to be shared between concurrent callers; give each
//! repository its own (see [`ContextFactory`]).

pub mod change_set;
pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use eventstore_core::AggregateId;
use eventstore_events::EventRecord;

use crate::cancel::Cancellation;
use crate::error::PersistenceError;

pub use change_set::{ChangeSet, RowOp};
pub use in_memory::{InMemoryContext, InMemoryStore};
pub use postgres::{PostgresContext, PostgresStore};

/// Current projection of one aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    /// Aggregate type name, partitions rows between aggregate types.
    pub kind: String,
    pub id: AggregateId,
    pub state: JsonValue,
}

impl AggregateRow {
    pub fn new(kind: impl Into<String>, id: AggregateId, state: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            id,
            state,
        }
    }
}

/// Row selection for [`PersistenceContext::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    ById(AggregateId),
    All,
}

impl RowFilter {
    pub fn matches(&self, id: AggregateId) -> bool {
        match self {
            RowFilter::ById(wanted) => *wanted == id,
            RowFilter::All => true,
        }
    }
}

/// Unit of work over aggregate rows and the event log.
#[async_trait]
pub trait PersistenceContext: Send + Sync {
    /// Committed rows of `kind` matching `filter`, in store order.
    async fn query(
        &self,
        kind: &str,
        filter: RowFilter,
        cancel: &Cancellation,
    ) -> Result<Vec<AggregateRow>, PersistenceError>;

    /// Committed log entries of one stream, in append order.
    async fn load_stream(
        &self,
        stream_id: AggregateId,
        cancel: &Cancellation,
    ) -> Result<Vec<EventRecord>, PersistenceError>;

    /// Whether a committed row is known to this context, without I/O.
    fn is_persisted(&self, kind: &str, id: AggregateId) -> bool;

    fn changes(&self) -> &ChangeSet;

    fn changes_mut(&mut self) -> &mut ChangeSet;

    /// Commit every staged change atomically and return how many were
    /// applied. On failure nothing is applied and the changes stay staged.
    async fn save_changes(&mut self, cancel: &Cancellation) -> Result<usize, PersistenceError>;

    /// Whether the row exists once staged changes are taken into account.
    fn exists(&self, kind: &str, id: AggregateId) -> bool {
        self.changes()
            .presence(kind, id)
            .unwrap_or_else(|| self.is_persisted(kind, id))
    }

    fn add(&mut self, row: AggregateRow) {
        self.changes_mut().insert(row);
    }

    fn update(&mut self, row: AggregateRow) {
        self.changes_mut().update(row);
    }

    fn remove(&mut self, kind: &str, id: AggregateId) {
        self.changes_mut().delete(kind, id);
    }

    fn append_event(&mut self, record: EventRecord) {
        self.changes_mut().append_event(record);
    }

    fn discard_changes(&mut self) {
        self.changes_mut().clear();
    }
}

#[async_trait]
impl<C> PersistenceContext for Box<C>
where
    C: PersistenceContext + ?Sized,
{
    async fn query(
        &self,
        kind: &str,
        filter: RowFilter,
        cancel: &Cancellation,
    ) -> Result<Vec<AggregateRow>, PersistenceError> {
        (**self).query(kind, filter, cancel).await
    }

    async fn load_stream(
        &self,
        stream_id: AggregateId,
        cancel: &Cancellation,
    ) -> Result<Vec<EventRecord>, PersistenceError> {
        (**self).load_stream(stream_id, cancel).await
    }

    fn is_persisted(&self, kind: &str, id: AggregateId) -> bool {
        (**self).is_persisted(kind, id)
    }

    fn changes(&self) -> &ChangeSet {
        (**self).changes()
    }

    fn changes_mut(&mut self) -> &mut ChangeSet {
        (**self).changes_mut()
    }

    async fn save_changes(&mut self, cancel: &Cancellation) -> Result<usize, PersistenceError> {
        (**self).save_changes(cancel).await
    }
}

/// Creates one fresh context per unit of work.
pub trait ContextFactory: Send + Sync {
    fn create_context(&self) -> Box<dyn PersistenceContext>;
}
