use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use eventstore_core::AggregateId;
use eventstore_events::EventRecord;

use super::{AggregateRow, ChangeSet, ContextFactory, PersistenceContext, RowFilter, RowOp};
use crate::cancel::Cancellation;
use crate::error::PersistenceError;

type RowKey = (String, AggregateId);

#[derive(Debug, Default)]
struct StoreState {
    rows: BTreeMap<RowKey, JsonValue>,
    events: Vec<EventRecord>,
    event_ids: HashSet<Uuid>,
}

/// In-memory store shared by any number of contexts.
///
/// Intended for tests/dev. Not optimized for performance. Rows are kept in
/// `(kind, id)` order, which with time-ordered ids is creation order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh unit of work over this store.
    pub fn context(&self) -> InMemoryContext {
        InMemoryContext {
            store: self.clone(),
            changes: ChangeSet::new(),
        }
    }

    /// Number of committed rows of `kind`.
    pub fn row_count(&self, kind: &str) -> usize {
        self.read()
            .map(|state| state.rows.keys().filter(|(k, _)| k == kind).count())
            .unwrap_or(0)
    }

    /// Every committed log entry, in append order.
    pub fn events(&self) -> Vec<EventRecord> {
        self.read()
            .map(|state| state.events.clone())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreState>, PersistenceError> {
        self.state
            .read()
            .map_err(|_| PersistenceError::Database("lock poisoned".to_string()))
    }

    fn commit(&self, changes: &ChangeSet) -> Result<usize, PersistenceError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| PersistenceError::Database("lock poisoned".to_string()))?;

        // Validate the whole batch before touching anything.
        let mut present: HashMap<RowKey, bool> = HashMap::new();
        for op in changes.row_ops() {
            let key = (op.kind().to_string(), op.id());
            let exists = match present.get(&key) {
                Some(exists) => *exists,
                None => state.rows.contains_key(&key),
            };
            match op {
                RowOp::Insert(_) if exists => {
                    return Err(PersistenceError::Conflict(format!(
                        "{} `{}` already exists",
                        key.0, key.1
                    )));
                }
                RowOp::Update(_) | RowOp::Delete { .. } if !exists => {
                    return Err(PersistenceError::Rejected(format!(
                        "{} `{}` does not exist",
                        key.0, key.1
                    )));
                }
                _ => {}
            }
            present.insert(key, !matches!(op, RowOp::Delete { .. }));
        }

        let mut batch_ids = HashSet::new();
        for record in changes.events() {
            if state.event_ids.contains(&record.id) || !batch_ids.insert(record.id) {
                return Err(PersistenceError::Conflict(format!(
                    "event `{}` already exists",
                    record.id
                )));
            }
        }

        for op in changes.row_ops() {
            match op {
                RowOp::Insert(row) | RowOp::Update(row) => {
                    state
                        .rows
                        .insert((row.kind.clone(), row.id), row.state.clone());
                }
                RowOp::Delete { kind, id } => {
                    state.rows.remove(&(kind.clone(), *id));
                }
            }
        }
        for record in changes.events() {
            state.event_ids.insert(record.id);
            state.events.push(record.clone());
        }

        Ok(changes.len())
    }
}

impl ContextFactory for InMemoryStore {
    fn create_context(&self) -> Box<dyn PersistenceContext> {
        Box::new(self.context())
    }
}

/// One unit of work over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryContext {
    store: InMemoryStore,
    changes: ChangeSet,
}

impl InMemoryContext {
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }
}

#[async_trait]
impl PersistenceContext for InMemoryContext {
    async fn query(
        &self,
        kind: &str,
        filter: RowFilter,
        cancel: &Cancellation,
    ) -> Result<Vec<AggregateRow>, PersistenceError> {
        cancel.check()?;
        let state = self.store.read()?;
        Ok(state
            .rows
            .iter()
            .filter(|((k, id), _)| k == kind && filter.matches(*id))
            .map(|((k, id), value)| AggregateRow::new(k.clone(), *id, value.clone()))
            .collect())
    }

    async fn load_stream(
        &self,
        stream_id: AggregateId,
        cancel: &Cancellation,
    ) -> Result<Vec<EventRecord>, PersistenceError> {
        cancel.check()?;
        let state = self.store.read()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.stream_id == stream_id)
            .cloned()
            .collect())
    }

    fn is_persisted(&self, kind: &str, id: AggregateId) -> bool {
        self.store
            .read()
            .map(|state| state.rows.contains_key(&(kind.to_string(), id)))
            .unwrap_or(false)
    }

    fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    fn changes_mut(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    async fn save_changes(&mut self, cancel: &Cancellation) -> Result<usize, PersistenceError> {
        cancel.check()?;
        if self.changes.is_empty() {
            return Ok(0);
        }

        let applied = self.store.commit(&self.changes)?;
        self.changes.clear();
        tracing::debug!(applied, "in-memory batch committed");
        Ok(applied)
    }
}
