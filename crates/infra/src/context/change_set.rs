use eventstore_core::AggregateId;
use eventstore_events::EventRecord;

use super::AggregateRow;

/// A staged change to an aggregate projection row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOp {
    Insert(AggregateRow),
    Update(AggregateRow),
    Delete { kind: String, id: AggregateId },
}

impl RowOp {
    pub fn kind(&self) -> &str {
        match self {
            RowOp::Insert(row) | RowOp::Update(row) => &row.kind,
            RowOp::Delete { kind, .. } => kind,
        }
    }

    pub fn id(&self) -> AggregateId {
        match self {
            RowOp::Insert(row) | RowOp::Update(row) => row.id,
            RowOp::Delete { id, .. } => *id,
        }
    }

    fn targets(&self, kind: &str, id: AggregateId) -> bool {
        self.kind() == kind && self.id() == id
    }
}

/// Everything staged on a context since its last successful save.
///
/// Row operations and log entries each keep staging order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    rows: Vec<RowOp>,
    events: Vec<EventRecord>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row: AggregateRow) {
        self.rows.push(RowOp::Insert(row));
    }

    /// Stage an update. A row still pending insertion is replaced in place,
    /// so it is committed once with its latest state.
    pub fn update(&mut self, row: AggregateRow) {
        if let Some(RowOp::Insert(pending)) = self.last_op_mut(&row.kind, row.id) {
            *pending = row;
            return;
        }
        self.rows.push(RowOp::Update(row));
    }

    pub fn delete(&mut self, kind: impl Into<String>, id: AggregateId) {
        self.rows.push(RowOp::Delete {
            kind: kind.into(),
            id,
        });
    }

    pub fn append_event(&mut self, record: EventRecord) {
        self.events.push(record);
    }

    /// Whether the row exists once the staged operations are applied, if
    /// anything is staged for it.
    pub fn presence(&self, kind: &str, id: AggregateId) -> Option<bool> {
        self.rows
            .iter()
            .rev()
            .find(|op| op.targets(kind, id))
            .map(|op| !matches!(op, RowOp::Delete { .. }))
    }

    pub fn row_ops(&self) -> &[RowOp] {
        &self.rows
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.rows.len() + self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.events.clear();
    }

    fn last_op_mut(&mut self, kind: &str, id: AggregateId) -> Option<&mut RowOp> {
        self.rows.iter_mut().rev().find(|op| op.targets(kind, id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn row(id: AggregateId, n: i64) -> AggregateRow {
        AggregateRow::new("order", id, json!({ "n": n }))
    }

    #[test]
    fn update_folds_into_pending_insert() {
        let id = AggregateId::new();
        let mut changes = ChangeSet::new();
        changes.insert(row(id, 1));
        changes.update(row(id, 2));

        assert_eq!(changes.row_ops(), &[RowOp::Insert(row(id, 2))]);
    }

    #[test]
    fn update_after_delete_is_kept_separate() {
        let id = AggregateId::new();
        let mut changes = ChangeSet::new();
        changes.insert(row(id, 1));
        changes.delete("order", id);
        changes.update(row(id, 2));

        assert_eq!(changes.row_ops().len(), 3);
        assert_eq!(changes.presence("order", id), Some(true));
    }

    #[test]
    fn presence_follows_the_last_operation() {
        let id = AggregateId::new();
        let mut changes = ChangeSet::new();
        assert_eq!(changes.presence("order", id), None);

        changes.insert(row(id, 1));
        assert_eq!(changes.presence("order", id), Some(true));
        assert_eq!(changes.presence("invoice", id), None);

        changes.delete("order", id);
        assert_eq!(changes.presence("order", id), Some(false));
    }

    #[test]
    fn events_keep_staging_order() {
        let stream = AggregateId::new();
        let mut changes = ChangeSet::new();
        for tag in ["first", "second", "third"] {
            changes.append_event(EventRecord::new(stream, "{}", tag, Utc::now(), tag));
        }

        let tags: Vec<_> = changes.events().iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(tags, vec!["first", "second", "third"]);
        assert_eq!(changes.len(), 3);

        changes.clear();
        assert!(changes.is_empty());
    }
}
