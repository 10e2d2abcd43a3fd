//! Generic aggregate repository.
//!
//! The repository turns an aggregate's recorded changes into staged writes
//! on a [`PersistenceContext`] and commits them:
//!
//! 1. **Load**: `load_aggregate` / `find_aggregate` materialize aggregates
//!    from their stored projection
//! 2. **Stage**: `append_changes` refuses invalid aggregates, then stages one
//!    log entry per recorded domain event, the integration events to publish,
//!    and an insert or update of the projection row
//! 3. **Commit**: `save` applies everything staged atomically, then publishes
//!    the staged integration events (publish happens only after commit)
//!
//! The repository never clears an aggregate's pending changes; callers do so
//! once `save` succeeds.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use eventstore_core::{AggregateId, AggregateRoot, ValidationErrors};
use eventstore_events::{EventBus, EventRecord, IntegrationEnvelope};

use crate::cancel::Cancellation;
use crate::context::{AggregateRow, ChangeSet, ContextFactory, PersistenceContext, RowFilter};
use crate::error::RepositoryError;

/// Bus the repository publishes committed integration events to.
pub type IntegrationBus = Arc<dyn EventBus<IntegrationEnvelope>>;

/// Repository for aggregates of type `A` over one persistence context.
pub struct Repository<A, C = Box<dyn PersistenceContext>> {
    context: C,
    bus: Option<IntegrationBus>,
    outbox: Vec<IntegrationEnvelope>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, C> Repository<A, C> {
    pub fn new(context: C) -> Self {
        Self {
            context,
            bus: None,
            outbox: Vec::new(),
            _aggregate: PhantomData,
        }
    }

    /// Publish integration events to `bus` after each successful save.
    pub fn with_bus(mut self, bus: IntegrationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Integration events staged but not yet published.
    pub fn outbox(&self) -> &[IntegrationEnvelope] {
        &self.outbox
    }
}

impl<A> Repository<A> {
    /// Repository over a fresh context from `factory`.
    pub fn from_factory(factory: &dyn ContextFactory) -> Self {
        Self::new(factory.create_context())
    }
}

impl<A, C> Repository<A, C>
where
    A: AggregateRoot + Serialize + DeserializeOwned,
    C: PersistenceContext,
{
    /// The aggregate with identity `id`.
    ///
    /// Fails with [`RepositoryError::NotFound`] when no row matches.
    #[instrument(skip(self, cancel), fields(kind = A::KIND), err)]
    pub async fn load_aggregate(
        &self,
        id: AggregateId,
        cancel: &Cancellation,
    ) -> Result<A, RepositoryError> {
        let rows = cancel
            .guard(self.context.query(A::KIND, RowFilter::ById(id), cancel))
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(RepositoryError::NotFound { kind: A::KIND, id })?;
        materialize(row)
    }

    /// The first aggregate, in store order, satisfying `predicate`.
    ///
    /// No uniqueness is implied; add a constraint to the predicate when the
    /// caller depends on one.
    #[instrument(skip(self, predicate, cancel), fields(kind = A::KIND), err)]
    pub async fn find_aggregate<P>(
        &self,
        predicate: P,
        cancel: &Cancellation,
    ) -> Result<Option<A>, RepositoryError>
    where
        P: Fn(&A) -> bool,
    {
        let rows = cancel
            .guard(self.context.query(A::KIND, RowFilter::All, cancel))
            .await?;

        for row in rows {
            let aggregate = materialize::<A>(row)?;
            if predicate(&aggregate) {
                return Ok(Some(aggregate));
            }
        }
        Ok(None)
    }

    /// Stage removal of the aggregate's projection row. Its event log is kept.
    pub fn remove_aggregate(&mut self, aggregate: &A) {
        debug!(kind = A::KIND, id = %aggregate.id(), "staged aggregate removal");
        self.context.remove(A::KIND, aggregate.id());
    }

    /// Stage the aggregate's recorded changes.
    ///
    /// The projection row is staged as an update when the context knows a row
    /// with the aggregate's identity, otherwise as an insert.
    ///
    /// Fails with [`RepositoryError::Validation`], staging nothing, while the
    /// aggregate carries deferred validation failures.
    pub fn append_changes(&mut self, aggregate: &A) -> Result<(), RepositoryError> {
        let id = aggregate.id();

        if !aggregate.is_valid() {
            let failures = ValidationErrors::from(aggregate.validation_failures().to_vec());
            warn!(kind = A::KIND, %id, failures = failures.len(), "refusing to stage invalid aggregate");
            return Err(RepositoryError::Validation(failures));
        }

        // Serialize everything up front so a failure stages nothing.
        let now = Utc::now();
        let records = aggregate
            .domain_events()
            .iter()
            .map(|event| EventRecord::from_event(id, event, now))
            .collect::<Result<Vec<_>, _>>()
            .map_err(RepositoryError::serialization)?;
        let envelopes = aggregate
            .integration_events()
            .iter()
            .map(|event| IntegrationEnvelope::from_event(id, A::KIND, event, now))
            .collect::<Result<Vec<_>, _>>()
            .map_err(RepositoryError::serialization)?;
        let state = serde_json::to_value(aggregate).map_err(RepositoryError::serialization)?;

        let event_count = records.len();
        for record in records {
            self.context.append_event(record);
        }

        let row = AggregateRow::new(A::KIND, id, state);
        let insert = !self.context.exists(A::KIND, id);
        if insert {
            self.context.add(row);
        } else {
            self.context.update(row);
        }
        self.outbox.extend(envelopes);

        debug!(kind = A::KIND, %id, event_count, insert, "staged aggregate changes");
        Ok(())
    }

    /// Commit everything staged, then publish staged integration events.
    ///
    /// When the commit fails or is cancelled nothing is applied or published
    /// and the changes stay staged. A publication failure is reported after
    /// the commit; the unpublished events stay queued for the next save.
    #[instrument(skip(self, cancel), fields(kind = A::KIND, staged = self.context.changes().len()), err)]
    pub async fn save(&mut self, cancel: &Cancellation) -> Result<usize, RepositoryError> {
        let applied = match cancel.guard(self.context.save_changes(cancel)).await {
            Ok(applied) => applied,
            Err(err) => {
                warn!(error = %err, "commit failed; nothing was applied");
                return Err(err.into());
            }
        };
        info!(applied, "changes committed");

        self.publish_outbox()?;
        Ok(applied)
    }

    /// Rebuild the aggregate by replaying its event log.
    #[instrument(skip(self, cancel), fields(kind = A::KIND), err)]
    pub async fn replay_aggregate(
        &self,
        id: AggregateId,
        cancel: &Cancellation,
    ) -> Result<A, RepositoryError> {
        let records = cancel
            .guard(self.context.load_stream(id, cancel))
            .await?;
        if records.is_empty() {
            return Err(RepositoryError::NotFound { kind: A::KIND, id });
        }
        // Registers the projection row, if any, with the context so staging the
        // replayed aggregate updates it instead of inserting a duplicate.
        cancel
            .guard(self.context.query(A::KIND, RowFilter::ById(id), cancel))
            .await?;

        let mut aggregate = A::with_id(id);
        for record in &records {
            let event = record
                .decode::<A::Event>()
                .map_err(RepositoryError::serialization)?;
            aggregate.handle(event)?;
        }
        aggregate.clear_domain_events();

        debug!(event_count = records.len(), "aggregate replayed");
        Ok(aggregate)
    }

    /// Changes staged on the context since the last successful save.
    pub fn staged(&self) -> &ChangeSet {
        self.context.changes()
    }

    /// Drop every staged change and queued integration event.
    pub fn discard_changes(&mut self) {
        self.context.discard_changes();
        self.outbox.clear();
    }

    fn publish_outbox(&mut self) -> Result<(), RepositoryError> {
        let Some(bus) = &self.bus else {
            if !self.outbox.is_empty() {
                debug!(dropped = self.outbox.len(), "no bus attached; integration events dropped");
            }
            self.outbox.clear();
            return Ok(());
        };

        let pending = std::mem::take(&mut self.outbox);
        let mut remaining = pending.into_iter();
        while let Some(envelope) = remaining.next() {
            if let Err(err) = bus.publish(envelope.clone()) {
                warn!(error = %err, message_id = %envelope.message_id(), "integration event publication failed");
                self.outbox.push(envelope);
                self.outbox.extend(remaining);
                return Err(err.into());
            }
        }
        Ok(())
    }
}

fn materialize<A: DeserializeOwned>(row: AggregateRow) -> Result<A, RepositoryError> {
    serde_json::from_value(row.state).map_err(RepositoryError::serialization)
}
