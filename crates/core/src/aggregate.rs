//! Aggregate root: the unit of consistency for event-sourced domain models.
//!
//! An aggregate changes state only by handling its own domain events:
//! `handle` records the event and then runs every replay handler registered
//! for the event's kind. Because recording and handling always happen
//! together, replaying the recorded events in order against a fresh instance
//! rebuilds the same state.
//!
//! Business operations may also defer validation failures instead of
//! returning early, so that a single operation can report every violation it
//! finds. The repository refuses to stage an aggregate that still carries
//! failures.

use std::collections::HashMap;

use crate::entity::Applier;
use crate::error::{DomainError, DomainResult, ValidationError};
use crate::event::{DomainEvent, EventKind, IntegrationEvent};
use crate::id::AggregateId;

type Handler<A> = Box<dyn Fn(&mut A, &<A as AggregateRoot>::Event) + Send + Sync>;

/// Replay handlers of one aggregate type, keyed by event kind.
///
/// Built once per aggregate type, usually behind a `OnceLock`:
///
/// ```ignore
/// fn handlers() -> &'static Handlers<Self> {
///     static HANDLERS: OnceLock<Handlers<Account>> = OnceLock::new();
///     HANDLERS.get_or_init(|| {
///         Handlers::new()
///             .on(|account: &mut Account, e: &AccountOpened| account.owner = e.owner.clone())
///             .on(|account: &mut Account, e: &FundsDeposited| account.balance += e.amount)
///     })
/// }
/// ```
pub struct Handlers<A: AggregateRoot> {
    by_kind: HashMap<&'static str, Vec<Handler<A>>>,
}

impl<A: AggregateRoot> Handlers<A> {
    pub fn new() -> Self {
        Self {
            by_kind: HashMap::new(),
        }
    }

    /// Register a handler for the payload type `T`.
    ///
    /// A kind may have several handlers; they run in registration order.
    pub fn on<T, F>(mut self, handler: F) -> Self
    where
        T: EventKind<A::Event>,
        F: Fn(&mut A, &T) + Send + Sync + 'static,
    {
        let handler: Handler<A> = Box::new(move |aggregate, event| {
            if let Some(event) = T::narrow(event) {
                handler(aggregate, event);
            }
        });
        self.by_kind.entry(T::KIND).or_default().push(handler);
        self
    }

    pub fn handles(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    fn dispatch(&self, aggregate: &mut A, event: &A::Event) -> DomainResult<()> {
        let Some(handlers) = self.by_kind.get(event.kind()) else {
            tracing::error!(aggregate = A::KIND, kind = event.kind(), "no handlers registered");
            return Err(DomainError::unhandled(A::KIND, event.kind()));
        };

        for handler in handlers {
            handler(aggregate, event);
        }
        Ok(())
    }
}

impl<A: AggregateRoot> Default for Handlers<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: AggregateRoot> core::fmt::Debug for Handlers<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handlers")
            .field("kinds", &self.by_kind.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Everything an aggregate accumulated since it was loaded or created.
///
/// Nothing here is persisted as part of the aggregate's own state; embed it
/// with `#[serde(skip)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChanges<E, I> {
    domain_events: Vec<E>,
    integration_events: Vec<I>,
    validation_failures: Vec<ValidationError>,
}

impl<E, I> Default for PendingChanges<E, I> {
    fn default() -> Self {
        Self {
            domain_events: Vec::new(),
            integration_events: Vec::new(),
            validation_failures: Vec::new(),
        }
    }
}

impl<E, I> PendingChanges<E, I> {
    pub fn new() -> Self {
        Self::default()
    }
}

fn remove_first<T: PartialEq>(items: &mut Vec<T>, item: &T) -> bool {
    match items.iter().position(|candidate| candidate == item) {
        Some(idx) => {
            items.remove(idx);
            true
        }
        None => false,
    }
}

/// Aggregate root contract.
///
/// Implementors provide identity, storage for [`PendingChanges`], and the
/// static handler table; the recording and bookkeeping operations are
/// provided.
pub trait AggregateRoot: Sized + 'static {
    /// Aggregate type name (e.g. `"order"`), used to partition stored rows.
    const KIND: &'static str;

    type Event: DomainEvent;
    type IntegrationEvent: IntegrationEvent;

    /// A blank instance with the given identity, ready for replay.
    fn with_id(id: AggregateId) -> Self;

    fn id(&self) -> AggregateId;

    fn handlers() -> &'static Handlers<Self>;

    fn changes(&self) -> &PendingChanges<Self::Event, Self::IntegrationEvent>;

    fn changes_mut(&mut self) -> &mut PendingChanges<Self::Event, Self::IntegrationEvent>;

    /// Record `event` and run its replay handlers.
    ///
    /// The event is recorded before dispatch; an unregistered kind fails with
    /// [`DomainError::UnhandledEvent`].
    fn handle(&mut self, event: impl Into<Self::Event>) -> DomainResult<()> {
        let event = event.into();
        self.changes_mut().domain_events.push(event.clone());
        Self::handlers().dispatch(self, &event)
    }

    /// Handle, in order, every event an entity requested through `applier`.
    fn apply_requested(&mut self, applier: Applier<Self::Event>) -> DomainResult<()> {
        for event in applier.into_events() {
            self.handle(event)?;
        }
        Ok(())
    }

    fn domain_events(&self) -> &[Self::Event] {
        &self.changes().domain_events
    }

    fn integration_events(&self) -> &[Self::IntegrationEvent] {
        &self.changes().integration_events
    }

    fn validation_failures(&self) -> &[ValidationError] {
        &self.changes().validation_failures
    }

    fn is_valid(&self) -> bool {
        self.changes().validation_failures.is_empty()
    }

    fn add_integration_event(&mut self, event: impl Into<Self::IntegrationEvent>) {
        self.changes_mut().integration_events.push(event.into());
    }

    /// Defer `error` until the aggregate is staged, or fail right away when
    /// `throw_immediately` is set.
    fn add_validation_error(
        &mut self,
        error: ValidationError,
        throw_immediately: bool,
    ) -> DomainResult<()> {
        if throw_immediately {
            return Err(DomainError::Validation(error));
        }
        self.changes_mut().validation_failures.push(error);
        Ok(())
    }

    fn clear_domain_events(&mut self) {
        self.changes_mut().domain_events.clear();
    }

    fn clear_integration_events(&mut self) {
        self.changes_mut().integration_events.clear();
    }

    fn clear_validation_errors(&mut self) {
        self.changes_mut().validation_failures.clear();
    }

    /// Retract the first recorded event equal to `event`.
    fn remove_domain_event(&mut self, event: &Self::Event) -> bool {
        remove_first(&mut self.changes_mut().domain_events, event)
    }

    fn remove_integration_event(&mut self, event: &Self::IntegrationEvent) -> bool {
        remove_first(&mut self.changes_mut().integration_events, event)
    }

    fn remove_validation_error(&mut self, error: &ValidationError) -> bool {
        remove_first(&mut self.changes_mut().validation_failures, error)
    }
}
