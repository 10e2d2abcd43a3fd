//! Entity trait: child objects owned by an aggregate.
//!
//! An entity never records events itself. It mutates only when its owning
//! aggregate cascades an already-decided event into it (`handle` -> `when`),
//! and it asks the aggregate to record new events through an [`Applier`].

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Event type of the owning aggregate.
    type Event;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// State transition for one event.
    ///
    /// Kinds the entity does not care about are up to the implementor; most
    /// entities ignore them.
    fn when(&mut self, event: &Self::Event);

    fn handle(&mut self, event: &Self::Event) {
        self.when(event);
    }
}

/// Cascade `event` into `entity` when present.
pub fn apply_to_entity<En: Entity>(entity: Option<&mut En>, event: &En::Event) {
    if let Some(entity) = entity {
        entity.handle(event);
    }
}

/// Events an entity requested to be recorded by its owning aggregate.
///
/// Pass one to entity operations, then hand it to
/// [`AggregateRoot::apply_requested`](crate::AggregateRoot::apply_requested),
/// which records and dispatches the events in request order.
#[derive(Debug)]
pub struct Applier<E> {
    requested: Vec<E>,
}

impl<E> Applier<E> {
    pub fn new() -> Self {
        Self {
            requested: Vec::new(),
        }
    }

    pub fn apply(&mut self, event: impl Into<E>) {
        self.requested.push(event.into());
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    pub fn into_events(self) -> Vec<E> {
        self.requested
    }
}

impl<E> Default for Applier<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum CounterEvent {
        Bumped { id: u32 },
        Reset,
    }

    #[derive(Debug)]
    struct Counter {
        id: u32,
        hits: u32,
    }

    impl Entity for Counter {
        type Id = u32;
        type Event = CounterEvent;

        fn id(&self) -> &u32 {
            &self.id
        }

        fn when(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Bumped { id } if *id == self.id => self.hits += 1,
                CounterEvent::Bumped { .. } => {}
                CounterEvent::Reset => self.hits = 0,
            }
        }
    }

    #[test]
    fn cascade_reaches_present_entity_only() {
        let mut counter = Counter { id: 1, hits: 0 };
        apply_to_entity(Some(&mut counter), &CounterEvent::Bumped { id: 1 });
        apply_to_entity(Some(&mut counter), &CounterEvent::Bumped { id: 2 });
        apply_to_entity::<Counter>(None, &CounterEvent::Reset);

        assert_eq!(counter.hits, 1);
        assert_eq!(counter.id(), &1);
    }

    #[test]
    fn applier_keeps_request_order() {
        let mut applier: Applier<CounterEvent> = Applier::new();
        assert!(applier.is_empty());

        applier.apply(CounterEvent::Bumped { id: 7 });
        applier.apply(CounterEvent::Reset);

        assert_eq!(
            applier.into_events(),
            vec![CounterEvent::Bumped { id: 7 }, CounterEvent::Reset]
        );
    }
}
