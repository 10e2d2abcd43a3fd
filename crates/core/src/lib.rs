//! `eventstore-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! event-recording aggregate roots, child entities, value objects with
//! structural equality, and the domain/integration event abstractions.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, Handlers, PendingChanges};
pub use entity::{Applier, Entity, apply_to_entity};
pub use error::{DomainError, DomainResult, ValidationError, ValidationErrors};
pub use event::{DomainEvent, EventKind, IntegrationEvent, NoIntegrationEvents, PayloadError};
pub use id::AggregateId;
pub use value_object::ValueObject;

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
