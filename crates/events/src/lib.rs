//! Event log entries and integration event distribution.
//!
//! - [`EventRecord`]: one durable, append-only log entry per domain event
//! - [`event_tag`]: the human-readable tag stored with each entry
//! - [`IntegrationEnvelope`] / [`EventBus`]: post-commit publication of
//!   integration events

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod record;
pub mod tag;

pub use bus::{BusError, EventBus, Subscription};
pub use envelope::IntegrationEnvelope;
pub use in_memory_bus::InMemoryEventBus;
pub use record::EventRecord;
pub use tag::event_tag;
