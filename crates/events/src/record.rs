use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use eventstore_core::{AggregateId, DomainEvent, PayloadError};

use crate::tag::event_tag;

/// One entry of the append-only event log.
///
/// Entries are created when an aggregate is staged for commit and are never
/// mutated afterwards. All entries of one aggregate share its identity as
/// `stream_id`.
///
/// Wire shape:
///
/// ```text
/// { id, stream_id, data, type, timestamp, dotnet_type }
/// ```
///
/// `type` is the derived tag (see [`event_tag`]); `dotnet_type` carries the
/// fully-qualified payload type used to route deserialization. The name is
/// kept for compatibility with existing logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub stream_id: AggregateId,

    /// Serialized payload (JSON).
    pub data: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub timestamp: DateTime<Utc>,

    #[serde(rename = "dotnet_type")]
    pub type_name: String,
}

impl EventRecord {
    /// Build a new entry with a fresh identifier.
    pub fn new(
        stream_id: AggregateId,
        data: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            stream_id,
            data: data.into(),
            event_type: event_type.into(),
            timestamp,
            type_name: type_name.into(),
        }
    }

    /// Serialize a domain event into a log entry of `stream_id`.
    pub fn from_event<E: DomainEvent>(
        stream_id: AggregateId,
        event: &E,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let data = event.to_payload()?;
        Ok(Self::new(
            stream_id,
            data,
            event_tag(event.kind()),
            timestamp,
            event.type_name(),
        ))
    }

    /// Deserialize the payload back into the aggregate's event type.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, PayloadError> {
        E::from_payload(&self.type_name, &self.data)
    }
}
