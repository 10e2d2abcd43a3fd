use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use eventstore_core::{AggregateId, IntegrationEvent};

use crate::tag::event_tag;

/// Envelope for an integration event, carrying the originating stream.
///
/// This is the unit published on an [`EventBus`](crate::EventBus) once the
/// aggregate's changes are committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationEnvelope {
    message_id: Uuid,

    stream_id: AggregateId,
    aggregate_type: String,

    /// Derived tag of the integration event kind.
    event_type: String,
    occurred_at: DateTime<Utc>,

    payload: JsonValue,
}

impl IntegrationEnvelope {
    pub fn new(
        message_id: Uuid,
        stream_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            message_id,
            stream_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    /// Wrap a typed integration event, serializing its payload.
    pub fn from_event<I: IntegrationEvent>(
        stream_id: AggregateId,
        aggregate_type: &str,
        event: &I,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            Uuid::now_v7(),
            stream_id,
            aggregate_type,
            event_tag(event.kind()),
            occurred_at,
            event.to_payload()?,
        ))
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn stream_id(&self) -> AggregateId {
        self.stream_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }
}
