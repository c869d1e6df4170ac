//! Event envelope: immutable metadata wrapped around a typed payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chronicle_core::{AggregateId, EventId, UserId};

/// Infrastructure metadata carried by every event.
///
/// The envelope separates stream bookkeeping (identity, ordering, causality)
/// from the domain payload. `version` is the 1-based, dense per-aggregate
/// counter: for any `(aggregate_type, aggregate_id)` the set of persisted
/// versions is exactly `{1..N}`.
///
/// Once constructed, no field mutates; the struct only exposes accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    event_id: EventId,

    aggregate_id: AggregateId,
    aggregate_type: String,
    event_type: String,

    /// 1-based position in the aggregate stream.
    version: u64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    occurred_at: DateTime<Utc>,

    actor_id: Option<UserId>,
    causation_id: Option<EventId>,
    correlation_id: Option<EventId>,
}

impl EventMetadata {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: EventId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        version: u64,
        occurred_at: DateTime<Utc>,
        actor_id: Option<UserId>,
        causation_id: Option<EventId>,
        correlation_id: Option<EventId>,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            version,
            occurred_at,
            actor_id,
            causation_id,
            correlation_id,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn actor_id(&self) -> Option<UserId> {
        self.actor_id
    }

    pub fn causation_id(&self) -> Option<EventId> {
        self.causation_id
    }

    pub fn correlation_id(&self) -> Option<EventId> {
        self.correlation_id
    }
}

/// An event: metadata plus a typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    metadata: EventMetadata,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(metadata: EventMetadata, payload: E) -> Self {
        Self { metadata, payload }
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    pub fn into_parts(self) -> (EventMetadata, E) {
        (self.metadata, self.payload)
    }
}
