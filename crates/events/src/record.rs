//! Cross-boundary JSON representation of a single event.
//!
//! `EventRecord` is what travels on the sync wire (`record_json`) and what
//! the local log persists per row. The payload is opaque at this layer: an
//! encrypted octet sequence carried as base64url. Decoding is strict —
//! UUID versions, the 1-based version counter, and the non-negative
//! timestamp are all checked before a record is accepted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use chronicle_core::{AggregateId, DomainError, EventId, UserId};

use crate::envelope::EventMetadata;

/// Wire shape: `{id, aggregateType, aggregateId, eventType, payload,
/// version, occurredAt, actorId, causationId, correlationId, epoch,
/// keyringUpdate}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub event_type: String,

    /// Encrypted payload bytes, base64url without padding.
    pub payload: String,

    /// 1-based, dense per-aggregate version.
    pub version: u64,

    /// Epoch milliseconds.
    pub occurred_at: i64,

    pub actor_id: Option<UserId>,
    pub causation_id: Option<EventId>,
    pub correlation_id: Option<EventId>,

    /// Scope epoch the payload was wrapped under, when the event touches a
    /// shared resource.
    pub epoch: Option<u64>,

    /// Opaque keyring material rider, base64url without padding.
    pub keyring_update: Option<String>,
}

impl EventRecord {
    pub fn new(metadata: &EventMetadata, payload: &[u8]) -> Self {
        Self {
            id: metadata.event_id(),
            aggregate_type: metadata.aggregate_type().to_string(),
            aggregate_id: metadata.aggregate_id(),
            event_type: metadata.event_type().to_string(),
            payload: URL_SAFE_NO_PAD.encode(payload),
            version: metadata.version(),
            occurred_at: metadata.occurred_at().timestamp_millis(),
            actor_id: metadata.actor_id(),
            causation_id: metadata.causation_id(),
            correlation_id: metadata.correlation_id(),
            epoch: None,
            keyring_update: None,
        }
    }

    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn with_keyring_update(mut self, keyring_update: &[u8]) -> Self {
        self.keyring_update = Some(URL_SAFE_NO_PAD.encode(keyring_update));
        self
    }

    /// Parse and validate a record from its JSON string form.
    pub fn decode_json(record_json: &str) -> Result<Self, DomainError> {
        let record: EventRecord = serde_json::from_str(record_json)
            .map_err(|e| DomainError::validation(format!("event record: {e}")))?;
        record.validate()?;
        Ok(record)
    }

    /// Serialize to the JSON string form carried as `record_json`.
    pub fn encode_json(&self) -> String {
        serde_json::to_string(self).expect("event record serialization is infallible")
    }

    /// Strict shape checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), DomainError> {
        require_version(self.id.as_uuid(), 7, "id")?;
        require_version(self.aggregate_id.as_uuid(), 7, "aggregateId")?;
        if let Some(causation_id) = &self.causation_id {
            require_version(causation_id.as_uuid(), 7, "causationId")?;
        }
        if let Some(correlation_id) = &self.correlation_id {
            require_version(correlation_id.as_uuid(), 7, "correlationId")?;
        }
        if self.version == 0 {
            return Err(DomainError::validation("version must be >= 1"));
        }
        if self.occurred_at < 0 {
            return Err(DomainError::validation("occurredAt must be >= 0"));
        }
        if self.aggregate_type.is_empty() || self.event_type.is_empty() {
            return Err(DomainError::validation(
                "aggregateType and eventType must be non-empty",
            ));
        }
        URL_SAFE_NO_PAD
            .decode(&self.payload)
            .map_err(|e| DomainError::validation(format!("payload: base64url: {e}")))?;
        if let Some(keyring_update) = &self.keyring_update {
            URL_SAFE_NO_PAD
                .decode(keyring_update)
                .map_err(|e| DomainError::validation(format!("keyringUpdate: base64url: {e}")))?;
        }
        Ok(())
    }

    /// The raw payload octets.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, DomainError> {
        URL_SAFE_NO_PAD
            .decode(&self.payload)
            .map_err(|e| DomainError::validation(format!("payload: base64url: {e}")))
    }

    pub fn keyring_update_bytes(&self) -> Result<Option<Vec<u8>>, DomainError> {
        self.keyring_update
            .as_ref()
            .map(|k| {
                URL_SAFE_NO_PAD
                    .decode(k)
                    .map_err(|e| DomainError::validation(format!("keyringUpdate: base64url: {e}")))
            })
            .transpose()
    }
}

fn require_version(uuid: &uuid::Uuid, version: usize, field: &str) -> Result<(), DomainError> {
    if uuid.get_version_num() != version {
        return Err(DomainError::validation(format!(
            "{field}: expected UUID v{version}, got v{}",
            uuid.get_version_num()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn metadata() -> EventMetadata {
        EventMetadata::new(
            EventId::new(),
            AggregateId::new(),
            "scope",
            "keyring.scope.created",
            1,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            Some(UserId::new()),
            None,
            None,
        )
    }

    #[test]
    fn record_json_round_trips() {
        let record = EventRecord::new(&metadata(), b"ciphertext")
            .with_epoch(3)
            .with_keyring_update(b"wrapped");

        let json = record.encode_json();
        let back = EventRecord::decode_json(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.payload_bytes().unwrap(), b"ciphertext");
        assert_eq!(back.keyring_update_bytes().unwrap().unwrap(), b"wrapped");
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let json = serde_json::to_value(EventRecord::new(&metadata(), b"x")).unwrap();
        for key in [
            "id",
            "aggregateType",
            "aggregateId",
            "eventType",
            "payload",
            "version",
            "occurredAt",
            "actorId",
            "causationId",
            "correlationId",
            "epoch",
            "keyringUpdate",
        ] {
            assert!(json.get(key).is_some(), "missing wire field {key}");
        }
    }

    #[test]
    fn decode_rejects_v4_event_id() {
        let mut record = EventRecord::new(&metadata(), b"x");
        record.id = EventId::from_uuid(uuid::Uuid::new_v4());
        let err = EventRecord::decode_json(&record.encode_json()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn decode_rejects_zero_version_and_negative_timestamp() {
        let mut record = EventRecord::new(&metadata(), b"x");
        record.version = 0;
        assert!(record.validate().is_err());

        let mut record = EventRecord::new(&metadata(), b"x");
        record.occurred_at = -1;
        assert!(record.validate().is_err());
    }

    #[test]
    fn decode_rejects_malformed_payload_base64() {
        let mut record = EventRecord::new(&metadata(), b"x");
        record.payload = "not base64!".to_string();
        assert!(record.validate().is_err());
    }
}
