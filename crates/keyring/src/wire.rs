//! Keyring events to/from durable wire records.
//!
//! The serialization contract that makes keyring events durable: payload
//! fields go through the spec registry's bijective codec, the resulting
//! JSON object is serialized to octets, and the octets ride the
//! [`EventRecord`] envelope. Payload encryption under scope keys happens
//! outside the core on those octets; this layer treats them as opaque
//! plaintext-or-ciphertext bytes.

use serde_json::Value as JsonValue;

use chronicle_core::{AggregateId, DomainError, EventId, UserId};
use chronicle_events::{EventMetadata, EventRecord, SpecRegistry};

use crate::specs::KeyringEvent;

/// Build the durable record for one emitted event.
///
/// `version` is the 1-based position the event takes in its aggregate's
/// stream; callers derive it from the aggregate's version counter when
/// draining the uncommitted buffer.
pub fn encode_to_record(
    registry: &SpecRegistry<KeyringEvent>,
    aggregate_id: AggregateId,
    version: u64,
    actor_id: Option<UserId>,
    event: &KeyringEvent,
) -> Result<EventRecord, DomainError> {
    let event_type = event.event_type();
    let payload = registry
        .encode(event_type, event)
        .map_err(|e| DomainError::validation(format!("{event_type}: {e}")))?;
    let payload_bytes = serde_json::to_vec(&payload)
        .map_err(|e| DomainError::validation(format!("{event_type}: {e}")))?;

    let metadata = EventMetadata::new(
        EventId::new(),
        aggregate_id,
        event.aggregate_type(),
        event_type,
        version,
        event.occurred_at(),
        actor_id,
        None,
        None,
    );

    let mut record = EventRecord::new(&metadata, &payload_bytes);
    if let Some(epoch) = event.epoch() {
        record = record.with_epoch(epoch);
    }
    Ok(record)
}

/// Encode a drained uncommitted buffer, assigning consecutive versions
/// ending at the aggregate's current version.
pub fn encode_uncommitted(
    registry: &SpecRegistry<KeyringEvent>,
    aggregate_id: AggregateId,
    current_version: u64,
    actor_id: Option<UserId>,
    events: &[KeyringEvent],
) -> Result<Vec<EventRecord>, DomainError> {
    let count = events.len() as u64;
    if count > current_version {
        return Err(DomainError::invariant(
            "more uncommitted events than the aggregate version admits",
        ));
    }
    let first_version = current_version - count + 1;

    events
        .iter()
        .enumerate()
        .map(|(offset, event)| {
            encode_to_record(
                registry,
                aggregate_id,
                first_version + offset as u64,
                actor_id,
                event,
            )
        })
        .collect()
}

/// Decode a durable record back into the closed keyring union.
///
/// An unregistered tag means the log and the registry have drifted.
pub fn decode_from_record(
    registry: &SpecRegistry<KeyringEvent>,
    record: &EventRecord,
) -> Result<KeyringEvent, DomainError> {
    let payload_bytes = record.payload_bytes()?;
    let payload: JsonValue = serde_json::from_slice(&payload_bytes)
        .map_err(|e| DomainError::validation(format!("{}: {e}", record.event_type)))?;
    registry
        .decode(&record.event_type, &payload)
        .map_err(|e| DomainError::validation(format!("{}: {e}", record.event_type)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{Scope, ScopeId, ScopeRole};
    use crate::specs::keyring_spec_registry;
    use chrono::{TimeZone, Utc};
    use chronicle_core::AggregateRoot;

    fn ts() -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    #[test]
    fn uncommitted_scope_events_encode_with_dense_versions() {
        let registry = keyring_spec_registry().unwrap();
        let owner = UserId::new();
        let mut scope = Scope::create(ScopeId::new(AggregateId::new()), owner, ts()).unwrap();
        scope.add_member(UserId::new(), ScopeRole::Editor, ts()).unwrap();
        scope.rotate_epoch(None, ts()).unwrap();

        let aggregate_id = scope.id_typed().as_aggregate_id();
        let version = scope.version();
        let events: Vec<KeyringEvent> = scope
            .take_uncommitted_events()
            .into_iter()
            .map(KeyringEvent::from)
            .collect();

        let records =
            encode_uncommitted(&registry, aggregate_id, version, Some(owner), &events).unwrap();

        let versions: Vec<u64> = records.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert!(records.iter().all(|r| r.aggregate_type == "scope"));

        // The rotation record mirrors its epoch into the envelope.
        assert_eq!(records[3].epoch, Some(1));

        // And every record decodes back to the event it was built from.
        for (record, event) in records.iter().zip(&events) {
            let decoded = decode_from_record(&registry, record).unwrap();
            assert_eq!(&decoded, event);
        }
    }

    #[test]
    fn unregistered_tag_fails_decode() {
        let registry = keyring_spec_registry().unwrap();
        let owner = UserId::new();
        let scope = Scope::create(ScopeId::new(AggregateId::new()), owner, ts()).unwrap();
        let event = KeyringEvent::from(scope.uncommitted_events()[0].clone());

        let mut record = encode_to_record(
            &registry,
            scope.id_typed().as_aggregate_id(),
            1,
            Some(owner),
            &event,
        )
        .unwrap();
        record.event_type = "keyring.scope.renamed".to_string();

        assert!(decode_from_record(&registry, &record).is_err());
    }
}
