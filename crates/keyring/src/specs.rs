//! Codec specs for the keyring event types.
//!
//! One spec per event type tag, each mapping payload field names to the
//! codec's bijective primitives. Epoch counters use the decimal-string
//! mapper so they survive JSON without loss; wrapped keys use base64url.

use serde_json::json;

use chronicle_core::{AggregateId, UserId};
use chronicle_events::codec::{
    encode_bytes, encode_nullable, encode_string, encode_timestamp, encode_u64_decimal,
    CodecError, FieldMap,
};
use chronicle_events::{Event, EventSpec, RegistryError, SpecRegistry};

use crate::grant::{
    GrantEvent, GrantId, GrantStatus, ResourceGrant, ResourceGranted, ResourceId, ResourceRevoked,
};
use crate::scope::{
    Scope, ScopeCreated, ScopeEpochRotated, ScopeEvent, ScopeId, ScopeMemberAdded,
    ScopeMemberRemoved, ScopeRole,
};

/// Closed union of every event the keyring subsystem persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyringEvent {
    Scope(ScopeEvent),
    Grant(GrantEvent),
}

impl KeyringEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            KeyringEvent::Scope(e) => e.event_type(),
            KeyringEvent::Grant(e) => e.event_type(),
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            KeyringEvent::Scope(_) => crate::scope::SCOPE_AGGREGATE_TYPE,
            KeyringEvent::Grant(_) => crate::grant::GRANT_AGGREGATE_TYPE,
        }
    }

    pub fn occurred_at(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            KeyringEvent::Scope(e) => e.occurred_at(),
            KeyringEvent::Grant(e) => e.occurred_at(),
        }
    }

    /// The scope epoch the event carries, when it has one (mirrored into
    /// the record envelope for consumers that index without decoding).
    pub fn epoch(&self) -> Option<u64> {
        match self {
            KeyringEvent::Scope(ScopeEvent::Created(e)) => Some(e.epoch),
            KeyringEvent::Scope(ScopeEvent::EpochRotated(e)) => Some(e.epoch),
            KeyringEvent::Grant(GrantEvent::Granted(e)) => Some(e.scope_epoch),
            _ => None,
        }
    }
}

impl TryFrom<KeyringEvent> for ScopeEvent {
    type Error = chronicle_core::DomainError;

    fn try_from(value: KeyringEvent) -> Result<Self, Self::Error> {
        match value {
            KeyringEvent::Scope(event) => Ok(event),
            KeyringEvent::Grant(event) => {
                Err(chronicle_core::DomainError::InvalidEventForAggregate {
                    aggregate_type: crate::scope::SCOPE_AGGREGATE_TYPE,
                    event_type: event.event_type().to_string(),
                })
            }
        }
    }
}

impl TryFrom<KeyringEvent> for GrantEvent {
    type Error = chronicle_core::DomainError;

    fn try_from(value: KeyringEvent) -> Result<Self, Self::Error> {
        match value {
            KeyringEvent::Grant(event) => Ok(event),
            KeyringEvent::Scope(event) => {
                Err(chronicle_core::DomainError::InvalidEventForAggregate {
                    aggregate_type: crate::grant::GRANT_AGGREGATE_TYPE,
                    event_type: event.event_type().to_string(),
                })
            }
        }
    }
}

impl From<ScopeEvent> for KeyringEvent {
    fn from(value: ScopeEvent) -> Self {
        KeyringEvent::Scope(value)
    }
}

impl From<GrantEvent> for KeyringEvent {
    fn from(value: GrantEvent) -> Self {
        KeyringEvent::Grant(value)
    }
}

/// Whether a grant is usable against the scope's current epoch.
///
/// Rotation emits no cascading revokes; consumers apply this check instead.
pub fn grant_is_current(scope: &Scope, grant: &ResourceGrant) -> bool {
    grant.scope_id() == scope.id_typed()
        && grant.status() == GrantStatus::Active
        && grant.scope_epoch() == scope.epoch()
}

/// Build the registry of all keyring event specs.
///
/// Called once at startup; a duplicate tag aborts configuration.
pub fn keyring_spec_registry() -> Result<SpecRegistry<KeyringEvent>, RegistryError> {
    SpecRegistry::with_specs([
        scope_created_spec(),
        scope_member_added_spec(),
        scope_member_removed_spec(),
        scope_epoch_rotated_spec(),
        resource_granted_spec(),
        resource_revoked_spec(),
    ])
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn invalid(field: &str, detail: impl Into<String>) -> CodecError {
    CodecError::InvalidValue {
        field: field.to_string(),
        detail: detail.into(),
    }
}

fn aggregate_id(fields: &FieldMap<'_>, field: &str) -> Result<AggregateId, CodecError> {
    let raw = fields.string(field)?;
    AggregateId::parse(&raw).map_err(|e| invalid(field, e.to_string()))
}

fn user_id(fields: &FieldMap<'_>, field: &str) -> Result<UserId, CodecError> {
    let raw = fields.string(field)?;
    UserId::parse(&raw).map_err(|e| invalid(field, e.to_string()))
}

fn role(fields: &FieldMap<'_>, field: &str) -> Result<ScopeRole, CodecError> {
    let raw = fields.string(field)?;
    ScopeRole::parse(&raw).map_err(|e| invalid(field, e.to_string()))
}

fn wrong_variant(expected: &'static str) -> CodecError {
    CodecError::InvalidValue {
        field: "<payload>".to_string(),
        detail: format!("payload is not a {expected} event"),
    }
}

// ---------------------------------------------------------------------------
// Scope specs
// ---------------------------------------------------------------------------

fn scope_created_spec() -> EventSpec<KeyringEvent> {
    EventSpec {
        event_type: "keyring.scope.created",
        encode: |payload| match payload {
            KeyringEvent::Scope(ScopeEvent::Created(e)) => Ok(json!({
                "scopeId": encode_string(&e.scope_id.to_string()),
                "ownerUserId": encode_string(&e.owner_user_id.to_string()),
                "epoch": encode_u64_decimal(e.epoch),
                "occurredAt": encode_timestamp(e.occurred_at),
            })),
            _ => Err(wrong_variant("keyring.scope.created")),
        },
        decode: |value| {
            let fields = FieldMap::from_value(value)?;
            Ok(KeyringEvent::Scope(ScopeEvent::Created(ScopeCreated {
                scope_id: ScopeId::new(aggregate_id(&fields, "scopeId")?),
                owner_user_id: user_id(&fields, "ownerUserId")?,
                epoch: fields.u64_decimal("epoch")?,
                occurred_at: fields.timestamp("occurredAt")?,
            })))
        },
    }
}

fn scope_member_added_spec() -> EventSpec<KeyringEvent> {
    EventSpec {
        event_type: "keyring.scope.member_added",
        encode: |payload| match payload {
            KeyringEvent::Scope(ScopeEvent::MemberAdded(e)) => Ok(json!({
                "scopeId": encode_string(&e.scope_id.to_string()),
                "userId": encode_string(&e.user_id.to_string()),
                "role": encode_string(e.role.as_str()),
                "occurredAt": encode_timestamp(e.occurred_at),
            })),
            _ => Err(wrong_variant("keyring.scope.member_added")),
        },
        decode: |value| {
            let fields = FieldMap::from_value(value)?;
            Ok(KeyringEvent::Scope(ScopeEvent::MemberAdded(
                ScopeMemberAdded {
                    scope_id: ScopeId::new(aggregate_id(&fields, "scopeId")?),
                    user_id: user_id(&fields, "userId")?,
                    role: role(&fields, "role")?,
                    occurred_at: fields.timestamp("occurredAt")?,
                },
            )))
        },
    }
}

fn scope_member_removed_spec() -> EventSpec<KeyringEvent> {
    EventSpec {
        event_type: "keyring.scope.member_removed",
        encode: |payload| match payload {
            KeyringEvent::Scope(ScopeEvent::MemberRemoved(e)) => Ok(json!({
                "scopeId": encode_string(&e.scope_id.to_string()),
                "userId": encode_string(&e.user_id.to_string()),
                "occurredAt": encode_timestamp(e.occurred_at),
            })),
            _ => Err(wrong_variant("keyring.scope.member_removed")),
        },
        decode: |value| {
            let fields = FieldMap::from_value(value)?;
            Ok(KeyringEvent::Scope(ScopeEvent::MemberRemoved(
                ScopeMemberRemoved {
                    scope_id: ScopeId::new(aggregate_id(&fields, "scopeId")?),
                    user_id: user_id(&fields, "userId")?,
                    occurred_at: fields.timestamp("occurredAt")?,
                },
            )))
        },
    }
}

fn scope_epoch_rotated_spec() -> EventSpec<KeyringEvent> {
    EventSpec {
        event_type: "keyring.scope.epoch_rotated",
        encode: |payload| match payload {
            KeyringEvent::Scope(ScopeEvent::EpochRotated(e)) => Ok(json!({
                "scopeId": encode_string(&e.scope_id.to_string()),
                "priorEpoch": encode_u64_decimal(e.prior_epoch),
                "epoch": encode_u64_decimal(e.epoch),
                "reason": encode_nullable(e.reason.as_ref(), |r| encode_string(r)),
                "occurredAt": encode_timestamp(e.occurred_at),
            })),
            _ => Err(wrong_variant("keyring.scope.epoch_rotated")),
        },
        decode: |value| {
            let fields = FieldMap::from_value(value)?;
            Ok(KeyringEvent::Scope(ScopeEvent::EpochRotated(
                ScopeEpochRotated {
                    scope_id: ScopeId::new(aggregate_id(&fields, "scopeId")?),
                    prior_epoch: fields.u64_decimal("priorEpoch")?,
                    epoch: fields.u64_decimal("epoch")?,
                    reason: fields.nullable("reason", FieldMap::string)?,
                    occurred_at: fields.timestamp("occurredAt")?,
                },
            )))
        },
    }
}

// ---------------------------------------------------------------------------
// Grant specs
// ---------------------------------------------------------------------------

fn resource_granted_spec() -> EventSpec<KeyringEvent> {
    EventSpec {
        event_type: "keyring.grant.granted",
        encode: |payload| match payload {
            KeyringEvent::Grant(GrantEvent::Granted(e)) => Ok(json!({
                "grantId": encode_string(&e.grant_id.to_string()),
                "scopeId": encode_string(&e.scope_id.to_string()),
                "resourceId": encode_string(&e.resource_id.to_string()),
                "scopeEpoch": encode_u64_decimal(e.scope_epoch),
                "resourceKeyId": encode_string(&e.resource_key_id),
                "wrappedKey": encode_bytes(&e.wrapped_key),
                "grantedBy": encode_string(&e.granted_by.to_string()),
                "occurredAt": encode_timestamp(e.occurred_at),
            })),
            _ => Err(wrong_variant("keyring.grant.granted")),
        },
        decode: |value| {
            let fields = FieldMap::from_value(value)?;
            Ok(KeyringEvent::Grant(GrantEvent::Granted(ResourceGranted {
                grant_id: GrantId::new(aggregate_id(&fields, "grantId")?),
                scope_id: ScopeId::new(aggregate_id(&fields, "scopeId")?),
                resource_id: ResourceId::new(aggregate_id(&fields, "resourceId")?),
                scope_epoch: fields.u64_decimal("scopeEpoch")?,
                resource_key_id: fields.string("resourceKeyId")?,
                wrapped_key: fields.bytes("wrappedKey")?,
                granted_by: user_id(&fields, "grantedBy")?,
                occurred_at: fields.timestamp("occurredAt")?,
            })))
        },
    }
}

fn resource_revoked_spec() -> EventSpec<KeyringEvent> {
    EventSpec {
        event_type: "keyring.grant.revoked",
        encode: |payload| match payload {
            KeyringEvent::Grant(GrantEvent::Revoked(e)) => Ok(json!({
                "grantId": encode_string(&e.grant_id.to_string()),
                "reason": encode_nullable(e.reason.as_ref(), |r| encode_string(r)),
                "revokedBy": encode_string(&e.revoked_by.to_string()),
                "occurredAt": encode_timestamp(e.occurred_at),
            })),
            _ => Err(wrong_variant("keyring.grant.revoked")),
        },
        decode: |value| {
            let fields = FieldMap::from_value(value)?;
            Ok(KeyringEvent::Grant(GrantEvent::Revoked(ResourceRevoked {
                grant_id: GrantId::new(aggregate_id(&fields, "grantId")?),
                reason: fields.nullable("reason", FieldMap::string)?,
                revoked_by: user_id(&fields, "revokedBy")?,
                occurred_at: fields.timestamp("occurredAt")?,
            })))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts() -> chrono::DateTime<Utc> {
        // Codec precision is milliseconds; use an exact-ms instant.
        Utc.timestamp_millis_opt(1_700_000_123_456).unwrap()
    }

    fn sample_events() -> Vec<KeyringEvent> {
        let scope_id = ScopeId::new(AggregateId::new());
        let owner = UserId::new();
        vec![
            KeyringEvent::Scope(ScopeEvent::Created(ScopeCreated {
                scope_id,
                owner_user_id: owner,
                epoch: 0,
                occurred_at: ts(),
            })),
            KeyringEvent::Scope(ScopeEvent::MemberAdded(ScopeMemberAdded {
                scope_id,
                user_id: UserId::new(),
                role: ScopeRole::Editor,
                occurred_at: ts(),
            })),
            KeyringEvent::Scope(ScopeEvent::MemberRemoved(ScopeMemberRemoved {
                scope_id,
                user_id: UserId::new(),
                occurred_at: ts(),
            })),
            KeyringEvent::Scope(ScopeEvent::EpochRotated(ScopeEpochRotated {
                scope_id,
                prior_epoch: u64::MAX - 2,
                epoch: u64::MAX - 1,
                reason: Some("device lost".to_string()),
                occurred_at: ts(),
            })),
            KeyringEvent::Scope(ScopeEvent::EpochRotated(ScopeEpochRotated {
                scope_id,
                prior_epoch: 0,
                epoch: 1,
                reason: None,
                occurred_at: ts(),
            })),
            KeyringEvent::Grant(GrantEvent::Granted(ResourceGranted {
                grant_id: GrantId::new(AggregateId::new()),
                scope_id,
                resource_id: ResourceId::new(AggregateId::new()),
                scope_epoch: 7,
                resource_key_id: "rk-7".to_string(),
                wrapped_key: vec![0, 255, 17, 34],
                granted_by: owner,
                occurred_at: ts(),
            })),
            KeyringEvent::Grant(GrantEvent::Revoked(ResourceRevoked {
                grant_id: GrantId::new(AggregateId::new()),
                reason: Some("archived".to_string()),
                revoked_by: owner,
                occurred_at: ts(),
            })),
        ]
    }

    #[test]
    fn every_registered_payload_round_trips() {
        let registry = keyring_spec_registry().unwrap();
        for event in sample_events() {
            let tag = event.event_type();
            let encoded = registry.encode(tag, &event).unwrap();
            let decoded = registry.decode(tag, &encoded).unwrap();
            assert_eq!(decoded, event, "round-trip failed for {tag}");
        }
    }

    #[test]
    fn registry_contains_exactly_the_keyring_tags() {
        let registry = keyring_spec_registry().unwrap();
        let mut tags: Vec<_> = registry.event_types().collect();
        tags.sort_unstable();
        assert_eq!(
            tags,
            vec![
                "keyring.grant.granted",
                "keyring.grant.revoked",
                "keyring.scope.created",
                "keyring.scope.epoch_rotated",
                "keyring.scope.member_added",
                "keyring.scope.member_removed",
            ]
        );
    }

    #[test]
    fn decode_rejects_v4_aggregate_ids() {
        let registry = keyring_spec_registry().unwrap();
        let encoded = json!({
            "scopeId": uuid::Uuid::new_v4().to_string(),
            "userId": UserId::new().to_string(),
            "occurredAt": 1_700_000_000_000i64,
        });
        assert!(registry
            .decode("keyring.scope.member_removed", &encoded)
            .is_err());
    }

    #[test]
    fn encode_with_mismatched_variant_fails() {
        let registry = keyring_spec_registry().unwrap();
        let event = sample_events().remove(0);
        assert!(registry.encode("keyring.grant.revoked", &event).is_err());
    }

    #[test]
    fn grant_currency_tracks_scope_epoch() {
        let owner = UserId::new();
        let mut scope = Scope::create(ScopeId::new(AggregateId::new()), owner, ts()).unwrap();
        let mut grant = ResourceGrant::create(
            GrantId::new(AggregateId::new()),
            scope.id_typed(),
            ResourceId::new(AggregateId::new()),
            scope.epoch(),
            "rk-1".to_string(),
            vec![9, 9],
            owner,
            ts(),
        )
        .unwrap();

        assert!(grant_is_current(&scope, &grant));

        // Rotation invalidates the grant without touching it.
        scope.rotate_epoch(None, ts()).unwrap();
        assert!(!grant_is_current(&scope, &grant));
        assert_eq!(grant.status(), GrantStatus::Active);

        // A revoked grant is never current, epoch match or not.
        grant.revoke(owner, None, ts()).unwrap();
        assert!(!grant_is_current(&scope, &grant));
    }
}
