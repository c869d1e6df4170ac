//! Keyring aggregates through the local log: drain the uncommitted buffer,
//! persist as records, reload, and reconstitute the same state.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use chronicle_core::{AggregateId, AggregateRoot, UserId};
use chronicle_keyring::{
    decode_from_record, encode_uncommitted, grant_is_current, keyring_spec_registry, GrantEvent,
    GrantId, KeyringEvent, ResourceGrant, ResourceId, Scope, ScopeEvent, ScopeId, ScopeRole,
};
use chronicle_store::{EventLog, LogEngine};

fn ts(offset: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + offset).unwrap()
}

async fn event_log() -> EventLog {
    EventLog::new(Arc::new(LogEngine::in_memory().await.unwrap()))
}

#[tokio::test]
async fn scope_survives_persist_and_reload() {
    let registry = keyring_spec_registry().unwrap();
    let log = event_log().await;

    let owner = UserId::new();
    let member = UserId::new();
    let mut scope = Scope::create(ScopeId::new(AggregateId::new()), owner, ts(0)).unwrap();
    scope.add_member(member, ScopeRole::Editor, ts(1)).unwrap();
    scope.rotate_epoch(Some("onboarding".to_string()), ts(2)).unwrap();

    let aggregate_id = scope.id_typed().as_aggregate_id();
    let version = scope.version();
    let drained: Vec<KeyringEvent> = scope
        .take_uncommitted_events()
        .into_iter()
        .map(KeyringEvent::from)
        .collect();
    let records =
        encode_uncommitted(&registry, aggregate_id, version, Some(owner), &drained).unwrap();
    log.append_records(&records).await.unwrap();
    scope.mark_events_as_committed();

    // Reload the stream and rebuild the aggregate.
    let stored = log.read_stream("scope", aggregate_id).await.unwrap();
    assert_eq!(stored.len(), 4);

    let history: Vec<ScopeEvent> = stored
        .iter()
        .map(|row| {
            ScopeEvent::try_from(decode_from_record(&registry, &row.record).unwrap()).unwrap()
        })
        .collect();
    let reloaded = Scope::load_from_history(history).unwrap();

    assert_eq!(reloaded.epoch(), scope.epoch());
    assert_eq!(reloaded.version(), scope.version());
    assert_eq!(reloaded.members(), scope.members());
    assert_eq!(reloaded.owner_user_id(), owner);
}

#[tokio::test]
async fn snapshot_bounds_replay_after_reload() {
    let registry = keyring_spec_registry().unwrap();
    let log = event_log().await;

    let owner = UserId::new();
    let mut scope = Scope::create(ScopeId::new(AggregateId::new()), owner, ts(0)).unwrap();
    for round in 0..3 {
        scope.rotate_epoch(None, ts(round)).unwrap();
    }

    let aggregate_id = scope.id_typed().as_aggregate_id();
    let drained: Vec<KeyringEvent> = scope
        .take_uncommitted_events()
        .into_iter()
        .map(KeyringEvent::from)
        .collect();
    let records =
        encode_uncommitted(&registry, aggregate_id, scope.version(), Some(owner), &drained)
            .unwrap();
    log.append_records(&records).await.unwrap();

    // Snapshot at the current version, then extend the stream.
    log.write_snapshot(&scope.snapshot(None)).await.unwrap();
    scope.rotate_epoch(None, ts(10)).unwrap();
    let tail_events: Vec<KeyringEvent> = scope
        .take_uncommitted_events()
        .into_iter()
        .map(KeyringEvent::from)
        .collect();
    let tail_records =
        encode_uncommitted(&registry, aggregate_id, scope.version(), Some(owner), &tail_events)
            .unwrap();
    log.append_records(&tail_records).await.unwrap();

    // Hydrate from the snapshot plus only the events past its version.
    let snapshot = log.read_snapshot("scope", aggregate_id).await.unwrap().unwrap();
    let tail: Vec<ScopeEvent> = log
        .read_stream("scope", aggregate_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|row| row.record.version > snapshot.version)
        .map(|row| {
            ScopeEvent::try_from(decode_from_record(&registry, &row.record).unwrap()).unwrap()
        })
        .collect();
    assert_eq!(tail.len(), 1);

    let hydrated = Scope::reconstitute_from_snapshot(&snapshot, tail).unwrap();
    assert_eq!(hydrated.epoch(), 4);
    assert_eq!(hydrated.version(), scope.version());
}

#[tokio::test]
async fn grant_lifecycle_through_the_log_and_epoch_check() {
    let registry = keyring_spec_registry().unwrap();
    let log = event_log().await;

    let owner = UserId::new();
    let scope = Scope::create(ScopeId::new(AggregateId::new()), owner, ts(0)).unwrap();

    let mut grant = ResourceGrant::create(
        GrantId::new(AggregateId::new()),
        scope.id_typed(),
        ResourceId::new(AggregateId::new()),
        scope.epoch(),
        "rk-1".to_string(),
        vec![4, 2],
        owner,
        ts(1),
    )
    .unwrap();
    grant.revoke(owner, Some("archived".to_string()), ts(2)).unwrap();

    let aggregate_id = grant.id_typed().as_aggregate_id();
    let drained: Vec<KeyringEvent> = grant
        .take_uncommitted_events()
        .into_iter()
        .map(KeyringEvent::from)
        .collect();
    let records =
        encode_uncommitted(&registry, aggregate_id, grant.version(), Some(owner), &drained)
            .unwrap();
    log.append_records(&records).await.unwrap();

    // The granted record mirrors the minting epoch into the envelope.
    assert_eq!(records[0].epoch, Some(0));

    let history: Vec<GrantEvent> = log
        .read_stream("resource_grant", aggregate_id)
        .await
        .unwrap()
        .into_iter()
        .map(|row| {
            GrantEvent::try_from(decode_from_record(&registry, &row.record).unwrap()).unwrap()
        })
        .collect();
    let reloaded = ResourceGrant::load_from_history(history).unwrap();

    assert_eq!(reloaded.status(), grant.status());
    assert_eq!(reloaded.revoked_at(), grant.revoked_at());
    assert!(!grant_is_current(&scope, &reloaded));
}

#[test]
fn cross_aggregate_events_are_rejected_on_conversion() {
    let owner = UserId::new();
    let scope = Scope::create(ScopeId::new(AggregateId::new()), owner, ts(0)).unwrap();
    let event = KeyringEvent::from(scope.uncommitted_events()[0].clone());

    let err = GrantEvent::try_from(event).unwrap_err();
    assert!(matches!(
        err,
        chronicle_core::DomainError::InvalidEventForAggregate { .. }
    ));
}
