//! ResourceGrant aggregate: a wrapped resource key bound to a scope epoch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chronicle_core::{
    AggregateId, AggregateRoot, DomainError, RecordedEvents, SnapshotEnvelope, UserId,
};
use chronicle_events::Event;

use crate::scope::ScopeId;

/// Aggregate type tag for resource grants.
pub const GRANT_AGGREGATE_TYPE: &str = "resource_grant";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantId(pub AggregateId);

impl GrantId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn as_aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for GrantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub AggregateId);

impl ResourceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Active,
    Revoked,
}

/// Event: grant minted under a scope epoch with a wrapped resource key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGranted {
    pub grant_id: GrantId,
    pub scope_id: ScopeId,
    pub resource_id: ResourceId,
    pub scope_epoch: u64,
    pub resource_key_id: String,
    pub wrapped_key: Vec<u8>,
    pub granted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: grant torn down. Terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRevoked {
    pub grant_id: GrantId,
    pub reason: Option<String>,
    pub revoked_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantEvent {
    Granted(ResourceGranted),
    Revoked(ResourceRevoked),
}

impl Event for GrantEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GrantEvent::Granted(_) => "keyring.grant.granted",
            GrantEvent::Revoked(_) => "keyring.grant.revoked",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GrantEvent::Granted(e) => e.occurred_at,
            GrantEvent::Revoked(e) => e.occurred_at,
        }
    }
}

/// Serialized projected state, as captured into snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantState {
    pub scope_id: ScopeId,
    pub resource_id: ResourceId,
    pub scope_epoch: u64,
    pub resource_key_id: String,
    pub wrapped_key: Vec<u8>,
    pub status: GrantStatus,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    pub revoked_by: Option<UserId>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
}

/// Aggregate root: ResourceGrant.
///
/// `wrapped_key` and `resource_key_id` are non-empty from creation on;
/// `revoke` is valid only from `active` and `revoked` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGrant {
    id: GrantId,
    scope_id: ScopeId,
    resource_id: ResourceId,
    scope_epoch: u64,
    resource_key_id: String,
    wrapped_key: Vec<u8>,
    status: GrantStatus,
    granted_by: UserId,
    granted_at: DateTime<Utc>,
    revoked_by: Option<UserId>,
    revoked_at: Option<DateTime<Utc>>,
    revoke_reason: Option<String>,
    recorded: RecordedEvents<GrantEvent>,
}

impl AggregateRoot for ResourceGrant {
    type Id = GrantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.recorded.version()
    }
}

impl ResourceGrant {
    /// Mint a grant under the given scope epoch.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        grant_id: GrantId,
        scope_id: ScopeId,
        resource_id: ResourceId,
        scope_epoch: u64,
        resource_key_id: String,
        wrapped_key: Vec<u8>,
        granted_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if resource_key_id.is_empty() {
            return Err(DomainError::validation("resource_key_id must be non-empty"));
        }
        if wrapped_key.is_empty() {
            return Err(DomainError::validation("wrapped_key must be non-empty"));
        }

        let mut grant = Self {
            id: grant_id,
            scope_id,
            resource_id,
            scope_epoch,
            resource_key_id: String::new(),
            wrapped_key: Vec::new(),
            status: GrantStatus::Active,
            granted_by,
            granted_at: now,
            revoked_by: None,
            revoked_at: None,
            revoke_reason: None,
            recorded: RecordedEvents::new(),
        };

        grant.apply(GrantEvent::Granted(ResourceGranted {
            grant_id,
            scope_id,
            resource_id,
            scope_epoch,
            resource_key_id,
            wrapped_key,
            granted_by,
            occurred_at: now,
        }));

        Ok(grant)
    }

    /// Rehydrate from the full event stream.
    pub fn load_from_history(
        events: impl IntoIterator<Item = GrantEvent>,
    ) -> Result<Self, DomainError> {
        let mut events = events.into_iter();
        let first = events
            .next()
            .ok_or_else(|| DomainError::validation("empty grant event stream"))?;

        let granted = match &first {
            GrantEvent::Granted(e) => e.clone(),
            other => {
                return Err(DomainError::InvalidEventForAggregate {
                    aggregate_type: GRANT_AGGREGATE_TYPE,
                    event_type: other.event_type().to_string(),
                })
            }
        };

        let mut grant = Self {
            id: granted.grant_id,
            scope_id: granted.scope_id,
            resource_id: granted.resource_id,
            scope_epoch: granted.scope_epoch,
            resource_key_id: String::new(),
            wrapped_key: Vec::new(),
            status: GrantStatus::Active,
            granted_by: granted.granted_by,
            granted_at: granted.occurred_at,
            revoked_by: None,
            revoked_at: None,
            revoke_reason: None,
            recorded: RecordedEvents::new(),
        };
        grant.replay(&first);
        for event in events {
            grant.replay(&event);
        }
        Ok(grant)
    }

    /// Capture the projected state for the `snapshots` table.
    pub fn snapshot(&self, last_global_seq: Option<u64>) -> SnapshotEnvelope {
        let state = GrantState {
            scope_id: self.scope_id,
            resource_id: self.resource_id,
            scope_epoch: self.scope_epoch,
            resource_key_id: self.resource_key_id.clone(),
            wrapped_key: self.wrapped_key.clone(),
            status: self.status,
            granted_by: self.granted_by,
            granted_at: self.granted_at,
            revoked_by: self.revoked_by,
            revoked_at: self.revoked_at,
            revoke_reason: self.revoke_reason.clone(),
        };
        SnapshotEnvelope::new(
            self.id.as_aggregate_id(),
            GRANT_AGGREGATE_TYPE,
            self.recorded.version(),
            last_global_seq,
            serde_json::to_value(state).expect("grant state serialization is infallible"),
        )
    }

    /// Restore from a snapshot, then replay the tail events after it.
    pub fn reconstitute_from_snapshot(
        snapshot: &SnapshotEnvelope,
        tail: impl IntoIterator<Item = GrantEvent>,
    ) -> Result<Self, DomainError> {
        snapshot.expect_aggregate_type(GRANT_AGGREGATE_TYPE)?;
        let state: GrantState = snapshot.state_as()?;

        let mut recorded = RecordedEvents::new();
        recorded.restore_version(snapshot.version);

        let mut grant = Self {
            id: GrantId::new(snapshot.aggregate_id),
            scope_id: state.scope_id,
            resource_id: state.resource_id,
            scope_epoch: state.scope_epoch,
            resource_key_id: state.resource_key_id,
            wrapped_key: state.wrapped_key,
            status: state.status,
            granted_by: state.granted_by,
            granted_at: state.granted_at,
            revoked_by: state.revoked_by,
            revoked_at: state.revoked_at,
            revoke_reason: state.revoke_reason,
            recorded,
        };
        for event in tail {
            grant.replay(&event);
        }
        Ok(grant)
    }

    // -- commands ----------------------------------------------------------

    /// Tear the grant down. Valid only while `active`; revoked is terminal.
    pub fn revoke(
        &mut self,
        revoked_by: UserId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status == GrantStatus::Revoked {
            return Err(DomainError::conflict("grant is already revoked"));
        }

        self.apply(GrantEvent::Revoked(ResourceRevoked {
            grant_id: self.id,
            reason,
            revoked_by,
            occurred_at: now,
        }));
        Ok(())
    }

    // -- event application -------------------------------------------------

    fn apply(&mut self, event: GrantEvent) {
        self.on_event(&event);
        self.recorded.record(event);
    }

    fn replay(&mut self, event: &GrantEvent) {
        self.on_event(event);
        self.recorded.replay();
    }

    fn on_event(&mut self, event: &GrantEvent) {
        match event {
            GrantEvent::Granted(e) => {
                self.id = e.grant_id;
                self.scope_id = e.scope_id;
                self.resource_id = e.resource_id;
                self.scope_epoch = e.scope_epoch;
                self.resource_key_id = e.resource_key_id.clone();
                self.wrapped_key = e.wrapped_key.clone();
                self.status = GrantStatus::Active;
                self.granted_by = e.granted_by;
                self.granted_at = e.occurred_at;
            }
            GrantEvent::Revoked(e) => {
                self.status = GrantStatus::Revoked;
                self.revoked_by = Some(e.revoked_by);
                self.revoked_at = Some(e.occurred_at);
                self.revoke_reason = e.reason.clone();
            }
        }
    }

    // -- accessors ---------------------------------------------------------

    pub fn id_typed(&self) -> GrantId {
        self.id
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn scope_epoch(&self) -> u64 {
        self.scope_epoch
    }

    pub fn resource_key_id(&self) -> &str {
        &self.resource_key_id
    }

    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }

    pub fn status(&self) -> GrantStatus {
        self.status
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn revoked_by(&self) -> Option<UserId> {
        self.revoked_by
    }

    pub fn uncommitted_events(&self) -> &[GrantEvent] {
        self.recorded.uncommitted()
    }

    pub fn take_uncommitted_events(&mut self) -> Vec<GrantEvent> {
        self.recorded.take_uncommitted()
    }

    pub fn mark_events_as_committed(&mut self) {
        self.recorded.mark_committed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn new_grant() -> ResourceGrant {
        ResourceGrant::create(
            GrantId::new(AggregateId::new()),
            ScopeId::new(AggregateId::new()),
            ResourceId::new(AggregateId::new()),
            3,
            "rk-1".to_string(),
            vec![1, 2, 3, 4],
            UserId::new(),
            now(),
        )
        .unwrap()
    }

    #[test]
    fn create_emits_granted_and_sets_state() {
        let grant = new_grant();
        assert_eq!(grant.version(), 1);
        assert_eq!(grant.status(), GrantStatus::Active);
        assert_eq!(grant.scope_epoch(), 3);
        assert_eq!(grant.wrapped_key(), &[1, 2, 3, 4]);
        assert_eq!(grant.uncommitted_events().len(), 1);
    }

    #[test]
    fn empty_wrapped_key_is_rejected() {
        let err = ResourceGrant::create(
            GrantId::new(AggregateId::new()),
            ScopeId::new(AggregateId::new()),
            ResourceId::new(AggregateId::new()),
            0,
            "rk-1".to_string(),
            vec![],
            UserId::new(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn empty_resource_key_id_is_rejected() {
        let err = ResourceGrant::create(
            GrantId::new(AggregateId::new()),
            ScopeId::new(AggregateId::new()),
            ResourceId::new(AggregateId::new()),
            0,
            String::new(),
            vec![1],
            UserId::new(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn revoke_is_terminal() {
        let mut grant = new_grant();
        let revoker = UserId::new();

        grant
            .revoke(revoker, Some("archived".to_string()), now())
            .unwrap();
        assert_eq!(grant.status(), GrantStatus::Revoked);
        let first_revoked_at = grant.revoked_at().unwrap();

        // A second revoke fails and leaves revoked_at untouched.
        let err = grant
            .revoke(UserId::new(), Some("again".to_string()), now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(grant.status(), GrantStatus::Revoked);
        assert_eq!(grant.revoked_at().unwrap(), first_revoked_at);
        assert_eq!(grant.revoked_by().unwrap(), revoker);
        assert_eq!(grant.version(), 2);
    }

    #[test]
    fn replay_equals_live_application() {
        let mut grant = new_grant();
        grant.revoke(UserId::new(), None, now()).unwrap();

        let history = grant.take_uncommitted_events();
        let replayed = ResourceGrant::load_from_history(history).unwrap();

        assert_eq!(replayed.status(), GrantStatus::Revoked);
        assert_eq!(replayed.version(), grant.version());
        assert_eq!(replayed.revoked_at(), grant.revoked_at());
    }

    #[test]
    fn snapshot_plus_tail_equals_full_replay() {
        let mut grant = new_grant();
        grant.revoke(UserId::new(), Some("rotated".to_string()), now()).unwrap();
        let history = grant.take_uncommitted_events();

        let prefix = ResourceGrant::load_from_history(history[..1].to_vec()).unwrap();
        let snapshot = prefix.snapshot(None);
        let resumed =
            ResourceGrant::reconstitute_from_snapshot(&snapshot, history[1..].to_vec()).unwrap();

        let full = ResourceGrant::load_from_history(history).unwrap();
        assert_eq!(resumed.status(), full.status());
        assert_eq!(resumed.version(), full.version());
        assert_eq!(resumed.revoked_at(), full.revoked_at());
    }

    #[test]
    fn history_not_starting_with_granted_is_rejected() {
        let err = ResourceGrant::load_from_history([GrantEvent::Revoked(ResourceRevoked {
            grant_id: GrantId::new(AggregateId::new()),
            reason: None,
            revoked_by: UserId::new(),
            occurred_at: now(),
        })])
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidEventForAggregate { .. }));
    }
}
