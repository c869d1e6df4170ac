//! Scope aggregate: membership and the rotation epoch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chronicle_core::{
    AggregateId, AggregateRoot, DomainError, RecordedEvents, SnapshotEnvelope, UserId,
};
use chronicle_events::Event;

/// Aggregate type tag for scopes.
pub const SCOPE_AGGREGATE_TYPE: &str = "scope";

/// Scope identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub AggregateId);

impl ScopeId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn as_aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Role of a scope member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeRole {
    Owner,
    Editor,
    Viewer,
}

impl ScopeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeRole::Owner => "owner",
            ScopeRole::Editor => "editor",
            ScopeRole::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "owner" => Ok(ScopeRole::Owner),
            "editor" => Ok(ScopeRole::Editor),
            "viewer" => Ok(ScopeRole::Viewer),
            other => Err(DomainError::validation(format!("unknown scope role '{other}'"))),
        }
    }
}

/// One membership entry. Removal never deletes the entry, it only sets
/// `removed_at`; re-adding the user starts a fresh active entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub role: ScopeRole,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }
}

/// Event: scope created (owner fixed, epoch starts at 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCreated {
    pub scope_id: ScopeId,
    pub owner_user_id: UserId,
    pub epoch: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: member added with a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeMemberAdded {
    pub scope_id: ScopeId,
    pub user_id: UserId,
    pub role: ScopeRole,
    pub occurred_at: DateTime<Utc>,
}

/// Event: membership ended (entry kept, `removed_at` set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeMemberRemoved {
    pub scope_id: ScopeId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: epoch advanced by one; grants minted under older epochs become
/// logically invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEpochRotated {
    pub scope_id: ScopeId,
    pub prior_epoch: u64,
    pub epoch: u64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeEvent {
    Created(ScopeCreated),
    MemberAdded(ScopeMemberAdded),
    MemberRemoved(ScopeMemberRemoved),
    EpochRotated(ScopeEpochRotated),
}

impl Event for ScopeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ScopeEvent::Created(_) => "keyring.scope.created",
            ScopeEvent::MemberAdded(_) => "keyring.scope.member_added",
            ScopeEvent::MemberRemoved(_) => "keyring.scope.member_removed",
            ScopeEvent::EpochRotated(_) => "keyring.scope.epoch_rotated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ScopeEvent::Created(e) => e.occurred_at,
            ScopeEvent::MemberAdded(e) => e.occurred_at,
            ScopeEvent::MemberRemoved(e) => e.occurred_at,
            ScopeEvent::EpochRotated(e) => e.occurred_at,
        }
    }
}

/// Serialized projected state, as captured into snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeState {
    pub owner_user_id: UserId,
    pub epoch: u64,
    pub members: HashMap<UserId, Membership>,
}

/// Aggregate root: Scope.
///
/// Invariants: the owner is always an active member with role `owner` and
/// can never be removed; a user has at most one active membership; the epoch
/// only moves forward, one step per rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    id: ScopeId,
    owner_user_id: UserId,
    epoch: u64,
    members: HashMap<UserId, Membership>,
    recorded: RecordedEvents<ScopeEvent>,
}

impl AggregateRoot for Scope {
    type Id = ScopeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.recorded.version()
    }
}

impl Scope {
    /// Create a new scope. Emits `ScopeCreated` immediately followed by
    /// `ScopeMemberAdded` for the owner.
    pub fn create(
        scope_id: ScopeId,
        owner_user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let mut scope = Self {
            id: scope_id,
            owner_user_id,
            epoch: 0,
            members: HashMap::new(),
            recorded: RecordedEvents::new(),
        };

        scope.apply(ScopeEvent::Created(ScopeCreated {
            scope_id,
            owner_user_id,
            epoch: 0,
            occurred_at: now,
        }));
        scope.apply(ScopeEvent::MemberAdded(ScopeMemberAdded {
            scope_id,
            user_id: owner_user_id,
            role: ScopeRole::Owner,
            occurred_at: now,
        }));

        Ok(scope)
    }

    /// Rehydrate from the full event stream.
    pub fn load_from_history(
        events: impl IntoIterator<Item = ScopeEvent>,
    ) -> Result<Self, DomainError> {
        let mut events = events.into_iter();
        let first = events
            .next()
            .ok_or_else(|| DomainError::validation("empty scope event stream"))?;

        let created = match &first {
            ScopeEvent::Created(e) => e.clone(),
            other => {
                return Err(DomainError::InvalidEventForAggregate {
                    aggregate_type: SCOPE_AGGREGATE_TYPE,
                    event_type: other.event_type().to_string(),
                })
            }
        };

        let mut scope = Self {
            id: created.scope_id,
            owner_user_id: created.owner_user_id,
            epoch: created.epoch,
            members: HashMap::new(),
            recorded: RecordedEvents::new(),
        };
        scope.replay(&first);
        for event in events {
            scope.replay(&event);
        }
        Ok(scope)
    }

    /// Capture the projected state for the `snapshots` table.
    pub fn snapshot(&self, last_global_seq: Option<u64>) -> SnapshotEnvelope {
        let state = ScopeState {
            owner_user_id: self.owner_user_id,
            epoch: self.epoch,
            members: self.members.clone(),
        };
        SnapshotEnvelope::new(
            self.id.as_aggregate_id(),
            SCOPE_AGGREGATE_TYPE,
            self.recorded.version(),
            last_global_seq,
            serde_json::to_value(state).expect("scope state serialization is infallible"),
        )
    }

    /// Restore from a snapshot, then replay the tail events after it.
    pub fn reconstitute_from_snapshot(
        snapshot: &SnapshotEnvelope,
        tail: impl IntoIterator<Item = ScopeEvent>,
    ) -> Result<Self, DomainError> {
        snapshot.expect_aggregate_type(SCOPE_AGGREGATE_TYPE)?;
        let state: ScopeState = snapshot.state_as()?;

        let mut recorded = RecordedEvents::new();
        recorded.restore_version(snapshot.version);

        let mut scope = Self {
            id: ScopeId::new(snapshot.aggregate_id),
            owner_user_id: state.owner_user_id,
            epoch: state.epoch,
            members: state.members,
            recorded,
        };
        for event in tail {
            scope.replay(&event);
        }
        Ok(scope)
    }

    // -- commands ----------------------------------------------------------

    /// Add a member. The `owner` role is fixed at creation and cannot be
    /// granted again.
    pub fn add_member(
        &mut self,
        user_id: UserId,
        role: ScopeRole,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if role == ScopeRole::Owner {
            return Err(DomainError::invariant(
                "the owner role is assigned at creation only",
            ));
        }
        if self.is_active_member(user_id) {
            return Err(DomainError::conflict("user already has an active membership"));
        }

        self.apply(ScopeEvent::MemberAdded(ScopeMemberAdded {
            scope_id: self.id,
            user_id,
            role,
            occurred_at: now,
        }));
        Ok(())
    }

    /// End a membership. The owner is immovable.
    pub fn remove_member(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if user_id == self.owner_user_id {
            return Err(DomainError::invariant("the scope owner cannot be removed"));
        }
        if !self.is_active_member(user_id) {
            return Err(DomainError::not_found());
        }

        self.apply(ScopeEvent::MemberRemoved(ScopeMemberRemoved {
            scope_id: self.id,
            user_id,
            occurred_at: now,
        }));
        Ok(())
    }

    /// Advance the epoch by one. Grants minted under prior epochs become
    /// logically invalid for consumers; no cascading revoke events are
    /// emitted.
    pub fn rotate_epoch(
        &mut self,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let prior_epoch = self.epoch;
        let epoch = prior_epoch
            .checked_add(1)
            .ok_or_else(|| DomainError::invariant("scope epoch overflow"))?;

        self.apply(ScopeEvent::EpochRotated(ScopeEpochRotated {
            scope_id: self.id,
            prior_epoch,
            epoch,
            reason,
            occurred_at: now,
        }));
        Ok(())
    }

    // -- event application -------------------------------------------------

    fn apply(&mut self, event: ScopeEvent) {
        self.on_event(&event);
        self.recorded.record(event);
    }

    fn replay(&mut self, event: &ScopeEvent) {
        self.on_event(event);
        self.recorded.replay();
    }

    fn on_event(&mut self, event: &ScopeEvent) {
        match event {
            ScopeEvent::Created(e) => {
                self.id = e.scope_id;
                self.owner_user_id = e.owner_user_id;
                self.epoch = e.epoch;
            }
            ScopeEvent::MemberAdded(e) => {
                self.members.insert(
                    e.user_id,
                    Membership {
                        role: e.role,
                        added_at: e.occurred_at,
                        removed_at: None,
                    },
                );
            }
            ScopeEvent::MemberRemoved(e) => {
                if let Some(member) = self.members.get_mut(&e.user_id) {
                    member.removed_at = Some(e.occurred_at);
                }
            }
            ScopeEvent::EpochRotated(e) => {
                self.epoch = e.epoch;
            }
        }
    }

    // -- accessors ---------------------------------------------------------

    pub fn id_typed(&self) -> ScopeId {
        self.id
    }

    pub fn owner_user_id(&self) -> UserId {
        self.owner_user_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn members(&self) -> &HashMap<UserId, Membership> {
        &self.members
    }

    pub fn is_active_member(&self, user_id: UserId) -> bool {
        self.members
            .get(&user_id)
            .map(Membership::is_active)
            .unwrap_or(false)
    }

    pub fn active_members(&self) -> impl Iterator<Item = (UserId, &Membership)> + '_ {
        self.members
            .iter()
            .filter(|(_, m)| m.is_active())
            .map(|(id, m)| (*id, m))
    }

    pub fn uncommitted_events(&self) -> &[ScopeEvent] {
        self.recorded.uncommitted()
    }

    pub fn take_uncommitted_events(&mut self) -> Vec<ScopeEvent> {
        self.recorded.take_uncommitted()
    }

    pub fn mark_events_as_committed(&mut self) {
        self.recorded.mark_committed();
    }
}
