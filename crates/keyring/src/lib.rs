//! Sharing/keyring domain: scopes and resource grants.
//!
//! A `Scope` is the cryptographic membership boundary under which resource
//! keys are wrapped; its epoch counter advances on rotation and invalidates
//! grants minted under older epochs. A `ResourceGrant` binds one wrapped
//! resource key to a scope at a specific epoch. Pure domain logic: no IO,
//! no storage, no crypto — wrapped keys are opaque bytes.

pub mod grant;
pub mod scope;
pub mod specs;
pub mod wire;

pub use grant::{GrantId, GrantStatus, ResourceGrant, ResourceId};
pub use grant::{GrantEvent, ResourceGranted, ResourceRevoked};
pub use scope::{Membership, Scope, ScopeId, ScopeRole};
pub use scope::{ScopeCreated, ScopeEpochRotated, ScopeEvent, ScopeMemberAdded, ScopeMemberRemoved};
pub use specs::{grant_is_current, keyring_spec_registry, KeyringEvent};
pub use wire::{decode_from_record, encode_to_record, encode_uncommitted};
