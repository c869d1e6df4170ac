//! Strongly-typed identifiers used across the platform.
//!
//! Identifier kinds are pinned to a UUID version: store and user identifiers
//! are random (v4), aggregate and event identifiers are time-ordered (v7).
//! Parsing checks the version nibble, so a v7 string can never cross the sync
//! boundary where a v4 store identifier is expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a per-user event log (the sync store). UUID v4.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(Uuid);

/// Identifier of a user / actor. UUID v4.
///
/// A per-user store is keyed by its owner, so `store_id` and the owning
/// `user_id` carry the same value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of an aggregate root. UUID v7 (time-ordered).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

/// Identifier of a single event. UUID v7 (time-ordered).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal, $version:literal, $generate:expr) => {
        impl $t {
            /// Create a new identifier of the pinned UUID version.
            ///
            /// Prefer passing IDs explicitly in tests for determinism.
            pub fn new() -> Self {
                Self($generate)
            }

            /// Wrap an existing UUID without a version check.
            ///
            /// For internal plumbing only; boundary input goes through
            /// `FromStr`/[`Self::parse`].
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse from canonical string form, rejecting any UUID whose
            /// version nibble is not the pinned one.
            pub fn parse(s: &str) -> Result<Self, DomainError> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::validation(format!("{}: {}", $name, e)))?;
                if uuid.get_version_num() != $version {
                    return Err(DomainError::validation(format!(
                        "{}: expected UUID v{}, got v{}",
                        $name,
                        $version,
                        uuid.get_version_num()
                    )));
                }
                Ok(Self(uuid))
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

impl_uuid_newtype!(StoreId, "StoreId", 4, Uuid::new_v4());
impl_uuid_newtype!(UserId, "UserId", 4, Uuid::new_v4());
impl_uuid_newtype!(AggregateId, "AggregateId", 7, Uuid::now_v7());
impl_uuid_newtype!(EventId, "EventId", 7, Uuid::now_v7());

impl From<UserId> for StoreId {
    fn from(value: UserId) -> Self {
        StoreId(value.0)
    }
}

impl From<StoreId> for UserId {
    fn from(value: StoreId) -> Self {
        UserId(value.0)
    }
}
