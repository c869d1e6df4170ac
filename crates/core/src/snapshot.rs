//! Snapshot envelope: serialized aggregate state plus replay coordinates.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DomainError;
use crate::id::AggregateId;

/// A point-in-time capture of an aggregate's projected state.
///
/// Matches one row of the `snapshots` table: the serialized state, the
/// version it was taken at, and the last server-assigned global sequence the
/// snapshotting client had integrated (used to bound projection catch-up).
///
/// Reconstitution contract: restoring from a snapshot and replaying the tail
/// `events[version..]` must yield the same state as replaying the full
/// stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Aggregate version at capture time (number of events folded in).
    pub version: u64,

    /// High-water mark of integrated global sequences at capture time.
    pub last_global_seq: Option<u64>,

    pub state: JsonValue,
}

impl SnapshotEnvelope {
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: u64,
        last_global_seq: Option<u64>,
        state: JsonValue,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            last_global_seq,
            state,
        }
    }

    /// Deserialize the captured state into a typed value.
    pub fn state_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_value(self.state.clone())
            .map_err(|e| DomainError::validation(format!("snapshot state: {e}")))
    }

    /// Guard against hydrating a snapshot into the wrong aggregate kind.
    pub fn expect_aggregate_type(&self, aggregate_type: &str) -> Result<(), DomainError> {
        if self.aggregate_type != aggregate_type {
            return Err(DomainError::validation(format!(
                "snapshot is for aggregate_type '{}', expected '{}'",
                self.aggregate_type, aggregate_type
            )));
        }
        Ok(())
    }
}
