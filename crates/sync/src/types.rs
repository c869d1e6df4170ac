//! Wire types of the push/pull exchange.

use serde::{Deserialize, Serialize};

/// One event in a push: the opaque record plus optional sharing references
/// the server may index for keyring distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub event_id: String,
    pub record_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<String>,
    /// Hex digest of the scope state the pusher saw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_state_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_device_id: Option<String>,
}

impl PushEvent {
    pub fn new(event_id: impl Into<String>, record_json: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            record_json: record_json.into(),
            scope_id: None,
            resource_id: None,
            resource_key_id: None,
            grant_id: None,
            scope_state_ref: None,
            author_device_id: None,
        }
    }
}

/// Push result: a contiguous assigned range, or a typed conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted { assigned_range: (u64, u64) },
    Conflict(SyncConflict),
}

/// Conflict classification. `server_ahead` carries the server's current head
/// so the client can compute `since` without a second round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SyncConflict {
    ServerAhead { head: u64 },
    ClientAhead { head: u64 },
    DuplicateEventId { event_id: String },
    InvalidRecord { detail: String },
}

/// One event of a pulled page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulledEvent {
    pub global_sequence: u64,
    pub event_id: String,
    pub record_json: String,
}

/// A page of the store's log in ascending global-sequence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPage {
    pub events: Vec<PulledEvent>,
    /// Server head at read time.
    pub head: u64,
    pub has_more: bool,
    /// Last returned global sequence when `has_more`, else `None`.
    pub next_since: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conflict_reasons_use_snake_case_tags() {
        let value = serde_json::to_value(SyncConflict::ServerAhead { head: 4 }).unwrap();
        assert_eq!(value, json!({"reason": "server_ahead", "head": 4}));

        let value =
            serde_json::to_value(SyncConflict::DuplicateEventId { event_id: "a".into() }).unwrap();
        assert_eq!(value["reason"], json!("duplicate_event_id"));
    }

    #[test]
    fn push_event_omits_absent_sharing_refs() {
        let value = serde_json::to_value(PushEvent::new("a", "{}")).unwrap();
        assert_eq!(value, json!({"eventId": "a", "recordJson": "{}"}));
    }
}
