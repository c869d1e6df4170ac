//! Typed message envelopes of the owner arbitration protocol.
//!
//! Wire form is JSON; every client envelope carries the protocol version
//! field `v`, which MUST be 1. Unknown kinds and wrong versions are
//! `WorkerProtocolError`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use chronicle_core::{ErrorCode, StoreId};

use crate::engine::BatchStatement;
use crate::error::StoreError;

/// The only protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// How the write lease is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipMode {
    /// One process hosts the owner and multiplexes many endpoints.
    Shared,
    /// A single endpoint holds an exclusive named lease (fallback).
    Dedicated,
    /// The process owns the database directly; no other arbiters exist.
    InProcess,
}

/// Messages from an arbiter endpoint to the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Hello {
        v: u32,
        store_id: StoreId,
        client_instance_id: Uuid,
        db_name: String,
        require_private_storage: bool,
    },
    #[serde(rename_all = "camelCase")]
    Request {
        v: u32,
        request_id: u64,
        payload: RequestPayload,
    },
    #[serde(rename_all = "camelCase")]
    Cancel {
        v: u32,
        request_id: u64,
        target_request_id: u64,
    },
}

impl ClientMessage {
    pub fn protocol_version(&self) -> u32 {
        match self {
            ClientMessage::Hello { v, .. }
            | ClientMessage::Request { v, .. }
            | ClientMessage::Cancel { v, .. } => *v,
        }
    }

    /// Parse from the JSON wire form. Unknown kinds and malformed envelopes
    /// are protocol errors.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::protocol(format!("envelope: {e}")))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("protocol envelope serialization is infallible")
    }
}

/// The operations an arbiter may ask the owner to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RequestPayload {
    #[serde(rename_all = "camelCase")]
    Query {
        sql: String,
        #[serde(default)]
        params: Vec<JsonValue>,
    },
    #[serde(rename_all = "camelCase")]
    Execute {
        sql: String,
        #[serde(default)]
        params: Vec<JsonValue>,
    },
    #[serde(rename_all = "camelCase")]
    Batch { statements: Vec<BatchStatement> },
    #[serde(rename_all = "camelCase")]
    SubscribeTables {
        subscription_id: String,
        tables: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    UnsubscribeTables { subscription_id: String },
    ExportMain,
    #[serde(rename_all = "camelCase")]
    ImportMain {
        /// Raw database bytes, base64url without padding.
        bytes: String,
    },
    Shutdown,
}

/// Messages from the owner to an arbiter endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    HelloOk {
        protocol_version: u32,
        ownership_mode: OwnershipMode,
        server_instance_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    HelloError { error: ProtocolError },
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: u64,
        payload: ResponsePayload,
    },
    #[serde(rename_all = "camelCase")]
    Notify {
        notify_kind: NotifyKind,
        tables: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotifyKind {
    TablesChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ResponsePayload {
    #[serde(rename_all = "camelCase")]
    Ok { data: JsonValue },
    #[serde(rename_all = "camelCase")]
    Error { error: ProtocolError },
}

/// Error envelope: a taxonomy code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&StoreError> for ProtocolError {
    fn from(value: &StoreError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}

impl ProtocolError {
    /// Rebuild a typed store error on the client side of the boundary.
    pub fn into_store_error(self) -> StoreError {
        match self.code {
            ErrorCode::Validation => StoreError::Validation(self.message),
            ErrorCode::DbLocked => StoreError::DbLocked(self.message),
            ErrorCode::ConstraintViolation => StoreError::ConstraintViolation(self.message),
            ErrorCode::TransactionAborted => StoreError::TransactionAborted(self.message),
            ErrorCode::Migration => StoreError::Migration(self.message),
            ErrorCode::DbOwnership => StoreError::DbOwnership(self.message),
            ErrorCode::DbInvalidState => StoreError::DbInvalidState(self.message),
            ErrorCode::WorkerProtocol => StoreError::WorkerProtocol(self.message),
            ErrorCode::Canceled => StoreError::Canceled,
            // Codes minted by other boundaries (domain, sync, auth) still
            // travel intact; surface them as protocol-level failures.
            other => StoreError::WorkerProtocol(format!("{}: {}", other, self.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hello_wire_shape() {
        let message = ClientMessage::Hello {
            v: 1,
            store_id: StoreId::new(),
            client_instance_id: Uuid::new_v4(),
            db_name: "chronicle.db".to_string(),
            require_private_storage: true,
        };

        let value: JsonValue = serde_json::from_str(&message.to_json()).unwrap();
        assert_eq!(value["kind"], json!("hello"));
        assert_eq!(value["v"], json!(1));
        assert!(value["storeId"].is_string());
        assert_eq!(value["requirePrivateStorage"], json!(true));
    }

    #[test]
    fn request_round_trips_with_payload_union() {
        let message = ClientMessage::Request {
            v: 1,
            request_id: 42,
            payload: RequestPayload::Query {
                sql: "SELECT 1".to_string(),
                params: vec![json!(7)],
            },
        };

        let back = ClientMessage::from_json(&message.to_json()).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn unknown_kind_is_a_protocol_error() {
        let err = ClientMessage::from_json(r#"{"kind":"frobnicate","v":1}"#).unwrap_err();
        assert!(matches!(err, StoreError::WorkerProtocol(_)));
    }

    #[test]
    fn unknown_request_op_is_a_protocol_error() {
        let raw = r#"{"kind":"request","v":1,"requestId":1,"payload":{"op":"vacuum"}}"#;
        assert!(ClientMessage::from_json(raw).is_err());
    }

    #[test]
    fn error_codes_survive_the_boundary() {
        let original = StoreError::DbOwnership("second hello disagrees".to_string());
        let envelope = ProtocolError::from(&original);
        assert_eq!(envelope.code, ErrorCode::DbOwnership);

        let back = envelope.into_store_error();
        assert!(matches!(back, StoreError::DbOwnership(_)));
    }

    #[test]
    fn notify_wire_shape() {
        let message = ServerMessage::Notify {
            notify_kind: NotifyKind::TablesChanged,
            tables: vec!["EVENTS".to_string()],
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["kind"], json!("notify"));
        assert_eq!(value["notifyKind"], json!("tablesChanged"));
        assert_eq!(value["tables"], json!(["EVENTS"]));
    }
}
