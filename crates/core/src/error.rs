//! Domain error model and the cross-boundary error-code taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic domain failures (validation,
/// invariants, lifecycle). Infrastructure concerns belong to the store and
/// sync crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, bad UUID version).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The aggregate is archived; no further command-driven events apply.
    #[error("aggregate is archived")]
    Archived,

    /// A requested entity was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Replay handed the aggregate an event tag it does not accept.
    ///
    /// The event log and the aggregate have drifted; this is a bug, not a
    /// recoverable condition.
    #[error("aggregate '{aggregate_type}' cannot apply event '{event_type}'")]
    InvalidEventForAggregate {
        aggregate_type: &'static str,
        event_type: String,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// The taxonomy code this error surfaces under at a boundary.
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::Validation(_) => ErrorCode::Validation,
            _ => ErrorCode::Domain,
        }
    }
}

/// Stable error codes surfaced across process and trust boundaries.
///
/// The string forms are part of the wire contract: they appear in owner
/// protocol `Response::Error` envelopes and in HTTP error bodies, and must
/// not change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "DomainError")]
    Domain,
    #[serde(rename = "DbLockedError")]
    DbLocked,
    #[serde(rename = "ConstraintViolationError")]
    ConstraintViolation,
    #[serde(rename = "TransactionAbortedError")]
    TransactionAborted,
    #[serde(rename = "MigrationError")]
    Migration,
    #[serde(rename = "DbOwnershipError")]
    DbOwnership,
    #[serde(rename = "DbInvalidStateError")]
    DbInvalidState,
    #[serde(rename = "WorkerProtocolError")]
    WorkerProtocol,
    #[serde(rename = "CanceledError")]
    Canceled,
    #[serde(rename = "ServerAheadConflict")]
    ServerAheadConflict,
    #[serde(rename = "DuplicateEventIdConflict")]
    DuplicateEventIdConflict,
    #[serde(rename = "UnauthenticatedError")]
    Unauthenticated,
    #[serde(rename = "ForbiddenError")]
    Forbidden,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "ValidationError",
            ErrorCode::Domain => "DomainError",
            ErrorCode::DbLocked => "DbLockedError",
            ErrorCode::ConstraintViolation => "ConstraintViolationError",
            ErrorCode::TransactionAborted => "TransactionAbortedError",
            ErrorCode::Migration => "MigrationError",
            ErrorCode::DbOwnership => "DbOwnershipError",
            ErrorCode::DbInvalidState => "DbInvalidStateError",
            ErrorCode::WorkerProtocol => "WorkerProtocolError",
            ErrorCode::Canceled => "CanceledError",
            ErrorCode::ServerAheadConflict => "ServerAheadConflict",
            ErrorCode::DuplicateEventIdConflict => "DuplicateEventIdConflict",
            ErrorCode::Unauthenticated => "UnauthenticatedError",
            ErrorCode::Forbidden => "ForbiddenError",
        }
    }

    /// Whether a caller may retry the failed operation as-is.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::DbLocked)
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_to_their_wire_names() {
        let json = serde_json::to_string(&ErrorCode::ServerAheadConflict).unwrap();
        assert_eq!(json, "\"ServerAheadConflict\"");

        let back: ErrorCode = serde_json::from_str("\"DbOwnershipError\"").unwrap();
        assert_eq!(back, ErrorCode::DbOwnership);
    }

    #[test]
    fn only_db_locked_is_retryable() {
        assert!(ErrorCode::DbLocked.is_retryable());
        assert!(!ErrorCode::ConstraintViolation.is_retryable());
        assert!(!ErrorCode::TransactionAborted.is_retryable());
    }

    #[test]
    fn validation_surfaces_under_its_own_code() {
        assert_eq!(
            DomainError::validation("bad uuid").code(),
            ErrorCode::Validation
        );
        assert_eq!(DomainError::Archived.code(), ErrorCode::Domain);
        assert_eq!(
            DomainError::conflict("stale version").code(),
            ErrorCode::Domain
        );
    }
}
