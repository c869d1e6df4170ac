//! Sync error model.

use thiserror::Error;

use chronicle_core::ErrorCode;
use chronicle_store::StoreError;

use crate::types::SyncConflict;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Malformed request (bad store id, empty batch, zero limit).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The push was refused with a typed conflict.
    #[error("sync conflict: {0:?}")]
    Conflict(SyncConflict),

    /// Local store failure while collecting or integrating events.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The rebase retry budget ran out; the conflict is persistent.
    #[error("rebase budget exhausted after {attempts} attempts (server head {server_head})")]
    RebaseExhausted { attempts: u32, server_head: u64 },

    /// Server-side storage failure.
    #[error("sync backend unhealthy: {0}")]
    Backend(String),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Validation(_) => ErrorCode::Validation,
            SyncError::Conflict(SyncConflict::ServerAhead { .. }) => ErrorCode::ServerAheadConflict,
            SyncError::Conflict(SyncConflict::DuplicateEventId { .. }) => {
                ErrorCode::DuplicateEventIdConflict
            }
            // A client claiming a head the server never assigned, or an
            // unreadable record, is bad input rather than a race.
            SyncError::Conflict(SyncConflict::ClientAhead { .. })
            | SyncError::Conflict(SyncConflict::InvalidRecord { .. }) => ErrorCode::Validation,
            SyncError::RebaseExhausted { .. } => ErrorCode::ServerAheadConflict,
            SyncError::Store(e) => e.code(),
            SyncError::Backend(_) => ErrorCode::DbInvalidState,
        }
    }
}

pub(crate) fn map_sqlx_error(op: &str, e: sqlx::Error) -> SyncError {
    SyncError::Backend(format!("{op}: {e}"))
}
