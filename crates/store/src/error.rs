//! Store error model, mapped onto the cross-boundary error-code taxonomy.

use thiserror::Error;

use chronicle_core::{DomainError, ErrorCode};

/// Errors surfaced by the local log store and the owner protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Input shape/semantic violation (bad UUID, malformed parameter).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Aggregate-level failure propagated through the store boundary.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Underlying storage contention; safe to retry.
    #[error("database is locked: {0}")]
    DbLocked(String),

    /// Uniqueness or check constraint failed; not automatically retryable.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A batch rolled back; none of its statements took effect.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Schema version marker is neither current nor bootstrappable.
    #[error("schema migration failed: {0}")]
    Migration(String),

    /// A second hello disagreed with the first, the lease is already held,
    /// or a non-owner attempted to write.
    #[error("ownership violation: {0}")]
    DbOwnership(String),

    /// Required host capability missing or storage unhealthy. Callers should
    /// suggest resetting local state and restoring from backup.
    #[error("database in invalid state: {0}")]
    DbInvalidState(String),

    /// Malformed protocol envelope or unknown request kind.
    #[error("owner protocol violation: {0}")]
    WorkerProtocol(String),

    /// The request was cancelled before it started executing.
    #[error("request cancelled before execution")]
    Canceled,
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::Validation(_) => ErrorCode::Validation,
            StoreError::Domain(e) => e.code(),
            StoreError::DbLocked(_) => ErrorCode::DbLocked,
            StoreError::ConstraintViolation(_) => ErrorCode::ConstraintViolation,
            StoreError::TransactionAborted(_) => ErrorCode::TransactionAborted,
            StoreError::Migration(_) => ErrorCode::Migration,
            StoreError::DbOwnership(_) => ErrorCode::DbOwnership,
            StoreError::DbInvalidState(_) => ErrorCode::DbInvalidState,
            StoreError::WorkerProtocol(_) => ErrorCode::WorkerProtocol,
            StoreError::Canceled => ErrorCode::Canceled,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::DbInvalidState(msg.into())
    }

    pub fn ownership(msg: impl Into<String>) -> Self {
        Self::DbOwnership(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::WorkerProtocol(msg.into())
    }
}

/// Map a sqlx error to the store taxonomy.
///
/// SQLite reports contention as `SQLITE_BUSY`/`SQLITE_LOCKED`; both are
/// retryable. Unique/check/foreign-key failures map to
/// `ConstraintViolationError`. Anything else means the storage layer itself
/// is unhealthy.
pub(crate) fn map_sqlx_error(op: &str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() || db.is_check_violation() || db.is_foreign_key_violation()
            {
                return StoreError::ConstraintViolation(format!("{op}: {}", db.message()));
            }
            let message = db.message();
            if message.contains("locked") || message.contains("busy") {
                return StoreError::DbLocked(format!("{op}: {message}"));
            }
            StoreError::DbInvalidState(format!("{op}: {message}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::DbInvalidState(format!("{op}: connection pool is closed"))
        }
        other => StoreError::DbInvalidState(format!("{op}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_taxonomy() {
        assert_eq!(
            StoreError::DbLocked("x".into()).code(),
            ErrorCode::DbLocked
        );
        assert_eq!(
            StoreError::TransactionAborted("x".into()).code(),
            ErrorCode::TransactionAborted
        );
        assert_eq!(StoreError::Canceled.code(), ErrorCode::Canceled);
        assert_eq!(
            StoreError::Domain(DomainError::validation("bad")).code(),
            ErrorCode::Validation
        );
        assert_eq!(
            StoreError::Domain(DomainError::Archived).code(),
            ErrorCode::Domain
        );
    }

    #[test]
    fn only_locked_is_retryable() {
        assert!(StoreError::DbLocked("x".into()).code().is_retryable());
        assert!(!StoreError::ConstraintViolation("x".into())
            .code()
            .is_retryable());
    }
}
