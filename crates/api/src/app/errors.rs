//! Error-code → HTTP status mapping and JSON error bodies.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use chronicle_core::ErrorCode;
use chronicle_sync::{SyncConflict, SyncError};

pub fn json_error(
    status: StatusCode,
    code: ErrorCode,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code.as_str(),
            "message": message.into(),
        })),
    )
        .into_response()
}

/// A `409` whose body carries the typed conflict reason. `server_ahead`
/// includes the server's current head so the client can rebase without a
/// second round-trip.
pub fn conflict_response(conflict: &SyncConflict) -> axum::response::Response {
    (
        StatusCode::CONFLICT,
        axum::Json(serde_json::to_value(conflict).expect("conflict serialization is infallible")),
    )
        .into_response()
}

pub fn sync_error_to_response(err: SyncError) -> axum::response::Response {
    match err {
        SyncError::Conflict(conflict) => conflict_response(&conflict),
        SyncError::Validation(message) => {
            json_error(StatusCode::BAD_REQUEST, ErrorCode::Validation, message)
        }
        SyncError::RebaseExhausted { .. } => {
            json_error(StatusCode::CONFLICT, err.code(), err.to_string())
        }
        SyncError::Store(ref store_err) => {
            let status = match store_err.code() {
                ErrorCode::Validation => StatusCode::BAD_REQUEST,
                ErrorCode::DbLocked => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            json_error(status, store_err.code(), err.to_string())
        }
        SyncError::Backend(message) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DbInvalidState,
            message,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_map_to_409() {
        let response = sync_error_to_response(SyncError::Conflict(SyncConflict::ServerAhead {
            head: 3,
        }));
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn validation_maps_to_400() {
        let response = sync_error_to_response(SyncError::validation("bad storeId"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
