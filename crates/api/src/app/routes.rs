//! Sync endpoint handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use chronicle_sync::{PushEvent, PushOutcome, SyncBackend};

use crate::app::dto::{authorized_store_id, PullQuery, PushRequest, ResetRequest};
use crate::app::errors::{conflict_response, json_error, sync_error_to_response};
use crate::context::ActorContext;

pub async fn push(
    Extension(backend): Extension<Arc<SyncBackend>>,
    Extension(actor): Extension<ActorContext>,
    Json(request): Json<PushRequest>,
) -> axum::response::Response {
    let store_id = match authorized_store_id(&request.store_id, &actor) {
        Ok(store_id) => store_id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e.code(), e.to_string()),
    };

    let events: Vec<PushEvent> = request.events.into_iter().map(Into::into).collect();
    match backend.push(store_id, request.expected_head, &events).await {
        Ok(PushOutcome::Accepted {
            assigned_range: (first, last),
        }) => (
            StatusCode::CREATED,
            Json(json!({ "assignedRange": [first, last] })),
        )
            .into_response(),
        Ok(PushOutcome::Conflict(conflict)) => conflict_response(&conflict),
        Err(e) => sync_error_to_response(e),
    }
}

pub async fn pull(
    Extension(backend): Extension<Arc<SyncBackend>>,
    Extension(actor): Extension<ActorContext>,
    Query(query): Query<PullQuery>,
) -> axum::response::Response {
    let store_id = match authorized_store_id(&query.store_id, &actor) {
        Ok(store_id) => store_id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e.code(), e.to_string()),
    };

    match backend.pull(store_id, query.since, query.limit).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => sync_error_to_response(e),
    }
}

pub async fn reset(
    Extension(backend): Extension<Arc<SyncBackend>>,
    Extension(actor): Extension<ActorContext>,
    Json(request): Json<ResetRequest>,
) -> axum::response::Response {
    let store_id = match authorized_store_id(&request.store_id, &actor) {
        Ok(store_id) => store_id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e.code(), e.to_string()),
    };

    match backend.reset(store_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({}))).into_response(),
        Err(e) => sync_error_to_response(e),
    }
}

pub async fn healthz() -> axum::response::Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}
