//! Router wiring.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};

use chronicle_auth::{Hs256TokenValidator, TokenValidator};
use chronicle_sync::SyncBackend;

use crate::middleware::{auth_middleware, AuthState};

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the sync API router.
///
/// `/healthz` is public; everything under `/sync` sits behind bearer auth.
pub fn build_app(backend: Arc<SyncBackend>, validator: Arc<dyn TokenValidator>) -> Router {
    let auth = AuthState { validator };

    let sync_routes = Router::new()
        .route("/sync/push", post(routes::push))
        .route("/sync/pull", get(routes::pull))
        .route("/sync/reset", post(routes::reset))
        .layer(axum::middleware::from_fn_with_state(
            auth.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(routes::healthz))
        .merge(sync_routes)
        .layer(Extension(backend))
}

/// Convenience constructor for the common HS256 deployment.
pub fn build_app_with_secret(backend: Arc<SyncBackend>, jwt_secret: &str) -> Router {
    build_app(
        backend,
        Arc::new(Hs256TokenValidator::new(jwt_secret.as_bytes())),
    )
}
