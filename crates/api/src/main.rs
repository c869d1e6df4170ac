use std::sync::Arc;

use chronicle_sync::SyncBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chronicle_observability::init();

    let jwt_secret = std::env::var("CHRONICLE_JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("CHRONICLE_JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let db_path =
        std::env::var("CHRONICLE_DB_PATH").unwrap_or_else(|_| "chronicle-sync.db".to_string());
    let bind_addr =
        std::env::var("CHRONICLE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let backend = Arc::new(SyncBackend::open(&db_path).await?);
    let app = chronicle_api::app::build_app_with_secret(backend, &jwt_secret);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, db = %db_path, "sync server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
