pub mod api;
pub mod cli;
pub mod document;
pub mod engine;
pub mod hub;
pub mod ot;
pub mod store;
pub mod ws;

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use engine::EngineConfig;
use hub::Hub;
use std::path::PathBuf;
use std::sync::Arc;
use store::{SnapshotStore, StoreError};
use tower_http::cors::{Any, CorsLayer};

async fn health_check() -> &'static str {
    "OK"
}

/// Server assembly options.
pub struct ServerConfig {
    pub store_dir: PathBuf,
    pub engine: EngineConfig,
    /// Exact CORS origin to allow; `None` permits any origin.
    pub allowed_origin: Option<String>,
}

/// Build the full router (health, metadata API, WebSocket transport) and the
/// hub behind it. The hub handle is returned so the caller can drain engines
/// on shutdown.
pub async fn create_router_with_config(
    config: ServerConfig,
) -> Result<(Router, Hub), StoreError> {
    let store = Arc::new(SnapshotStore::open(&config.store_dir).await?);
    let hub = Hub::new(store, config.engine);

    let cors = match config.allowed_origin.as_deref() {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                tracing::warn!(origin = %origin, "unparsable allowed origin, permitting any");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(api::router(hub.clone()))
        .merge(ws::router(hub.clone()))
        .layer(cors);

    Ok((app, hub))
}

/// Convenience assembly with default engine tuning, used by tests.
pub async fn create_router(store_dir: PathBuf) -> Result<(Router, Hub), StoreError> {
    create_router_with_config(ServerConfig {
        store_dir,
        engine: EngineConfig::default(),
        allowed_origin: None,
    })
    .await
}
