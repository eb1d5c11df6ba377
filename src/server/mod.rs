/* src/server/mod.rs */

pub mod handlers;
pub mod listing;
pub mod response;

use crate::ingest::coordinator::UploadCoordinator;
use crate::setup::config::Config;
use axum::Router;
use axum::extract::{ConnectInfo, DefaultBodyLimit};
use axum::http::Request;
use axum::routing::{get, post};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<UploadCoordinator>,
    pub metadata_timeout: Duration,
}

impl AppState {
    pub fn new(coordinator: Arc<UploadCoordinator>, cfg: &Config) -> Self {
        AppState {
            coordinator,
            metadata_timeout: cfg.metadata_timeout(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/files", get(handlers::list_files))
        .route("/api/stats", get(handlers::stats))
        .route("/api/config", get(handlers::get_limits).post(handlers::set_limits))
        .route("/uploads/{name}", get(handlers::download))
        // Upload size is policed by the ingest layer, not by axum's default body cap.
        .route(
            "/upload",
            post(handlers::upload_single).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/upload-multiple",
            post(handlers::upload_multiple).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/upload-chunk",
            post(handlers::upload_chunk).layer(DefaultBodyLimit::disable()),
        )
        .fallback(response::not_found)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    info_span!(
                        "request",
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

/// Binds the configured listener and serves until Ctrl-C.
pub async fn serve(cfg: &Config, coordinator: Arc<UploadCoordinator>) -> Result<(), String> {
    let bind = format!("{}:{}", cfg.network.listen, cfg.network.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", bind, e))?;
    info!("> Listening on {}.", bind);

    let app = build_router(AppState::new(coordinator, cfg));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| format!("Server error: {}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("! Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("> Shutdown signal received, stopping server.");
}
