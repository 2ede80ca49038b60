// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::any::Any;
use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use unibox_core::UniboxError;
use unibox_sync::Pipeline;

use crate::auth::WebhookAuth;
use crate::error::ApiError;
use crate::handlers;

/// Health state for unauthenticated health/metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Optional Prometheus metrics render function.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<Pipeline>,
    pub webhook: WebhookAuth,
    pub health: HealthState,
}

impl FromRef<GatewayState> for WebhookAuth {
    fn from_ref(state: &GatewayState) -> Self {
        state.webhook.clone()
    }
}

/// Listener address.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("request handler panicked");
    ApiError::new(
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
    )
    .into_response()
}

/// Builds the full router.
///
/// - GET /health, GET /metrics (no auth)
/// - PUT /messages/send, POST /messages/receive (webhook token)
/// - everything else (`x-auth-id`)
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .route(
            "/sync-status",
            get(handlers::get_sync_status)
                .post(handlers::begin_sync)
                .put(handlers::update_sync_status),
        )
        .route("/messages/sync", post(handlers::run_sync))
        .route(
            "/messages/send",
            post(handlers::send_message).put(handlers::delivery_callback),
        )
        .route("/messages/receive", post(handlers::receive_message))
        .route("/messages", get(handlers::list_messages))
        .route("/chats", get(handlers::list_chats))
        .route("/chats/available", post(handlers::available_chats))
        .route("/user-platform", get(handlers::list_user_platforms))
        .route("/user-platform/fetch", post(handlers::fetch_user_platforms))
        .route(
            "/integrations/import-new",
            get(handlers::get_import_new).post(handlers::set_import_new),
        )
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the gateway until `shutdown` is cancelled.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), UniboxError> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| UniboxError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("Gateway server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| UniboxError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("Gateway server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_debug() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("127.0.0.1"));
    }
}
