use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::session::SessionRegistry;

/// Request bodies are small JSON objects.
const MAX_BODY_BYTES: usize = 64 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub max_connections: usize,
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;

    let session_routes = Router::new()
        .route("/auth_by_phone", post(handlers::auth_by_phone))
        .route("/auth_by_code", post(handlers::auth_by_code))
        .route("/send_message", post(handlers::send_message))
        .route("/send_message_to_self", post(handlers::send_message_to_self))
        .route("/disconnect", post(handlers::disconnect))
        .route("/get_clients", get(handlers::get_clients))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ))
        .layer(middleware::map_response(handlers::render_timeout))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(ConcurrencyLimitLayer::new(max_connections));

    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/livez", get(handlers::livez))
        .route("/version", get(handlers::version))
        .merge(session_routes)
}
