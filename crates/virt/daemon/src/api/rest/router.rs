//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Admission
        .route("/validate", post(handlers::validate))
        // In-memory store
        .route("/store/instances", put(handlers::put_instance))
        .route("/store/migrations", put(handlers::put_migration))
        .route("/store/pods", put(handlers::put_pod))
        .route("/store/evacuations", get(handlers::list_evacuations));

    // Build router with middleware
    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(TraceLayer::new_for_http());

    if server.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}
