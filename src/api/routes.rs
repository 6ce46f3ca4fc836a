use axum::{
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{drivers, health};
use super::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Diagnostics are meant for local tooling only
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost"),
            HeaderValue::from_static("http://127.0.0.1"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(health::health_check))
        // Registry
        .route("/drivers", get(drivers::list_drivers))
        .route("/drivers", post(drivers::acquire_driver))
        .route("/drivers/cleanup", post(drivers::cleanup_drivers))
        .route("/drivers/:serial", delete(drivers::release_driver))
        .route("/drivers/:serial/requests", get(drivers::driver_requests))
        .route(
            "/drivers/:serial/requests",
            delete(drivers::clear_driver_requests),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
