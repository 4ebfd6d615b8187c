//! HTTP API for the dispatch node

pub mod errors;
pub mod handlers;

pub use errors::{ApiError, ApiResult, FailureEnvelope};

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::coordinator::JobCoordinator;

/// Builds the API router. Without an origin, CORS allows any.
pub fn create_router(coordinator: Arc<JobCoordinator>, allowed_origin: Option<HeaderValue>) -> Router {
    let origin = match allowed_origin {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::from(Any),
    };

    Router::new()
        .route("/health", get(handlers::health))
        // Job lifecycle
        .route("/job", post(handlers::submit_job))
        .route("/job/:job_id", get(handlers::get_job))
        .route("/job/:job_id/status", get(handlers::get_job_status))
        .route("/job/:job_id/delivered", post(handlers::mark_delivered))
        // Fleet
        .route("/api/drones", get(handlers::list_drones))
        .route("/api/hive-analytics", get(handlers::hive_analytics))
        .route("/api/assign-drone", post(handlers::assign_drone))
        .fallback(|| async { ApiError::not_found("Route not found") })
        .layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(coordinator)
}
