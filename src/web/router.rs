//! Router configuration for the upload API.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{health_check, upload, AppState};

/// Create the main API router.
///
/// The upload handler streams the raw body, so no `DefaultBodyLimit` applies;
/// `upload.body_length_limit` is enforced by the multipart parser.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_routes = Router::new().route("/upload", post(upload));

    Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}
