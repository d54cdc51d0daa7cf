//! API handlers.

pub mod upload;

pub use upload::*;

use crate::service::UploadService;

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Upload pipeline.
    pub service: UploadService,
}

impl AppState {
    /// Create a new application state.
    pub fn new(service: UploadService) -> Self {
        Self { service }
    }
}

/// Health check handler.
pub async fn health_check() -> &'static str {
    "OK"
}
