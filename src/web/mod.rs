//! HTTP surface for streamload.
//!
//! A single upload endpoint hands the raw request body to the upload
//! pipeline, plus a health check.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use router::create_router;
pub use server::WebServer;
