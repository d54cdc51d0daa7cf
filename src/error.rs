//! Error types for streamload.

use serde::Serialize;
use thiserror::Error;

/// Message code reported to callers alongside every upload result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageCode {
    /// The upload was staged and committed.
    Success,
    /// Bad or missing content type or boundary.
    MalformedRequest,
    /// Boundary length, field count, value length or body size breach.
    LimitExceeded,
    /// A file was refused (disallowed extension).
    UploadRejected,
    /// Local read/write failure.
    IoFailure,
    /// A durable-store commit failed after others may have succeeded.
    PartialCommitFailure,
    /// Anything else.
    Unknown,
}

impl MessageCode {
    /// Get the fixed, caller-facing message for this code.
    pub fn message(&self) -> &'static str {
        match self {
            MessageCode::Success => "Upload succeeded.",
            MessageCode::MalformedRequest => "The request is not a valid multipart upload.",
            MessageCode::LimitExceeded => "The upload exceeds a configured limit.",
            MessageCode::UploadRejected => "The uploaded file was rejected.",
            MessageCode::IoFailure => "The upload could not be stored.",
            MessageCode::PartialCommitFailure => "The upload could not be committed.",
            MessageCode::Unknown => "An unexpected error occurred.",
        }
    }
}

/// Common error type for streamload.
#[derive(Error, Debug)]
pub enum UploadError {
    /// Content type is not multipart, or the boundary is missing.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A configured limit was breached.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// A file section was refused.
    #[error("upload rejected: {0}")]
    UploadRejected(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A durable-store put failed; `rolled_back` keys from the same batch were deleted.
    #[error("commit of {key} failed: {reason} ({rolled_back} rolled back)")]
    PartialCommitFailure {
        key: String,
        reason: String,
        rolled_back: usize,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unclassified failure.
    #[error("{0}")]
    Unknown(String),
}

impl UploadError {
    /// Get the message code for this error.
    pub fn code(&self) -> MessageCode {
        match self {
            UploadError::MalformedRequest(_) => MessageCode::MalformedRequest,
            UploadError::LimitExceeded(_) => MessageCode::LimitExceeded,
            UploadError::UploadRejected(_) => MessageCode::UploadRejected,
            UploadError::Io(_) => MessageCode::IoFailure,
            UploadError::PartialCommitFailure { .. } => MessageCode::PartialCommitFailure,
            UploadError::Config(_) | UploadError::Unknown(_) => MessageCode::Unknown,
        }
    }

    /// Detail that is safe to hand back to the uploading client.
    ///
    /// I/O and unclassified failures yield an empty string so that OS error
    /// text never leaves the process.
    pub fn public_description(&self) -> String {
        match self {
            UploadError::MalformedRequest(msg)
            | UploadError::LimitExceeded(msg)
            | UploadError::UploadRejected(msg) => msg.clone(),
            UploadError::PartialCommitFailure { key, .. } => format!("commit of {key} failed"),
            UploadError::Io(_) | UploadError::Config(_) | UploadError::Unknown(_) => String::new(),
        }
    }
}

/// Result type alias for streamload operations.
pub type Result<T> = std::result::Result<T, UploadError>;
