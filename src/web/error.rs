//! API error handling for the upload API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::dto::ResultDto;
use crate::error::MessageCode;
use crate::service::UploadResult;
use crate::UploadError;

/// Get the HTTP status for a message code.
pub fn status_code(code: MessageCode) -> StatusCode {
    match code {
        MessageCode::Success => StatusCode::OK,
        MessageCode::MalformedRequest => StatusCode::BAD_REQUEST,
        MessageCode::LimitExceeded => StatusCode::PAYLOAD_TOO_LARGE,
        MessageCode::UploadRejected => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        MessageCode::IoFailure | MessageCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        MessageCode::PartialCommitFailure => StatusCode::BAD_GATEWAY,
    }
}

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    code: MessageCode,
    description: String,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(code: MessageCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    /// Get the message code.
    pub fn code(&self) -> MessageCode {
        self.code
    }

    /// Build from a failed upload result.
    pub fn from_result(result: &UploadResult) -> Self {
        Self::new(result.message_code, result.description.clone())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(self.code);
        (status, Json(ResultDto::failure(self.code, self.description))).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.description)
    }
}

impl std::error::Error for ApiError {}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        if matches!(err.code(), MessageCode::IoFailure | MessageCode::Unknown) {
            tracing::error!("Internal error: {}", err);
        }
        Self::new(err.code(), err.public_description())
    }
}
