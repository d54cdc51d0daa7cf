//! Response DTOs for the upload API.

use serde::Serialize;

use crate::error::MessageCode;
use crate::service::UploadResult;
use crate::store::CommittedFile;
use crate::upload::FormFieldSet;

/// Result envelope returned by every upload response.
#[derive(Debug, Serialize)]
pub struct ResultDto<T: Serialize> {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Fixed message for `message_code`.
    pub message: String,
    /// Result classification.
    pub message_code: MessageCode,
    /// Caller-safe detail.
    pub description: String,
    /// Additional notes.
    pub remark: Vec<String>,
    /// Payload; `null` on failure.
    pub data: Option<T>,
}

impl<T: Serialize> ResultDto<T> {
    /// Create a successful result.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: MessageCode::Success.message().to_string(),
            message_code: MessageCode::Success,
            description: String::new(),
            remark: Vec::new(),
            data: Some(data),
        }
    }
}

impl ResultDto<()> {
    /// Create a failed result without payload.
    pub fn failure(code: MessageCode, description: impl Into<String>) -> Self {
        Self {
            success: false,
            message: code.message().to_string(),
            message_code: code,
            description: description.into(),
            remark: Vec::new(),
            data: None,
        }
    }
}

/// Payload of a successful upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Durable store keys in request order.
    pub committed_keys: Vec<String>,
    /// Committed files in request order.
    pub files: Vec<CommittedFile>,
    /// Accumulated form values.
    pub fields: FormFieldSet,
}

impl From<UploadResult> for UploadResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            committed_keys: result.committed_keys(),
            files: result.committed,
            fields: result.fields,
        }
    }
}
