//! Upload handler.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::CONTENT_TYPE,
    Json,
};

use super::AppState;
use crate::web::dto::{ResultDto, UploadResponse};
use crate::web::error::ApiError;

/// POST /api/upload - Stream a multipart body into durable storage.
///
/// The body is consumed as a raw data stream; no form extractor runs first.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<ResultDto<UploadResponse>>, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let stream = request.into_body().into_data_stream();

    let result = state.service.handle(stream, content_type.as_deref()).await;
    if !result.success {
        return Err(ApiError::from_result(&result));
    }

    Ok(Json(ResultDto::success(UploadResponse::from(result))))
}
