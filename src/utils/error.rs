use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Queue cleared: {0}")]
    QueueCleared(String),

    #[error("Vector backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Vector backend rejected request: {0}")]
    BackendRejected(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM stream error: {0}")]
    LlmStreamError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Index failure: {0}")]
    IndexFailure(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    /// Stable machine-readable kind, independent of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::QueueFull(_) => "queue_full",
            ApiError::QueueCleared(_) => "queue_cleared",
            ApiError::BackendUnavailable(_) => "backend_unavailable",
            ApiError::BackendRejected(_) => "backend_rejected",
            ApiError::LlmUnavailable(_) => "llm_unavailable",
            ApiError::LlmStreamError(_) => "llm_stream_error",
            ApiError::ProtocolError(_) => "protocol_error",
            ApiError::IndexFailure(_) => "index_partial_failure",
            ApiError::UnsupportedMediaType(_) => "unsupported_media_type",
            ApiError::FileTooLarge(_) => "file_too_large",
            ApiError::StorageError(_) => "storage_error",
            ApiError::InternalError(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::QueueFull(_) | ApiError::QueueCleared(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::BackendRejected(_) => StatusCode::BAD_GATEWAY,
            ApiError::LlmUnavailable(_) | ApiError::LlmStreamError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::ProtocolError(_) => StatusCode::BAD_GATEWAY,
            ApiError::IndexFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::StorageError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        match status {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::TOO_MANY_REQUESTS => {
                tracing::warn!("{}", self)
            }
            _ => tracing::error!("{}", self),
        }

        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
