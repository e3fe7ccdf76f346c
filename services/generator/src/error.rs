//! Custom error types for the generator service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::upstream::UpstreamError;
use crate::videos::ArchiveError;

/// Custom error type for the generator service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or invalid bearer token
    #[error("Unauthorized")]
    Unauthorized,

    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream credit is exhausted
    #[error("Payment required: {0}")]
    PaymentRequired(String),

    /// Upstream rejected the job input
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    /// Upstream kept rate limiting us
    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    /// A remote host failed to deliver a file
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Internal server error with a caller-safe message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Map a failure of the image generation flow
    pub fn from_image_error(err: UpstreamError) -> Self {
        error!("Image generation failed: {}", err);
        match err {
            UpstreamError::NoImage => {
                ApiError::Internal("Image generation failed: the model returned no image.".to_string())
            }
            other => ApiError::Internal(format!("Image generation failed: {}", other)),
        }
    }

    /// Map a failure of the upload-then-predict video flow
    pub fn from_video_error(err: UpstreamError) -> Self {
        error!("Video generation failed: {}", err);
        match err {
            UpstreamError::InsufficientCredit(_) => ApiError::PaymentRequired(
                "Replicate credit is exhausted. Top up at https://replicate.com/account/billing#billing and try again."
                    .to_string(),
            ),
            UpstreamError::RateLimited { .. } | UpstreamError::RetryLimitExceeded(_) => {
                ApiError::TooManyRequests(
                    "Replicate is rate limiting requests. Try again shortly.".to_string(),
                )
            }
            UpstreamError::InvalidInput(_) => ApiError::Unprocessable(
                "The input does not satisfy the model constraints: fps must be 24 and num_frames should be between 16 and 24."
                    .to_string(),
            ),
            UpstreamError::NotFound(_) => ApiError::NotFound(
                "Replicate could not find the model or file reference.".to_string(),
            ),
            UpstreamError::EmptyUpload(_) => {
                ApiError::BadRequest("The image file to upload is empty.".to_string())
            }
            other => ApiError::Internal(format!("Video generation failed: {}", other)),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        error!("Video archive error: {}", err);
        match err {
            ArchiveError::DownloadStatus(status) => {
                ApiError::BadGateway(format!("Download failed: {}", status.as_u16()))
            }
            other => ApiError::Internal(format!("Saving the video failed: {}", other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::PaymentRequired(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
