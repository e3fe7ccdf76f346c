//! Clients for the third-party generation APIs
//!
//! Every upstream HTTP failure is classified once, from its status code, into
//! [`UpstreamError`]. Callers branch on the variant, never on message text.

pub mod backoff;
pub mod gemini;
pub mod replicate;

use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use thiserror::Error;

use self::backoff::retry_after_hint;

/// Failure reported by, or while talking to, an upstream API
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The account has no credit left (HTTP 402). Never retried.
    #[error("insufficient credit: {0}")]
    InsufficientCredit(String),

    /// The upstream is throttling us (HTTP 429)
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// The upstream rejected the job input (HTTP 422)
    #[error("input rejected: {0}")]
    InvalidInput(String),

    /// The model or a referenced file does not exist upstream (HTTP 404)
    #[error("not found upstream: {0}")]
    NotFound(String),

    /// Any other non-success status
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A success response did not have the expected shape
    #[error("unexpected upstream response: {0}")]
    Protocol(String),

    /// A prediction reached a terminal state other than success
    #[error("prediction {status}: {message}")]
    PredictionFailed { status: String, message: String },

    /// A prediction did not finish in time
    #[error("prediction did not finish within {0:?}")]
    Timeout(Duration),

    /// The image model answered without any inline image data
    #[error("model returned no image")]
    NoImage,

    /// A file selected for upload has no content
    #[error("upload file is empty: {}", .0.display())]
    EmptyUpload(PathBuf),

    /// Every upload cycle was consumed without success
    #[error("retry limit exceeded after {0} upload cycles")]
    RetryLimitExceeded(u32),

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for results of upstream calls
pub type UpstreamResult<T> = Result<T, UpstreamError>;

impl UpstreamError {
    /// Classify a non-success response, consuming its body
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let retry_after = retry_after_hint(response.headers());
        let body = response.text().await.unwrap_or_default();
        Self::from_status(status, retry_after, body)
    }

    /// Classify a status code with the response body already read
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> Self {
        let detail = error_detail(&body);
        match status {
            StatusCode::PAYMENT_REQUIRED => Self::InsufficientCredit(detail),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                retry_after,
                message: detail,
            },
            StatusCode::UNPROCESSABLE_ENTITY => Self::InvalidInput(detail),
            StatusCode::NOT_FOUND => Self::NotFound(detail),
            _ => Self::Status {
                status: status.as_u16(),
                body,
            },
        }
    }
}

/// Pull the human readable part out of a JSON error body, if there is one
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Name of a JSON value's type, for protocol error messages
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
