//! Replicate client: file uploads and video prediction jobs.
//!
//! The files endpoint is inconsistent about which multipart layout it
//! accepts, so uploads walk an ordered list of payload shapes until one is
//! taken. Predictions are created with `Prefer: wait` and polled until they
//! reach a terminal state.

use std::path::Path;
use std::time::Duration;

use common::config::{ReplicateConfig, RetryConfig, VideoConfig};
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, retry_after_hint};
use super::{UpstreamError, UpstreamResult, json_kind};

/// Marker in a 400 body meaning the chosen multipart layout was not understood
const MISSING_CONTENT_MARKER: &str = "Missing content";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    File,
    Content,
}

impl FormField {
    fn as_str(self) -> &'static str {
        match self {
            FormField::File => "file",
            FormField::Content => "content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadSource {
    /// Stream from a freshly opened file handle
    FileHandle,
    /// Send the bytes read up front
    Bytes,
}

/// One multipart layout to try against the files endpoint
#[derive(Debug, Clone, Copy)]
struct PayloadShape {
    field: FormField,
    source: PayloadSource,
    explicit_mime: bool,
}

/// Upload layouts in the order they are tried
const PAYLOAD_SHAPES: [PayloadShape; 6] = [
    PayloadShape {
        field: FormField::File,
        source: PayloadSource::FileHandle,
        explicit_mime: true,
    },
    PayloadShape {
        field: FormField::File,
        source: PayloadSource::FileHandle,
        explicit_mime: false,
    },
    PayloadShape {
        field: FormField::Content,
        source: PayloadSource::FileHandle,
        explicit_mime: true,
    },
    PayloadShape {
        field: FormField::File,
        source: PayloadSource::Bytes,
        explicit_mime: true,
    },
    PayloadShape {
        field: FormField::File,
        source: PayloadSource::Bytes,
        explicit_mime: false,
    },
    PayloadShape {
        field: FormField::Content,
        source: PayloadSource::Bytes,
        explicit_mime: true,
    },
];

/// A local file being pushed to the files endpoint
struct PendingUpload<'a> {
    path: &'a Path,
    file_name: String,
    mime: String,
    bytes: Vec<u8>,
}

impl PayloadShape {
    /// Build the form for this shape. A file handle opened here is owned by
    /// the request body and closed once the attempt is over.
    async fn encode(&self, upload: &PendingUpload<'_>) -> UpstreamResult<Form> {
        let part = match self.source {
            PayloadSource::FileHandle => {
                let file = tokio::fs::File::open(upload.path).await?;
                Part::stream_with_length(Body::from(file), upload.bytes.len() as u64)
            }
            PayloadSource::Bytes => Part::bytes(upload.bytes.clone()),
        }
        .file_name(upload.file_name.clone());

        let part = if self.explicit_mime {
            part.mime_str(&upload.mime)?
        } else {
            part
        };

        Ok(Form::new().part(self.field.as_str(), part))
    }
}

/// Result of one pass through every payload shape
enum UploadCycle {
    Uploaded(String),
    RateLimited(Option<Duration>),
    ShapesExhausted,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    #[serde(default)]
    urls: Option<FileUrls>,
}

#[derive(Debug, Deserialize)]
struct FileUrls {
    #[serde(default)]
    get: Option<String>,
}

/// Input of the image-to-video model
#[derive(Debug, Clone, Serialize)]
pub struct VideoJobInput {
    pub image: String,
    pub fps: u32,
    pub num_frames: u32,
    pub target_resolution: String,
    #[serde(rename = "loop")]
    pub loop_video: bool,
    pub enable_reflection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a, T> {
    input: &'a T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

/// Client for the Replicate files and predictions APIs
#[derive(Clone)]
pub struct ReplicateClient {
    http: Client,
    base_url: String,
    api_token: String,
    video_model: String,
    video: VideoConfig,
    backoff: Backoff,
    max_attempts: u32,
    upload_timeout: Duration,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl ReplicateClient {
    pub fn new(
        http: Client,
        config: &ReplicateConfig,
        retry: &RetryConfig,
        video: &VideoConfig,
    ) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            video_model: config.video_model.clone(),
            video: video.clone(),
            backoff: Backoff::from_config(retry),
            max_attempts: retry.max_attempts,
            upload_timeout: config.upload_timeout(),
            poll_interval: config.poll_interval(),
            job_timeout: config.job_timeout(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.api_token)
    }

    /// Upload a local file and return the URL a prediction can fetch it from
    pub async fn upload_file(&self, path: &Path) -> UpstreamResult<String> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(UpstreamError::EmptyUpload(path.to_path_buf()));
        }

        let upload = PendingUpload {
            path,
            file_name: path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string(),
            mime: mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            bytes,
        };

        info!(
            file = %upload.file_name,
            mime = %upload.mime,
            bytes = upload.bytes.len(),
            "Uploading file to Replicate"
        );

        for cycle in 1..=self.max_attempts {
            match self.upload_cycle(&upload).await? {
                UploadCycle::Uploaded(url) => {
                    info!(cycle, "File upload accepted");
                    return Ok(url);
                }
                UploadCycle::RateLimited(hint) => {
                    warn!(cycle, max = self.max_attempts, "File upload rate limited");
                    if cycle < self.max_attempts {
                        self.backoff.wait(hint).await;
                    }
                }
                UploadCycle::ShapesExhausted => {
                    warn!(cycle, max = self.max_attempts, "No upload layout was accepted");
                }
            }
        }

        error!(cycles = self.max_attempts, "File upload retry limit exceeded");
        Err(UpstreamError::RetryLimitExceeded(self.max_attempts))
    }

    async fn upload_cycle(&self, upload: &PendingUpload<'_>) -> UpstreamResult<UploadCycle> {
        let url = format!("{}/v1/files", self.base_url);

        for (index, shape) in PAYLOAD_SHAPES.iter().enumerate() {
            let form = shape.encode(upload).await?;
            let response = self
                .http
                .post(&url)
                .header(AUTHORIZATION, self.auth_header())
                .timeout(self.upload_timeout)
                .multipart(form)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let body = response.text().await?;
                return parse_uploaded_url(&body).map(UploadCycle::Uploaded);
            }

            match status {
                StatusCode::PAYMENT_REQUIRED => {
                    return Err(UpstreamError::from_response(response).await);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    return Ok(UploadCycle::RateLimited(retry_after_hint(response.headers())));
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    if status == StatusCode::BAD_REQUEST && body.contains(MISSING_CONTENT_MARKER) {
                        debug!(shape = index, ?shape, "Upload layout rejected, trying the next one");
                        continue;
                    }

                    return Err(UpstreamError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
            }
        }

        Ok(UploadCycle::ShapesExhausted)
    }

    /// Run the image-to-video model on an uploaded image URL and return the
    /// URL of the produced video.
    pub async fn generate_video(
        &self,
        image_url: &str,
        prompt: Option<&str>,
    ) -> UpstreamResult<String> {
        let input = VideoJobInput {
            image: image_url.to_string(),
            fps: self.video.fps,
            num_frames: self.video.num_frames,
            target_resolution: self.video.target_resolution.clone(),
            loop_video: false,
            enable_reflection: false,
            prompt: prompt.map(str::to_string),
        };

        let output = self.run_with_retries(&input).await?;
        video_url_from_output(output)
    }

    /// Submit a prediction, retrying only while the upstream rate limits us
    async fn run_with_retries<T: Serialize>(&self, input: &T) -> UpstreamResult<Value> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match self.run(input).await {
                Ok(output) => return Ok(output),
                Err(e @ UpstreamError::InsufficientCredit(_)) => {
                    error!(attempt, "Replicate credit exhausted: {}", e);
                    return Err(e);
                }
                Err(UpstreamError::RateLimited {
                    retry_after,
                    message,
                }) => {
                    warn!(attempt, max = self.max_attempts, "Prediction rate limited: {}", message);
                    if attempt < self.max_attempts {
                        self.backoff.wait(retry_after).await;
                    }
                    last_error = Some(UpstreamError::RateLimited {
                        retry_after,
                        message,
                    });
                }
                Err(e) => {
                    error!(attempt, "Prediction failed: {}", e);
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or(UpstreamError::RetryLimitExceeded(self.max_attempts)))
    }

    async fn run<T: Serialize>(&self, input: &T) -> UpstreamResult<Value> {
        let url = format!("{}/v1/models/{}/predictions", self.base_url, self.video_model);
        info!(model = %self.video_model, "Creating prediction");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.auth_header())
            .header("Prefer", "wait")
            .json(&PredictionRequest { input })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::from_response(response).await);
        }

        let prediction = parse_prediction(&response.text().await?)?;
        let prediction = self.wait_for_completion(prediction).await?;

        match prediction.status {
            PredictionStatus::Succeeded => prediction.output.ok_or_else(|| {
                UpstreamError::Protocol(format!(
                    "prediction {} succeeded without output",
                    prediction.id
                ))
            }),
            status => Err(UpstreamError::PredictionFailed {
                status: status.as_str().to_string(),
                message: prediction
                    .error
                    .map(|e| match e {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "no error reported".to_string()),
            }),
        }
    }

    async fn wait_for_completion(&self, mut prediction: Prediction) -> UpstreamResult<Prediction> {
        let deadline = Instant::now() + self.job_timeout;

        while !prediction.status.is_terminal() {
            if Instant::now() >= deadline {
                return Err(UpstreamError::Timeout(self.job_timeout));
            }

            let poll_url = self.poll_url(&prediction);

            debug!(id = %prediction.id, status = prediction.status.as_str(), "Waiting for prediction");
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .http
                .get(&poll_url)
                .header(AUTHORIZATION, self.auth_header())
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(UpstreamError::from_response(response).await);
            }

            prediction = parse_prediction(&response.text().await?)?;
        }

        info!(id = %prediction.id, status = prediction.status.as_str(), "Prediction finished");
        Ok(prediction)
    }

    /// Status URL for a prediction. The API token is only ever sent to the
    /// configured origin, so a `urls.get` pointing elsewhere is replaced by
    /// the canonical endpoint.
    fn poll_url(&self, prediction: &Prediction) -> String {
        let canonical = format!("{}/v1/predictions/{}", self.base_url, prediction.id);

        match prediction.urls.as_ref().and_then(|u| u.get.as_deref()) {
            Some(get) if same_origin(get, &self.base_url) => get.to_string(),
            Some(get) => {
                warn!(id = %prediction.id, url = get, "Ignoring poll URL outside the API origin");
                canonical
            }
            None => canonical,
        }
    }
}

fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin(),
        _ => false,
    }
}

fn parse_uploaded_url(body: &str) -> UpstreamResult<String> {
    let file: UploadedFile = serde_json::from_str(body)
        .map_err(|e| UpstreamError::Protocol(format!("invalid upload response ({}): {}", e, body)))?;

    file.urls
        .and_then(|urls| urls.get)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| UpstreamError::Protocol(format!("upload response has no URL: {}", body)))
}

fn parse_prediction(body: &str) -> UpstreamResult<Prediction> {
    serde_json::from_str(body)
        .map_err(|e| UpstreamError::Protocol(format!("invalid prediction response ({}): {}", e, body)))
}

/// A job yields either a URL or a list whose first element is the URL
fn video_url_from_output(output: Value) -> UpstreamResult<String> {
    let candidate = match output {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::Protocol("job output is an empty array".to_string()))?,
        other => other,
    };

    match candidate {
        Value::String(url) if !url.is_empty() => Ok(url),
        other => Err(UpstreamError::Protocol(format!(
            "expected a video URL string, got {}: {}",
            json_kind(&other),
            other
        ))),
    }
}
