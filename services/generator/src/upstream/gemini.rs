//! Gemini client for prompt-plus-reference-image generation.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::config::GeminiConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{UpstreamError, UpstreamResult};

/// A reference image sent along with the prompt
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Gemini generateContent request.
#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Blob {
    #[serde(rename = "mimeType", alias = "mime_type", default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

/// Gemini generateContent response.
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(rename = "inlineData", alias = "inline_data", default)]
    inline_data: Option<Blob>,
}

/// Gemini API client for image generation.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(http: Client, config: &GeminiConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.image_model.clone(),
            timeout: config.request_timeout(),
        }
    }

    /// Generate an image from a prompt and reference images, returning the
    /// raw bytes of the first inline image in the first candidate.
    pub async fn generate_image(
        &self,
        prompt: &str,
        images: &[ReferenceImage],
    ) -> UpstreamResult<Vec<u8>> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);

        let mut parts = vec![RequestPart::Text {
            text: prompt.to_string(),
        }];
        parts.extend(images.iter().map(|image| RequestPart::Inline {
            inline_data: Blob {
                mime_type: image.mime_type.clone(),
                data: STANDARD.encode(&image.data),
            },
        }));

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
        };

        info!(model = %self.model, images = images.len(), "Requesting image generation");

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = UpstreamError::from_response(response).await;
            warn!("Gemini request failed: {}", err);
            return Err(err);
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Protocol(format!("Failed to parse Gemini response: {}", e)))?;

        first_inline_image(body)
    }
}

fn first_inline_image(response: GenerateContentResponse) -> UpstreamResult<Vec<u8>> {
    let blob = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| {
            content
                .parts
                .into_iter()
                .find_map(|part| part.inline_data.filter(|b| !b.data.is_empty()))
        })
        .ok_or(UpstreamError::NoImage)?;

    STANDARD
        .decode(blob.data.as_bytes())
        .map_err(|e| UpstreamError::Protocol(format!("inline image is not valid base64: {}", e)))
}
