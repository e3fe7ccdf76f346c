//! API models for request and response payloads

use serde::{Deserialize, Serialize};

/// Request for image-to-video generation
#[derive(Debug, Deserialize)]
pub struct GenerateVideoRequest {
    /// Public URL of a previously generated image
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Request to archive a remote video
#[derive(Debug, Deserialize)]
pub struct SaveVideoRequest {
    #[serde(default)]
    pub video_url: String,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub image_url: String,
}

#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub video_url: String,
}

#[derive(Debug, Serialize)]
pub struct SavedVideoResponse {
    pub saved_video_url: String,
}

/// Stored videos, newest first
#[derive(Debug, Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<String>,
}
