//! Generator service routes

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use common::error::StorageError;
use serde_json::json;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    error::{ApiError, ApiResult},
    extract::FormOrJson,
    middleware::{AuthUser, auth_middleware},
    models::{
        GenerateVideoRequest, ImageResponse, SaveVideoRequest, SavedVideoResponse,
        VideoListResponse, VideoResponse,
    },
    state::AppState,
    upstream::gemini::ReferenceImage,
};

/// Upper bound for a multipart request carrying reference images
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

const FALLBACK_IMAGE_MIME: &str = "image/png";

/// Create the router for the generator service
pub fn create_router(state: AppState) -> Router {
    let media_path = state.storage.url_prefix().trim_end_matches('/').to_string();
    let media = ServeDir::new(state.storage.root());

    let protected_routes = Router::new()
        .route("/generate-image/", post(generate_image))
        .route("/generate-video/", post(generate_video))
        .route("/save-video/", post(save_video))
        .route("/list-videos/", get(list_videos))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .nest_service(&media_path, media)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "generator"
    }))
}

/// Generate an image from a prompt and reference images
pub async fn generate_image(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<ImageResponse>> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut prompt = String::new();
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                prompt = text.trim().to_string();
            }
            "images" => {
                let mime_type = field
                    .content_type()
                    .map(str::to_string)
                    .or_else(|| {
                        field
                            .file_name()
                            .and_then(|n| mime_guess::from_path(n).first_raw())
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| FALLBACK_IMAGE_MIME.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;

                // browsers send an empty part when no file was picked
                if !data.is_empty() {
                    images.push(ReferenceImage {
                        mime_type,
                        data: data.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    if prompt.is_empty() {
        return Err(ApiError::BadRequest("A prompt is required.".to_string()));
    }
    if images.is_empty() {
        return Err(ApiError::BadRequest(
            "Upload at least one reference image.".to_string(),
        ));
    }

    info!(user = %user.id, images = images.len(), "Generating image");

    let bytes = state
        .gemini
        .generate_image(&prompt, &images)
        .await
        .map_err(ApiError::from_image_error)?;

    let stored = state.storage.save_image(&bytes).await.map_err(|e| {
        error!("Failed to store generated image: {}", e);
        ApiError::Internal(format!("Image generation failed: {}", e))
    })?;

    info!(user = %user.id, url = %stored.url, "Image generated");
    Ok(Json(ImageResponse {
        image_url: stored.url,
    }))
}

/// Turn a previously generated image into a video
pub async fn generate_video(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    FormOrJson(payload): FormOrJson<GenerateVideoRequest>,
) -> ApiResult<Json<VideoResponse>> {
    let image_url = payload.image_url.trim();
    if image_url.is_empty() {
        return Err(ApiError::BadRequest("image_url is required.".to_string()));
    }

    let image = state
        .storage
        .resolve_url(image_url)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) | StorageError::InvalidReference(_) => {
                ApiError::NotFound("Image file not found on the server.".to_string())
            }
            other => {
                error!("Failed to resolve {}: {}", image_url, other);
                ApiError::Internal(format!("Video generation failed: {}", other))
            }
        })?;
    if image.is_empty() {
        return Err(ApiError::BadRequest(
            "The image file to upload is empty.".to_string(),
        ));
    }

    let prompt = payload
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    info!(user = %user.id, image = %image.path.display(), "Generating video");

    let uploaded = state
        .replicate
        .upload_file(&image.path)
        .await
        .map_err(ApiError::from_video_error)?;

    let video_url = state
        .replicate
        .generate_video(&uploaded, prompt)
        .await
        .map_err(ApiError::from_video_error)?;

    info!(user = %user.id, %video_url, "Video generated");
    Ok(Json(VideoResponse { video_url }))
}

/// Download a remote video into the local archive
pub async fn save_video(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    FormOrJson(payload): FormOrJson<SaveVideoRequest>,
) -> ApiResult<Json<SavedVideoResponse>> {
    let video_url = payload.video_url.trim();
    if video_url.is_empty() {
        return Err(ApiError::BadRequest("video_url is required.".to_string()));
    }

    info!(user = %user.id, video_url, "Saving video");
    let saved = state.videos.save_from_url(video_url).await?;

    Ok(Json(SavedVideoResponse {
        saved_video_url: saved.url,
    }))
}

/// List archived videos, newest first
pub async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<VideoListResponse>> {
    let videos = state.videos.list().await?;

    Ok(Json(VideoListResponse {
        videos: videos.into_iter().map(|v| v.url).collect(),
    }))
}
