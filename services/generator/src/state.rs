//! Application state shared across handlers

use common::config::AppConfig;
use common::storage::MediaStorage;
use reqwest::Client;

use crate::middleware::JwtVerifier;
use crate::upstream::{gemini::GeminiClient, replicate::ReplicateClient};
use crate::videos::VideoArchive;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: MediaStorage,
    pub gemini: GeminiClient,
    pub replicate: ReplicateClient,
    pub videos: VideoArchive,
    pub jwt: JwtVerifier,
}

impl AppState {
    /// Build every collaborator from the loaded configuration. All upstream
    /// clients share one connection pool.
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().build()?;
        let storage = MediaStorage::from_config(&config.storage);

        Ok(Self {
            gemini: GeminiClient::new(http.clone(), &config.gemini),
            replicate: ReplicateClient::new(
                http.clone(),
                &config.replicate,
                &config.retry,
                &config.video,
            ),
            videos: VideoArchive::new(http, storage.clone(), config.storage.download_timeout()),
            jwt: JwtVerifier::new(&config.auth.jwt_secret),
            storage,
        })
    }
}
