//! Saving remote videos to local storage and listing them back.

use std::time::Duration;

use common::error::StorageError;
use common::storage::{MediaStorage, StoredFile};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// Error raised while archiving a remote video
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The remote host answered with something other than 200
    #[error("download failed with status {0}")]
    DownloadStatus(StatusCode),

    #[error("download failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to write video: {0}")]
    Io(#[from] std::io::Error),
}

/// Local archive of generated videos
#[derive(Clone)]
pub struct VideoArchive {
    http: Client,
    storage: MediaStorage,
    timeout: Duration,
}

impl VideoArchive {
    pub fn new(http: Client, storage: MediaStorage, timeout: Duration) -> Self {
        Self {
            http,
            storage,
            timeout,
        }
    }

    /// Stream a remote video into a fresh `.mp4` file
    pub async fn save_from_url(&self, url: &str) -> Result<StoredFile, ArchiveError> {
        info!(url, "Downloading video");

        let mut response = self.http.get(url).timeout(self.timeout).send().await?;
        if response.status() != StatusCode::OK {
            warn!(url, status = %response.status(), "Video download rejected");
            return Err(ArchiveError::DownloadStatus(response.status()));
        }

        let target = self.storage.new_video().await?;
        let mut file = tokio::fs::File::create(&target.path).await?;

        let mut written: u64 = 0;
        let result = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<(), ArchiveError>(())
        }
        .await;

        if let Err(e) = result {
            error!(path = %target.path.display(), "Video download interrupted: {}", e);
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(&target.path).await {
                warn!(path = %target.path.display(), "Failed to remove partial video: {}", cleanup);
            }
            return Err(e);
        }

        info!(path = %target.path.display(), bytes = written, "Saved video");
        Ok(target)
    }

    /// Stored videos, newest first
    pub async fn list(&self) -> Result<Vec<StoredFile>, ArchiveError> {
        Ok(self.storage.list_videos().await?)
    }
}
