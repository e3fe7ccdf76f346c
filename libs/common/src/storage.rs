//! Media storage layout
//!
//! Generated images live directly under the media root and saved videos under
//! its `videos/` subdirectory. Both are served under one public URL prefix, and
//! this module is the only place that maps between the two.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

const VIDEOS_DIR: &str = "videos";
const IMAGE_EXTENSION: &str = "png";
const VIDEO_EXTENSION: &str = "mp4";

/// A file written to (or listed from) the media root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Location on disk
    pub path: PathBuf,
    /// Public URL the file is served under
    pub url: String,
}

/// An existing file resolved from a served URL
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub path: PathBuf,
    pub len: u64,
}

impl LocalFile {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Media storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    url_prefix: String,
}

impl MediaStorage {
    /// Create a storage handle. `url_prefix` must start and end with `/`.
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.media_root.clone(), config.media_url.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join(VIDEOS_DIR)
    }

    /// Create the media root and the videos directory if they are missing
    pub async fn ensure_dirs(&self) -> StorageResult<()> {
        fs::create_dir_all(self.videos_dir()).await?;
        Ok(())
    }

    /// Write generated image bytes under a fresh `<uuid>.png` name
    pub async fn save_image(&self, bytes: &[u8]) -> StorageResult<StoredFile> {
        fs::create_dir_all(&self.root).await?;

        let name = unique_name(IMAGE_EXTENSION);
        let path = self.root.join(&name);
        fs::write(&path, bytes).await?;

        info!(path = %path.display(), bytes = bytes.len(), "Saved generated image");
        Ok(StoredFile {
            path,
            url: format!("{}{}", self.url_prefix, name),
        })
    }

    /// Reserve a fresh `videos/<uuid>.mp4` location. The file itself is
    /// created by the caller.
    pub async fn new_video(&self) -> StorageResult<StoredFile> {
        let dir = self.videos_dir();
        fs::create_dir_all(&dir).await?;

        let name = unique_name(VIDEO_EXTENSION);
        Ok(StoredFile {
            path: dir.join(&name),
            url: self.video_url(&name),
        })
    }

    /// List stored videos, newest first by modification time
    pub async fn list_videos(&self) -> StorageResult<Vec<StoredFile>> {
        let dir = self.videos_dir();
        fs::create_dir_all(&dir).await?;

        let mut found: Vec<(SystemTime, String, PathBuf)> = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VIDEO_EXTENSION) {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, name.to_string(), path));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        debug!(count = found.len(), "Listed stored videos");

        Ok(found
            .into_iter()
            .map(|(_, name, path)| StoredFile {
                url: self.video_url(&name),
                path,
            })
            .collect())
    }

    /// Resolve a served URL (absolute or relative) to the file it names under
    /// the media root.
    pub async fn resolve_url(&self, url: &str) -> StorageResult<LocalFile> {
        let name = file_name_from_url(url)?;
        let path = self.root.join(name);

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(LocalFile {
                path,
                len: metadata.len(),
            }),
            Ok(_) => Err(StorageError::NotFound(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path)),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn video_url(&self, name: &str) -> String {
        format!("{}{}/{}", self.url_prefix, VIDEOS_DIR, name)
    }
}

fn unique_name(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), extension)
}

/// Last path segment of a URL, ignoring any query or fragment
fn file_name_from_url(url: &str) -> StorageResult<&str> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();

    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return Err(StorageError::InvalidReference(url.to_string()));
    }

    Ok(name)
}
