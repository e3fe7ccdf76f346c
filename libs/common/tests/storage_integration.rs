//! Integration tests for the media storage layout
//!
//! These tests verify that stored videos are listed newest first and that
//! served URLs resolve back to the files they were generated for.

use std::time::{Duration, SystemTime};

use common::storage::MediaStorage;

fn set_mtime(path: &std::path::Path, time: SystemTime) -> std::io::Result<()> {
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(time)
}

/// Saving N videos lists exactly N entries ordered by save time
#[tokio::test]
async fn test_saved_videos_are_listed_newest_first() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let storage = MediaStorage::new(dir.path(), "/media/");

    let base = SystemTime::now() - Duration::from_secs(3600);
    let mut saved = Vec::new();
    for i in 0..4u64 {
        let video = storage.new_video().await?;
        tokio::fs::write(&video.path, format!("video-{i}")).await?;
        set_mtime(&video.path, base + Duration::from_secs(60 * i))?;
        saved.push(video);
    }

    let listed = storage.list_videos().await?;
    assert_eq!(listed.len(), saved.len(), "every saved video is listed");

    let expected: Vec<_> = saved.iter().rev().map(|v| v.url.clone()).collect();
    let actual: Vec<_> = listed.iter().map(|v| v.url.clone()).collect();
    assert_eq!(actual, expected, "videos are ordered newest first");

    Ok(())
}

/// Every URL handed out for an image resolves to the same file on disk
#[tokio::test]
async fn test_image_urls_round_trip_to_disk() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let storage = MediaStorage::new(dir.path(), "/assets/");

    let image = storage.save_image(b"not really a png").await?;
    assert!(image.url.starts_with("/assets/"));

    let local = storage.resolve_url(&image.url).await?;
    assert_eq!(local.path, image.path);
    assert_eq!(tokio::fs::read(&local.path).await?, b"not really a png");

    Ok(())
}
