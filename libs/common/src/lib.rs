//! Common library for the media generation backend
//!
//! This crate provides the pieces shared by the services: the application
//! configuration, error types, and the local media storage layout.

pub mod config;
pub mod error;
pub mod storage;

/// Example usage of the configuration and storage modules
///
/// ```rust,no_run
/// use common::config::AppConfig;
/// use common::storage::MediaStorage;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = AppConfig::load()?;
///     let storage = MediaStorage::from_config(&config.storage);
///     for video in storage.list_videos().await? {
///         println!("{}", video.url);
///     }
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
