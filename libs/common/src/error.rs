//! Custom error types for the common library
//!
//! This module defines the configuration and media storage errors shared by
//! the services.

use std::path::PathBuf;

use thiserror::Error;

/// Error raised while loading or validating the application configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The layered configuration could not be read or deserialized
    #[error("Configuration load error: {0}")]
    Load(#[from] config::ConfigError),

    /// A required value is absent or empty
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    /// A value is present but malformed
    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Error raised by media storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// A served URL did not map to a usable file name
    #[error("Invalid media reference: {0}")]
    InvalidReference(String),

    /// The referenced file does not exist under the media root
    #[error("Media file not found: {0}")]
    NotFound(PathBuf),

    /// Filesystem failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Type alias for Result with StorageError
pub type StorageResult<T> = Result<T, StorageError>;
