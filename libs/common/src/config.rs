//! Application configuration
//!
//! The configuration is loaded once at process start and is immutable
//! afterwards. Sources, lowest precedence first:
//!
//! - built-in defaults (plus the `GOOGLE_API_KEY` / `REPLICATE_API_TOKEN` aliases)
//! - an optional TOML file named by `GENERATOR_CONFIG`
//! - `GENERATOR__<SECTION>__<KEY>` environment variables
//!
//! A `.env` file in the working directory is read before any of these.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};

/// Prefix of the environment variables read by [`AppConfig::load`]
pub const ENV_PREFIX: &str = "GENERATOR";

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "GENERATOR_CONFIG";

/// Complete application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub replicate: ReplicateConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub video: VideoConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Local media storage settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding generated images and the `videos/` subdirectory
    pub media_root: PathBuf,
    /// Public URL prefix the media root is served under
    pub media_url: String,
    /// Timeout for downloading a remote video, in seconds
    pub download_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("media"),
            media_url: "/media/".to_string(),
            download_timeout_secs: 180,
        }
    }
}

impl StorageConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Bearer token verification settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the service that issues access tokens
    pub jwt_secret: String,
}

/// Image model settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub image_model: String,
    /// Timeout of a single generateContent request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl GeminiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Video model and file upload settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplicateConfig {
    pub api_token: String,
    pub base_url: String,
    /// Model reference in `owner/name` form
    pub video_model: String,
    /// Delay between prediction status polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for a prediction to finish, in seconds
    pub job_timeout_secs: u64,
    /// Timeout of a single file upload request, in seconds
    pub upload_timeout_secs: u64,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            base_url: "https://api.replicate.com".to_string(),
            video_model: "bytedance/seedance-1-pro-fast".to_string(),
            poll_interval_ms: 1000,
            job_timeout_secs: 600,
            upload_timeout_secs: 120,
        }
    }
}

impl ReplicateConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Retry policy shared by the upstream clients
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt ceiling for job submissions and upload cycles
    pub max_attempts: u32,
    /// Sleep used when a rate-limit response carries no usable hint, in seconds
    pub default_retry_after_secs: u64,
    /// Upper bound of the random jitter added to every sleep, in milliseconds
    pub max_jitter_ms: u64,
    /// Longest `Retry-After` hint honoured, in seconds; larger hints are capped
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_retry_after_secs: 12,
            max_jitter_ms: 1500,
            max_retry_after_secs: 300,
        }
    }
}

impl RetryConfig {
    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }
}

/// Fixed parameters sent with every video job
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub fps: u32,
    pub num_frames: u32,
    pub target_resolution: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 24,
            num_frames: 24,
            target_resolution: "480p".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from `.env`, the optional config file and the
    /// process environment, then validate it.
    pub fn load() -> ConfigResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }

        let file = env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::from_sources(file.as_deref())
    }

    /// Build the configuration from an optional file plus the environment
    pub fn from_sources(file: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Config::builder()
            .set_default(
                "gemini.api_key",
                env::var("GOOGLE_API_KEY").unwrap_or_default(),
            )?
            .set_default(
                "replicate.api_token",
                env::var("REPLICATE_API_TOKEN").unwrap_or_default(),
            )?;

        if let Some(path) = file {
            info!("Reading configuration file {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let mut config: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.clean_credentials();
        config.validate()?;
        Ok(config)
    }

    /// Strip the noise credentials tend to pick up when pasted into `.env`
    /// files: a leading byte-order mark, whitespace and surrounding quotes.
    pub fn clean_credentials(&mut self) {
        self.gemini.api_key = clean_secret(&self.gemini.api_key);
        self.replicate.api_token = clean_secret(&self.replicate.api_token);
        self.auth.jwt_secret = clean_secret(&self.auth.jwt_secret);
    }

    /// Fail fast on absent or malformed values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.gemini.api_key.is_empty() {
            return Err(ConfigError::Missing("gemini.api_key"));
        }

        if self.replicate.api_token.is_empty() {
            return Err(ConfigError::Missing("replicate.api_token"));
        }
        if !self.replicate.api_token.starts_with("r8_") {
            return Err(ConfigError::Invalid {
                key: "replicate.api_token",
                reason: "expected a token starting with r8_".to_string(),
            });
        }
        if self.replicate.video_model.split_once('/').is_none() {
            return Err(ConfigError::Invalid {
                key: "replicate.video_model",
                reason: format!("expected owner/name, got {}", self.replicate.video_model),
            });
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("auth.jwt_secret"));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        let media_url = &self.storage.media_url;
        if media_url.len() < 3 || !media_url.starts_with('/') || !media_url.ends_with('/') {
            return Err(ConfigError::Invalid {
                key: "storage.media_url",
                reason: format!("must be a non-root path like /media/, got {}", media_url),
            });
        }

        Ok(())
    }
}

fn clean_secret(value: &str) -> String {
    value
        .trim_start_matches('\u{feff}')
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const VARS: &[&str] = &[
        "GOOGLE_API_KEY",
        "REPLICATE_API_TOKEN",
        "GENERATOR__GEMINI__API_KEY",
        "GENERATOR__REPLICATE__API_TOKEN",
        "GENERATOR__AUTH__JWT_SECRET",
        "GENERATOR__RETRY__MAX_ATTEMPTS",
        "GENERATOR__SERVER__PORT",
    ];

    fn reset_env() {
        for var in VARS {
            // SAFETY: tests touching the environment are serialized.
            unsafe { env::remove_var(var) };
        }
    }

    fn set(key: &str, value: &str) {
        // SAFETY: tests touching the environment are serialized.
        unsafe { env::set_var(key, value) };
    }

    fn valid() -> AppConfig {
        AppConfig {
            gemini: GeminiConfig {
                api_key: "gemini-key".to_string(),
                ..Default::default()
            },
            replicate: ReplicateConfig {
                api_token: "r8_token".to_string(),
                ..Default::default()
            },
            auth: AuthConfig {
                jwt_secret: "secret".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    #[serial]
    fn test_load_from_prefixed_environment() {
        reset_env();
        set("GENERATOR__GEMINI__API_KEY", "gemini-key");
        set("GENERATOR__REPLICATE__API_TOKEN", "r8_abc");
        set("GENERATOR__AUTH__JWT_SECRET", "secret");
        set("GENERATOR__SERVER__PORT", "9100");

        let config = AppConfig::from_sources(None).expect("config should load");
        assert_eq!(config.gemini.api_key, "gemini-key");
        assert_eq!(config.replicate.api_token, "r8_abc");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.default_retry_after(), Duration::from_secs(12));
        assert_eq!(config.replicate.video_model, "bytedance/seedance-1-pro-fast");
        assert_eq!(config.video.fps, 24);
        reset_env();
    }

    #[test]
    #[serial]
    fn test_alias_variables_are_cleaned() {
        reset_env();
        set("GOOGLE_API_KEY", "\u{feff} \"gemini-key\" ");
        set("REPLICATE_API_TOKEN", "'r8_quoted'");
        set("GENERATOR__AUTH__JWT_SECRET", "secret");

        let config = AppConfig::from_sources(None).expect("config should load");
        assert_eq!(config.gemini.api_key, "gemini-key");
        assert_eq!(config.replicate.api_token, "r8_quoted");
        reset_env();
    }

    #[test]
    #[serial]
    fn test_prefixed_variables_override_aliases() {
        reset_env();
        set("REPLICATE_API_TOKEN", "r8_alias");
        set("GENERATOR__REPLICATE__API_TOKEN", "r8_prefixed");
        set("GENERATOR__GEMINI__API_KEY", "gemini-key");
        set("GENERATOR__AUTH__JWT_SECRET", "secret");

        let config = AppConfig::from_sources(None).expect("config should load");
        assert_eq!(config.replicate.api_token, "r8_prefixed");
        reset_env();
    }

    #[test]
    #[serial]
    fn test_file_source_is_layered_under_environment() {
        reset_env();
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            r#"
[gemini]
api_key = "from-file"

[replicate]
api_token = "r8_file"
poll_interval_ms = 250

[auth]
jwt_secret = "file-secret"

[retry]
max_attempts = 5
"#
        )
        .expect("write config");
        set("GENERATOR__RETRY__MAX_ATTEMPTS", "2");

        let config = AppConfig::from_sources(Some(file.path())).expect("config should load");
        assert_eq!(config.gemini.api_key, "from-file");
        assert_eq!(config.replicate.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 2);
        reset_env();
    }

    #[test]
    #[serial]
    fn test_missing_gemini_key_fails_fast() {
        reset_env();
        set("GENERATOR__REPLICATE__API_TOKEN", "r8_abc");
        set("GENERATOR__AUTH__JWT_SECRET", "secret");

        let err = AppConfig::from_sources(None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("gemini.api_key")));
        reset_env();
    }

    #[test]
    fn test_replicate_token_prefix_is_enforced() {
        let mut config = valid();
        config.replicate.api_token = "sk_live".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "replicate.api_token",
                ..
            }
        ));
    }

    #[test]
    fn test_media_url_must_be_a_directory_prefix() {
        let mut config = valid();
        config.storage.media_url = "/media".to_string();
        assert!(config.validate().is_err());

        config.storage.media_url = "/".to_string();
        assert!(config.validate().is_err());

        config.storage.media_url = "/media/".to_string();
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = valid();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
