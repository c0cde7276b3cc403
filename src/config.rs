//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special variables (HOST, PORT, APP_KEY, SECRET_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_SCORING__BASE_URL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Credentials:
//! The application key and secret key of the scoring service are loaded once at
//! startup and never change afterwards. Missing credentials are a startup failure,
//! not a per-request error.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, scoring, transcoder)
/// keeps each concern next to the component that consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scoring: ScoringConfig,
    pub transcoder: TranscoderConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to (e.g., "127.0.0.1", "0.0.0.0")
/// - `port`: TCP port number to listen on
/// - `max_upload_bytes`: Largest accepted audio upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

/// Remote scoring service settings.
///
/// ## Fields:
/// - `base_url`: Scheme and host of the scoring service; the core type is appended as the path
/// - `app_key` / `secret_key`: Credential pair used to sign every session envelope
/// - `user_id`: Subject identifier placed in the subject-scope signature
/// - `request_index`: Constant value of the `Request-Index` header
#[derive(Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub base_url: String,
    pub app_key: String,
    pub secret_key: String,
    pub user_id: String,
    pub request_index: String,
}

impl std::fmt::Debug for ScoringConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringConfig")
            .field("base_url", &self.base_url)
            .field("app_key", &self.app_key)
            .field("secret_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("request_index", &self.request_index)
            .finish()
    }
}

/// Settings for the external transcoding engine (ffmpeg).
///
/// The output targets are configurable only so they show up in one place;
/// `validate()` rejects anything other than 16kHz mono s16, since the
/// scoring service requires exactly that format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub ffmpeg_path: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: String,
    pub sample_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 80,
                max_upload_bytes: 50 * 1024 * 1024,  // 50MB
            },
            scoring: ScoringConfig {
                base_url: "https://api.speechsuper.com".to_string(),
                app_key: String::new(),       // Must come from APP_KEY
                secret_key: String::new(),    // Must come from SECRET_KEY
                user_id: "uid".to_string(),
                request_index: "0".to_string(),
            },
            transcoder: TranscoderConfig {
                ffmpeg_path: "ffmpeg".to_string(),  // Resolved through PATH
                sample_rate: 16000,
                channels: 1,
                bitrate: "96k".to_string(),
                sample_format: "s16".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_TRANSCODER__FFMPEG_PATH=/usr/bin/ffmpeg`: Override the ffmpeg binary
    ///   (double underscore separates nesting so field names keep their own underscores)
    /// - `APP_KEY=...` / `SECRET_KEY=...`: Scoring service credentials
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Credential variable names are shared with existing deployments
        if let Ok(app_key) = env::var("APP_KEY") {
            settings = settings.set_override("scoring.app_key", app_key)?;
        }

        if let Ok(secret_key) = env::var("SECRET_KEY") {
            settings = settings.set_override("scoring.secret_key", secret_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 and the upload cap is positive
    /// - Both scoring credentials are present
    /// - The base URL is set
    /// - The transcoder targets 16kHz, mono, signed 16-bit samples
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.scoring.app_key.trim().is_empty() {
            return Err(anyhow::anyhow!("APP_KEY is not configured"));
        }

        if self.scoring.secret_key.trim().is_empty() {
            return Err(anyhow::anyhow!("SECRET_KEY is not configured"));
        }

        if self.scoring.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Scoring service base URL cannot be empty"));
        }

        if self.transcoder.ffmpeg_path.trim().is_empty() {
            return Err(anyhow::anyhow!("ffmpeg path cannot be empty"));
        }

        if self.transcoder.sample_rate != 16000
            || self.transcoder.channels != 1
            || self.transcoder.sample_format != "s16"
        {
            return Err(anyhow::anyhow!(
                "Transcoder must target 16000 Hz mono s16, got {} Hz, {} channel(s), {}",
                self.transcoder.sample_rate,
                self.transcoder.channels,
                self.transcoder.sample_format
            ));
        }

        Ok(())
    }
}
