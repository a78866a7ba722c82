//! Configuration management for the snapshot service.
//!
//! Configuration is read from a single file (format inferred from a known
//! extension, YAML otherwise) and may be overridden by environment
//! variables prefixed with `SNAPSHOT_`. Missing or non-positive timings are
//! replaced with defaults after deserialization, so a loaded
//! [`CaptureConfig`] always has usable intervals.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extensions the `config` crate recognizes on its own.
const KNOWN_EXTENSIONS: &[&str] = &["yaml", "yml", "toml", "json", "json5", "ini", "ron"];

/// Default delay between two capture attempts.
pub const DEFAULT_INTERVAL_MS: i64 = 1000;

/// Default deadline for one capture or delivery call.
pub const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 5000;

/// Main configuration for the snapshot service.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// RTSP stream URL (e.g., "rtsp://camera:554/stream")
    #[serde(default)]
    pub rtsp_url: String,

    /// Delay between capture attempts in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: i64,

    /// Endpoint that receives frames over HTTP POST. Unset means local files.
    #[serde(default)]
    pub post_url: Option<String>,

    /// Path to the ffmpeg executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Deadline for the ffmpeg run and for the HTTP request, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: i64,

    /// Directory receiving frames when no endpoint is configured
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory holding the daily log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log line format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where captured frames end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// One file per frame under this directory.
    Local { output_dir: PathBuf },
    /// One POST per frame to this endpoint.
    Remote { endpoint: String },
}

// Default value functions
fn default_interval_ms() -> i64 {
    DEFAULT_INTERVAL_MS
}
fn default_request_timeout_ms() -> i64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
fn default_ffmpeg_path() -> String {
    if cfg!(windows) {
        "ffmpeg.exe".to_string()
    } else {
        "ffmpeg".to_string()
    }
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("frames")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl CaptureConfig {
    /// Load configuration from `path`, then apply `SNAPSHOT_*` environment
    /// overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let known = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        let file = if known {
            File::from(path)
        } else {
            File::from(path).format(FileFormat::Yaml)
        };

        let config = Config::builder()
            .add_source(file.required(true))
            // e.g. SNAPSHOT_INTERVAL_MS=250
            .add_source(Environment::with_prefix("SNAPSHOT").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize::<Self>()?.normalized())
    }

    /// Parse configuration from an in-memory YAML document.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(document, FileFormat::Yaml))
            .build()?;

        Ok(config.try_deserialize::<Self>()?.normalized())
    }

    /// Substitute defaults for absent, empty or non-positive values.
    pub fn normalized(mut self) -> Self {
        if self.interval_ms <= 0 {
            self.interval_ms = DEFAULT_INTERVAL_MS;
        }
        if self.request_timeout_ms <= 0 {
            self.request_timeout_ms = DEFAULT_REQUEST_TIMEOUT_MS;
        }
        if self.ffmpeg_path.trim().is_empty() {
            self.ffmpeg_path = default_ffmpeg_path();
        }
        if self.output_dir.as_os_str().is_empty() {
            self.output_dir = default_output_dir();
        }
        if self.log_dir.as_os_str().is_empty() {
            self.log_dir = default_log_dir();
        }
        if self.log_level.trim().is_empty() {
            self.log_level = default_log_level();
        }
        self.post_url = self
            .post_url
            .take()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.rtsp_url.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("rtsp_url".to_string()));
        }

        if let Some(url) = &self.post_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigValidationError::InvalidValue {
                    field: "post_url".to_string(),
                    message: "URL must start with http:// or https://".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get capture interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1) as u64)
    }

    /// Get per-attempt deadline as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1) as u64)
    }

    /// Local directory wins unless an endpoint is configured.
    pub fn delivery_target(&self) -> DeliveryTarget {
        match &self.post_url {
            Some(endpoint) => DeliveryTarget::Remote {
                endpoint: endpoint.clone(),
            },
            None => DeliveryTarget::Local {
                output_dir: self.output_dir.clone(),
            },
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
