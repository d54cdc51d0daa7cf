//! Configuration module for streamload.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, UploadError};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upload limits and staging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum length of the multipart boundary token.
    #[serde(default = "default_boundary_length_limit")]
    pub boundary_length_limit: usize,
    /// Maximum number of form values per request.
    #[serde(default = "default_value_count_limit")]
    pub value_count_limit: usize,
    /// Maximum request body size in bytes.
    #[serde(default = "default_body_length_limit")]
    pub body_length_limit: u64,
    /// Maximum size of a single form value in bytes.
    #[serde(default = "default_value_length_limit")]
    pub value_length_limit: usize,
    /// File extensions accepted for upload (e.g. ".png").
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Root directory for per-request staging directories.
    #[serde(default = "default_staging_path")]
    pub staging_path: String,
}

fn default_boundary_length_limit() -> usize {
    128
}

fn default_value_count_limit() -> usize {
    1024
}

fn default_body_length_limit() -> u64 {
    1024 * 1024 * 1024 // 1GiB
}

fn default_value_length_limit() -> usize {
    4 * 1024 * 1024 // 4MiB
}

fn default_allowed_extensions() -> Vec<String> {
    [".jpg", ".png", ".pdf", ".mp3", ".m4a"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_staging_path() -> String {
    "data/staging".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            boundary_length_limit: default_boundary_length_limit(),
            value_count_limit: default_value_count_limit(),
            body_length_limit: default_body_length_limit(),
            value_length_limit: default_value_length_limit(),
            allowed_extensions: default_allowed_extensions(),
            staging_path: default_staging_path(),
        }
    }
}

/// Durable store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Sharded directory on the local filesystem.
    #[default]
    Local,
    /// HTTP object storage.
    Remote,
}

/// Remote object store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStoreConfig {
    /// Base URL of the object store (e.g. "https://blobs.example.com").
    #[serde(default)]
    pub endpoint: String,
    /// Bucket (container) name.
    #[serde(default)]
    pub bucket: String,
    /// Bearer token sent with every request (empty = none).
    #[serde(default)]
    pub token: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

fn default_remote_timeout() -> u64 {
    300
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            token: String::new(),
            timeout_secs: default_remote_timeout(),
        }
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Which backend receives committed files.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Base directory for the local backend.
    #[serde(default = "default_local_path")]
    pub local_path: String,
    /// Maximum number of concurrent puts per batch.
    #[serde(default = "default_commit_concurrency")]
    pub commit_concurrency: usize,
    /// Remote backend settings.
    #[serde(default)]
    pub remote: RemoteStoreConfig,
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_commit_concurrency() -> usize {
    1
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            local_path: default_local_path(),
            commit_concurrency: default_commit_concurrency(),
            remote: RemoteStoreConfig::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/streamload.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(UploadError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| UploadError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `STREAMLOAD_STORE_TOKEN`: Override the remote store bearer token
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("STREAMLOAD_STORE_TOKEN") {
            if !token.is_empty() {
                self.storage.remote.token = token;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let upload = &self.upload;
        if upload.boundary_length_limit == 0
            || upload.value_count_limit == 0
            || upload.body_length_limit == 0
            || upload.value_length_limit == 0
        {
            return Err(UploadError::Config(
                "upload limits must be greater than zero".to_string(),
            ));
        }
        if self.storage.commit_concurrency == 0 {
            return Err(UploadError::Config(
                "storage.commit_concurrency must be at least 1".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Remote
            && (self.storage.remote.endpoint.is_empty() || self.storage.remote.bucket.is_empty())
        {
            return Err(UploadError::Config(
                "remote storage requires storage.remote.endpoint and storage.remote.bucket"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
