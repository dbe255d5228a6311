//! Configuration module for Cloud Archiver
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and comprehensive validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Parse configuration from a YAML string (env vars are expanded first)
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        ConfigLoader::parse(content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.kind == BackendKind::B2 {
            if !is_valid_http_url(&self.backend.auth_url) {
                return Err(ConfigError::ValidationError(
                    "Invalid auth_url: must start with http:// or https://".into(),
                ));
            }

            if self.backend.bucket_id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "bucket_id is required when the b2 backend is enabled".into(),
                ));
            }
        }

        let transfer = &self.transfer;

        if transfer.max_part_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_part_size must be greater than zero".into(),
            ));
        }

        if transfer.workers == Some(0) {
            return Err(ConfigError::ValidationError(
                "workers must be greater than zero when set".into(),
            ));
        }

        if transfer.hash_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "hash_buffer_size must be greater than zero".into(),
            ));
        }

        if transfer.download_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "download_attempts must be greater than zero".into(),
            ));
        }

        if transfer.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be greater than zero".into(),
            ));
        }

        if transfer.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid backoff_multiplier {}: must be at least 1.0",
                transfer.retry.backoff_multiplier
            )));
        }

        Ok(())
    }
}

/// Which cloud backend archives the files.
///
/// The set is closed: adding a backend means adding a variant here and a
/// constructor arm in [`crate::cloud::Backend::from_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Files stay on local disk only
    #[default]
    None,
    /// Backblaze B2 native API
    B2,
}

/// Cloud backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub application_key: Option<String>,
    #[serde(default)]
    pub bucket_id: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            auth_url: default_auth_url(),
            key_id: None,
            application_key: None,
            bucket_id: String::new(),
        }
    }
}

fn default_auth_url() -> String {
    "https://api.backblazeb2.com/b2api/v2/b2_authorize_account".to_string()
}

/// Transfer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Upper bound for the negotiated part size, in bytes. Default: 20MB
    #[serde(default = "default_max_part_size")]
    pub max_part_size: u64,

    /// Concurrent part uploads. Default: available host parallelism
    #[serde(default)]
    pub workers: Option<usize>,

    /// Unfinished large uploads older than this are cancelled. Default: 24
    #[serde(default = "default_expire_hours")]
    pub expire_unfinished_after_hours: u64,

    /// Compare downloaded bytes against the declared SHA-1. Default: true
    #[serde(default = "default_verify_downloads")]
    pub verify_downloads: bool,

    /// Lifetime of public download links in seconds. Default: 86400
    #[serde(default = "default_download_url_ttl")]
    pub download_url_ttl_secs: u64,

    /// Attempts per ranged download request. Default: 5
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,

    /// Read buffer used when hashing whole files. Default: 64KB
    #[serde(default = "default_hash_buffer_size")]
    pub hash_buffer_size: usize,

    /// Per-request HTTP timeout. Default: none (client defaults)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_part_size: default_max_part_size(),
            workers: None,
            expire_unfinished_after_hours: default_expire_hours(),
            verify_downloads: default_verify_downloads(),
            download_url_ttl_secs: default_download_url_ttl(),
            download_attempts: default_download_attempts(),
            hash_buffer_size: default_hash_buffer_size(),
            request_timeout_secs: None,
            retry: RetryConfig::default(),
        }
    }
}

impl TransferConfig {
    /// Per-request HTTP timeout, if configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Worker pool size for multipart uploads
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn default_max_part_size() -> u64 {
    20971520 // 20MB
}

fn default_expire_hours() -> u64 {
    24
}

fn default_verify_downloads() -> bool {
    true
}

fn default_download_url_ttl() -> u64 {
    86400 // 24 hours
}

fn default_download_attempts() -> u32 {
    5
}

fn default_hash_buffer_size() -> usize {
    65536
}

/// Retry policy for uploads.
///
/// # Example
///
/// ```yaml
/// retry:
///   max_attempts: 5
///   initial_backoff_ms: 100
///   max_backoff_ms: 5000
///   backoff_multiplier: 2.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first. Default: 5
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt. Default: 100
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Ceiling for any single delay. Default: 5000
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays. Default: 2.0
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// A policy that retries immediately, as many times as given.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff_ms as f64);

        Duration::from_millis(capped as u64)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
