//! B2 Credentials Module
//!
//! Loads the long-lived application key that is exchanged for a session
//! token at authorization time.
//!
//! # Example
//!
//! ```
//! use cloud_archiver::b2::Credentials;
//!
//! let creds = Credentials::new("key-id", "application-key");
//! assert_eq!(creds.key_id(), "key-id");
//! assert!(creds.basic_auth_header().starts_with("Basic "));
//! ```

use crate::config::BackendConfig;
use base64::Engine;
use thiserror::Error;

/// Environment variable holding the application key ID
pub const KEY_ID_ENV: &str = "B2_APPLICATION_KEY_ID";

/// Environment variable holding the application key
pub const APPLICATION_KEY_ENV: &str = "B2_APPLICATION_KEY";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Application key pair
#[derive(Clone)]
pub struct Credentials {
    key_id: String,
    application_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("application_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Create new credentials
    pub fn new(key_id: impl Into<String>, application_key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            application_key: application_key.into(),
        }
    }

    /// Get the application key ID
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// `Authorization` header value for `b2_authorize_account`
    pub fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.key_id, self.application_key);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }

    /// Load credentials from environment variables
    ///
    /// Looks for:
    /// - `B2_APPLICATION_KEY_ID`
    /// - `B2_APPLICATION_KEY`
    pub fn from_env() -> Result<Self, CredentialsError> {
        let key_id = std::env::var(KEY_ID_ENV).map_err(|_| {
            CredentialsError::MissingCredentials(format!("{} not set", KEY_ID_ENV))
        })?;

        let application_key = std::env::var(APPLICATION_KEY_ENV).map_err(|_| {
            CredentialsError::MissingCredentials(format!("{} not set", APPLICATION_KEY_ENV))
        })?;

        Ok(Self::new(key_id, application_key))
    }

    /// Load credentials from the backend configuration
    pub fn from_config(config: &BackendConfig) -> Result<Self, CredentialsError> {
        let key_id = config.key_id.as_ref().ok_or_else(|| {
            CredentialsError::MissingCredentials("key_id not set in config".into())
        })?;

        let application_key = config.application_key.as_ref().ok_or_else(|| {
            CredentialsError::MissingCredentials("application_key not set in config".into())
        })?;

        Ok(Self::new(key_id.clone(), application_key.clone()))
    }

    /// Configuration first, then the environment
    pub fn resolve(config: &BackendConfig) -> Result<Self, CredentialsError> {
        Self::from_config(config).or_else(|_| Self::from_env())
    }
}
