//! Cloud backends for archived objects
//!
//! The archive hands [`StoredObject`] records to a [`CloudBackend`]; the
//! backend moves the bytes and updates the record's status and metadata.
//! Which backend is active is decided once, from configuration, by
//! [`Backend::from_config`].

use crate::b2::{B2Client, Credentials, FileVersion};
use crate::config::{BackendKind, Config};
use crate::transfer::{DownloadOutcome, TransferError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub mod b2;

pub use self::b2::B2Backend;

/// Where an object's bytes currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    /// Only on local disk
    Local,
    /// An upload is in flight
    Uploading,
    /// Stored in the cloud
    Stored,
    /// Last upload attempt failed
    Failed,
}

/// An archived file as tracked by the object record store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: u64,
    /// Logical name in the bucket, e.g. `events/42/opening.mp3`
    pub name: String,
    /// Local file path
    pub path: PathBuf,
    pub size: u64,
    pub content_sha1: Option<String>,
    pub status: ObjectStatus,
    /// Sent as `X-Bz-Info-*` on upload
    #[serde(default)]
    pub info: BTreeMap<String, String>,
    /// Backend metadata of the stored version; `Null` until uploaded
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl StoredObject {
    pub fn new(id: u64, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            size: 0,
            content_sha1: None,
            status: ObjectStatus::Local,
            info: BTreeMap::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    /// Backend file id, once stored
    pub fn file_id(&self) -> Option<&str> {
        self.metadata.get("fileId").and_then(serde_json::Value::as_str)
    }
}

/// Operations the archive needs from a cloud store
#[async_trait::async_trait]
pub trait CloudBackend: Send + Sync {
    /// Check credentials and bucket; returns the bucket name
    async fn test_configuration(&self) -> Result<String, TransferError>;

    /// Current backend metadata of a stored object
    async fn object_info(&self, object: &StoredObject) -> Result<FileVersion, TransferError>;

    /// Upload the object's local file and record the result on the object
    async fn upload_object(&self, object: &mut StoredObject) -> Result<(), TransferError>;

    /// Restore the object's local file from the cloud
    async fn download_object(&self, object: &StoredObject) -> Result<DownloadOutcome, TransferError>;

    /// Time-limited public URL for a stored object
    async fn public_download_url(&self, object: &StoredObject) -> Result<String, TransferError>;
}

/// The configured cloud backend
#[derive(Debug)]
pub enum Backend {
    Disabled,
    B2(B2Backend),
}

impl Backend {
    /// Build (and, for B2, connect) the backend selected in `config`
    pub async fn from_config(config: &Config) -> Result<Self, TransferError> {
        match config.backend.kind {
            BackendKind::None => {
                tracing::info!("Cloud backend disabled");
                Ok(Self::Disabled)
            }
            BackendKind::B2 => {
                let credentials = Credentials::resolve(&config.backend)
                    .map_err(|e| TransferError::ConfigurationError(e.to_string()))?;
                let client = B2Client::new(config.transfer.request_timeout())?;
                let backend = B2Backend::connect(
                    client,
                    &config.backend.auth_url,
                    credentials,
                    &config.backend.bucket_id,
                    config.transfer.clone(),
                )
                .await?;
                Ok(Self::B2(backend))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Disabled => BackendKind::None,
            Self::B2(_) => BackendKind::B2,
        }
    }

    /// Cloud operations, unless disabled
    pub fn cloud(&self) -> Option<&dyn CloudBackend> {
        match self {
            Self::Disabled => None,
            Self::B2(backend) => Some(backend),
        }
    }
}

/// Outcome of an [`upload_pending`] sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Upload every object still only on local disk.
///
/// A failure is logged and counted; the sweep continues with the next object.
pub async fn upload_pending(
    backend: &dyn CloudBackend,
    objects: &mut [StoredObject],
) -> UploadSummary {
    let mut summary = UploadSummary::default();

    for object in objects.iter_mut() {
        if object.status != ObjectStatus::Local {
            summary.skipped += 1;
            continue;
        }

        match backend.upload_object(object).await {
            Ok(()) => summary.uploaded += 1,
            Err(e) => {
                tracing::error!(object_id = object.id, name = %object.name, error = %e, "Upload failed");
                crate::metrics::record_error(e.kind());
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        uploaded = summary.uploaded,
        failed = summary.failed,
        skipped = summary.skipped,
        "Upload sweep finished"
    );

    summary
}
