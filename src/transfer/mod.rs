//! Transfer engine
//!
//! Moves files between local disk and the object store:
//!
//! - [`direct`]: single-request upload for files below the part size
//! - [`multipart`]: parallel part upload for everything else
//! - [`resume`]: finds and validates an interrupted multipart upload
//! - [`janitor`]: cancels multipart uploads abandoned long ago
//! - [`download`]: sequential ranged download with integrity check
//!
//! All operations take a [`TransferContext`], a cheap-to-clone bundle of the
//! HTTP client, the current session and the verified bucket.

use crate::b2::{B2Client, B2ClientError, Bucket, FileVersion, Session};
use crate::config::TransferConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod direct;
pub mod download;
pub mod hash;
pub mod janitor;
pub mod multipart;
pub mod resume;
pub mod session;

pub use download::{download, DownloadOutcome};

/// Transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Authorization failed: {0}")]
    AuthorizationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("File not stored: {0}")]
    FileNotStored(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {reason}")]
    DownloadError { status: Option<u16>, reason: String },

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityError { expected: String, actual: String },

    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Local file missing: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    BackendError(#[from] B2ClientError),
}

impl TransferError {
    /// Whether the failure was caused by an expired session token
    pub fn is_expired_token(&self) -> bool {
        matches!(self, Self::BackendError(e) if e.is_expired_token())
    }

    /// Short label used for error metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizationError(_) => "authorization",
            Self::ConfigurationError(_) => "configuration",
            Self::FileNotStored(_) => "file_not_stored",
            Self::UploadFailed(_) => "upload_failed",
            Self::DownloadError { .. } => "download",
            Self::IntegrityError { .. } => "integrity",
            Self::InvalidObject(_) => "invalid_object",
            Self::FileMissing(_) => "file_missing",
            Self::IoError(_) => "io",
            Self::BackendError(_) => "backend",
        }
    }
}

/// Everything a transfer needs to talk to the bucket
#[derive(Debug, Clone)]
pub struct TransferContext {
    pub client: B2Client,
    pub session: Arc<Session>,
    pub bucket: Bucket,
    pub settings: TransferConfig,
}

impl TransferContext {
    pub fn new(client: B2Client, session: Session, bucket: Bucket, settings: TransferConfig) -> Self {
        Self {
            client,
            session: Arc::new(session),
            bucket,
            settings,
        }
    }

    /// Working part size negotiated for this session
    pub fn part_size(&self) -> u64 {
        self.session.part_size
    }
}

/// A contiguous byte range of the source file, numbered from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    pub number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Split `file_size` bytes into parts of `part_size`; the last part takes the
/// remainder. Numbers are contiguous from 1.
pub fn partition(file_size: u64, part_size: u64) -> Vec<Part> {
    let part_size = part_size.max(1);
    let count = file_size.div_ceil(part_size);

    (0..count)
        .map(|index| {
            let offset = index * part_size;
            Part {
                number: index as u32 + 1,
                offset,
                length: part_size.min(file_size - offset),
            }
        })
        .collect()
}

/// Upload state of a single part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    Pending,
    Uploaded,
    Failed,
}

/// Recorded outcome of a part; `sha1` is set only once uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResult {
    pub status: PartStatus,
    pub sha1: Option<String>,
}

/// A large upload in progress
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub file_name: String,
    /// Backend id of the unfinished large file, once started
    pub upload_id: Option<String>,
    /// SHA-1 of the whole source file
    pub content_sha1: String,
    pub part_size: u64,
    pub parts: BTreeMap<u32, PartResult>,
}

impl UploadJob {
    pub fn new(file_name: impl Into<String>, content_sha1: impl Into<String>, part_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            upload_id: None,
            content_sha1: content_sha1.into(),
            part_size,
            parts: BTreeMap::new(),
        }
    }

    pub fn with_upload_id(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }

    /// Record a stored part. The first recorded hash for a part sticks.
    pub fn mark_uploaded(&mut self, number: u32, sha1: impl Into<String>) {
        let entry = self.parts.entry(number).or_insert(PartResult {
            status: PartStatus::Pending,
            sha1: None,
        });
        if entry.status != PartStatus::Uploaded {
            entry.status = PartStatus::Uploaded;
            entry.sha1 = Some(sha1.into());
        }
    }

    pub fn mark_failed(&mut self, number: u32) {
        let entry = self.parts.entry(number).or_insert(PartResult {
            status: PartStatus::Pending,
            sha1: None,
        });
        if entry.status != PartStatus::Uploaded {
            entry.status = PartStatus::Failed;
        }
    }

    pub fn is_uploaded(&self, number: u32) -> bool {
        self.parts
            .get(&number)
            .is_some_and(|p| p.status == PartStatus::Uploaded)
    }

    pub fn uploaded_count(&self) -> usize {
        self.parts
            .values()
            .filter(|p| p.status == PartStatus::Uploaded)
            .count()
    }

    /// Part hashes for parts `1..=total`, in part-number order.
    ///
    /// Fails if any of them is not uploaded.
    pub fn ordered_part_sha1s(&self, total: usize) -> Result<Vec<String>, TransferError> {
        (1..=total as u32)
            .map(|number| match self.parts.get(&number) {
                Some(PartResult {
                    status: PartStatus::Uploaded,
                    sha1: Some(sha1),
                }) => Ok(sha1.clone()),
                _ => Err(TransferError::UploadFailed(format!(
                    "part {} of {} is not uploaded",
                    number, self.file_name
                ))),
            })
            .collect()
    }
}

/// Upload a local file under `file_name`, picking the direct or multipart
/// path by size.
pub async fn upload_file(
    ctx: &TransferContext,
    path: &Path,
    info: &BTreeMap<String, String>,
    file_name: &str,
) -> Result<FileVersion, TransferError> {
    let file_size = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Err(TransferError::FileMissing(path.to_path_buf())),
    };

    if file_size < ctx.part_size() {
        direct::upload_small(ctx, path, info, file_name).await
    } else {
        multipart::upload_large(ctx, path, info, file_name).await
    }
}
