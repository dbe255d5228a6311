//! B2 cloud backend
//!
//! Holds the current [`TransferContext`] behind a lock. When a call fails
//! because the session token expired, the backend authenticates again,
//! swaps in the new context and repeats the call once.

use super::{CloudBackend, ObjectStatus, StoredObject};
use crate::b2::{encode_name, B2Client, Credentials, FileVersion};
use crate::config::TransferConfig;
use crate::metrics;
use crate::transfer::{self, download, janitor, session, DownloadOutcome, TransferContext, TransferError};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use tokio::sync::RwLock;

/// Backblaze B2 backend
#[derive(Debug)]
pub struct B2Backend {
    client: B2Client,
    auth_url: String,
    credentials: Credentials,
    bucket_id: String,
    settings: TransferConfig,
    context: RwLock<TransferContext>,
}

impl B2Backend {
    /// Authenticate and verify the bucket
    pub async fn connect(
        client: B2Client,
        auth_url: &str,
        credentials: Credentials,
        bucket_id: &str,
        settings: TransferConfig,
    ) -> Result<Self, TransferError> {
        let context = establish(&client, auth_url, &credentials, bucket_id, &settings).await?;

        tracing::info!(
            bucket = %context.bucket.name,
            part_size = context.part_size(),
            "Connected to B2"
        );

        Ok(Self {
            client,
            auth_url: auth_url.to_string(),
            credentials,
            bucket_id: bucket_id.to_string(),
            settings,
            context: RwLock::new(context),
        })
    }

    /// Snapshot of the current context
    pub async fn context(&self) -> TransferContext {
        self.context.read().await.clone()
    }

    pub async fn bucket_name(&self) -> String {
        self.context.read().await.bucket.name.clone()
    }

    async fn refresh(&self) -> Result<TransferContext, TransferError> {
        tracing::info!("Session token expired, authenticating again");
        let context = establish(
            &self.client,
            &self.auth_url,
            &self.credentials,
            &self.bucket_id,
            &self.settings,
        )
        .await?;

        *self.context.write().await = context.clone();
        metrics::record_session_refresh();
        Ok(context)
    }

    /// Run `op` with the current context; on an expired token, refresh the
    /// session and run it once more.
    async fn with_session<T, F, Fut>(&self, op: F) -> Result<T, TransferError>
    where
        F: Fn(TransferContext) -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        match op(self.context().await).await {
            Err(e) if e.is_expired_token() => op(self.refresh().await?).await,
            other => other,
        }
    }

    /// Upload a local file under `file_name`
    pub async fn upload_file(
        &self,
        path: &Path,
        info: &BTreeMap<String, String>,
        file_name: &str,
    ) -> Result<FileVersion, TransferError> {
        self.with_session(move |ctx| async move {
            transfer::upload_file(&ctx, path, info, file_name).await
        })
        .await
    }

    /// Download `file_name` into `dest`
    pub async fn download_file(
        &self,
        file_name: &str,
        dest: &Path,
        expected_sha1: Option<&str>,
    ) -> Result<DownloadOutcome, TransferError> {
        self.with_session(move |ctx| async move {
            download::download(&ctx, file_name, dest, expected_sha1).await
        })
        .await
    }

    /// Time-limited URL for downloading `file_name` without credentials
    pub async fn download_url(&self, file_name: &str) -> Result<String, TransferError> {
        let ttl = self.settings.download_url_ttl_secs;
        self.with_session(move |ctx| async move {
            let authorization = ctx
                .client
                .get_download_authorization(&ctx.session, &ctx.bucket.id, file_name, ttl)
                .await?;

            Ok::<_, TransferError>(format!(
                "{}?Authorization={}",
                download::object_url(&ctx, &encode_name(file_name)),
                authorization.authorization_token
            ))
        })
        .await
    }

    /// Metadata of a stored file version
    pub async fn file_info(&self, file_id: &str) -> Result<FileVersion, TransferError> {
        self.with_session(move |ctx| async move {
            ctx.client
                .get_file_info(&ctx.session, file_id)
                .await
                .map_err(TransferError::from)
        })
        .await
    }

    /// Cancel unfinished uploads older than the configured retention window
    pub async fn expire_unfinished_uploads(&self) -> Result<usize, TransferError> {
        let hours = self.settings.expire_unfinished_after_hours;
        self.with_session(move |ctx| async move { janitor::expire_old_uploads(&ctx, hours).await })
            .await
    }
}

async fn establish(
    client: &B2Client,
    auth_url: &str,
    credentials: &Credentials,
    bucket_id: &str,
    settings: &TransferConfig,
) -> Result<TransferContext, TransferError> {
    let session = session::authenticate(client, auth_url, credentials, settings.max_part_size).await?;
    let bucket = session::verify_bucket(client, &session, bucket_id).await?;
    Ok(TransferContext::new(client.clone(), session, bucket, settings.clone()))
}

fn require_file_id(object: &StoredObject) -> Result<&str, TransferError> {
    object.file_id().ok_or_else(|| {
        TransferError::FileNotStored(format!("object {} ({}) has no cloud copy", object.id, object.name))
    })
}

#[async_trait::async_trait]
impl CloudBackend for B2Backend {
    async fn test_configuration(&self) -> Result<String, TransferError> {
        let context = establish(
            &self.client,
            &self.auth_url,
            &self.credentials,
            &self.bucket_id,
            &self.settings,
        )
        .await?;
        Ok(context.bucket.name)
    }

    async fn object_info(&self, object: &StoredObject) -> Result<FileVersion, TransferError> {
        let file_id = require_file_id(object)?;
        self.file_info(file_id).await
    }

    #[tracing::instrument(skip(self, object), fields(object_id = object.id, name = %object.name))]
    async fn upload_object(&self, object: &mut StoredObject) -> Result<(), TransferError> {
        let size = match tokio::fs::metadata(&object.path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(TransferError::FileMissing(object.path.clone())),
        };

        match object.status {
            ObjectStatus::Stored => {
                tracing::debug!("Already stored, nothing to do");
                return Ok(());
            }
            ObjectStatus::Uploading => {
                return Err(TransferError::InvalidObject(format!(
                    "object {} is already being uploaded",
                    object.id
                )));
            }
            ObjectStatus::Local | ObjectStatus::Failed => {}
        }

        object.status = ObjectStatus::Uploading;
        object.size = size;

        match self.upload_file(&object.path, &object.info, &object.name).await {
            Ok(version) => match serde_json::to_value(&version) {
                Ok(metadata) => {
                    object.content_sha1 = version.declared_sha1().map(str::to_string);
                    object.metadata = metadata;
                    object.status = ObjectStatus::Stored;
                    tracing::info!(file_id = %version.file_id, "Object stored");
                    Ok(())
                }
                Err(e) => {
                    object.status = ObjectStatus::Failed;
                    Err(TransferError::InvalidObject(e.to_string()))
                }
            },
            Err(e) => {
                object.status = ObjectStatus::Failed;
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip(self, object), fields(object_id = object.id, name = %object.name))]
    async fn download_object(&self, object: &StoredObject) -> Result<DownloadOutcome, TransferError> {
        require_file_id(object)?;

        if let Some(parent) = object.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        self.download_file(&object.name, &object.path, object.content_sha1.as_deref())
            .await
    }

    async fn public_download_url(&self, object: &StoredObject) -> Result<String, TransferError> {
        require_file_id(object)?;
        self.download_url(&object.name).await
    }
}
