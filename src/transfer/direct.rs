//! Single-request upload for files smaller than the part size
//!
//! Each attempt asks for a fresh upload target. A target is never reused
//! after a failed attempt. The file is hashed and sent as a stream, so it is
//! never held in memory whole.

use super::{hash, TransferContext, TransferError};
use crate::b2::{B2ClientError, FileVersion};
use crate::metrics;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tokio_util::io::ReaderStream;

/// Upload a file in one request, retrying with a fresh target per attempt
#[tracing::instrument(skip(ctx, path, info), fields(file_size = tracing::field::Empty))]
pub async fn upload_small(
    ctx: &TransferContext,
    path: &Path,
    info: &BTreeMap<String, String>,
    file_name: &str,
) -> Result<FileVersion, TransferError> {
    let started = Instant::now();
    let buffer_size = ctx.settings.hash_buffer_size.max(1);
    let size = tokio::fs::metadata(path).await?.len();
    let sha1 = hash::sha1_file(path, buffer_size).await?;
    tracing::Span::current().record("file_size", size);

    let retry = &ctx.settings.retry;
    let mut last_error = None;

    for attempt in 1..=retry.max_attempts {
        let file = tokio::fs::File::open(path).await?;
        match attempt_upload(ctx, file, size, file_name, &sha1, info).await {
            Ok(version) => {
                tracing::info!(
                    file_id = %version.file_id,
                    bytes = size,
                    attempt = attempt,
                    "Uploaded file"
                );
                metrics::record_upload_success(
                    "direct",
                    size,
                    started.elapsed().as_secs_f64(),
                );
                return Ok(version);
            }
            Err(e) if e.is_expired_token() => {
                metrics::record_upload_failure("direct");
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = retry.max_attempts,
                    error = %e,
                    "Upload attempt failed"
                );
                last_error = Some(e);
                if attempt < retry.max_attempts {
                    metrics::record_retry("upload_file");
                    tokio::time::sleep(retry.backoff(attempt)).await;
                }
            }
        }
    }

    metrics::record_upload_failure("direct");
    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts made".to_string());
    tracing::error!(file_name = %file_name, reason = %reason, "Upload failed");

    Err(TransferError::UploadFailed(format!(
        "{} after {} attempts: {}",
        file_name, retry.max_attempts, reason
    )))
}

async fn attempt_upload(
    ctx: &TransferContext,
    file: tokio::fs::File,
    size: u64,
    file_name: &str,
    sha1: &str,
    info: &BTreeMap<String, String>,
) -> Result<FileVersion, B2ClientError> {
    let target = ctx
        .client
        .get_upload_url(&ctx.session, &ctx.bucket.id)
        .await?;

    let stream = ReaderStream::with_capacity(file, ctx.settings.hash_buffer_size.max(1));

    ctx.client
        .upload_file(
            &target,
            file_name,
            reqwest::Body::wrap_stream(stream),
            size,
            sha1,
            info,
        )
        .await
}
