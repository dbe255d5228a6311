//! Multipart upload
//!
//! Flow for a file at least one part long:
//!
//! 1. Cancel unfinished uploads older than the retention window
//! 2. Hash the whole file
//! 3. Resume a matching unfinished upload, or start a new one recording
//!    the file hash as `large_file_sha1`
//! 4. Upload the missing parts on a bounded pool of workers
//! 5. Finish with the part hashes in part-number order, only if every part
//!    is stored
//!
//! Each worker reads its own byte range after acquiring a pool slot, so at
//! most `workers` parts are held in memory at once.

use super::{hash, janitor, partition, resume, Part, TransferContext, TransferError, UploadJob};
use crate::b2::{B2ClientError, FileVersion, UploadedPart, LARGE_FILE_SHA1};
use crate::metrics;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Upload a file of at least one part size in parallel parts
#[tracing::instrument(skip(ctx, path, info), fields(file_size = tracing::field::Empty))]
pub async fn upload_large(
    ctx: &TransferContext,
    path: &Path,
    info: &BTreeMap<String, String>,
    file_name: &str,
) -> Result<FileVersion, TransferError> {
    let started = Instant::now();
    let file_size = tokio::fs::metadata(path).await?.len();
    let part_size = ctx.part_size();
    tracing::Span::current().record("file_size", file_size);

    if file_size < part_size {
        return Err(TransferError::InvalidObject(format!(
            "{} is {} bytes, below the part size of {}",
            file_name, file_size, part_size
        )));
    }

    janitor::expire_old_uploads(ctx, ctx.settings.expire_unfinished_after_hours).await?;

    let content_sha1 = hash::sha1_file(path, ctx.settings.hash_buffer_size).await?;
    let parts = partition(file_size, part_size);

    let resumed = match resume::find_unfinished_upload(ctx, file_name).await? {
        Some(candidate) => {
            resume::validate_or_discard(ctx, candidate, &content_sha1, &parts).await?
        }
        None => None,
    };

    let mut job = match resumed {
        Some(job) => {
            metrics::record_resumed_upload();
            job
        }
        None => start_upload(ctx, file_name, info, &content_sha1).await?,
    };

    let upload_id = job
        .upload_id
        .clone()
        .ok_or_else(|| TransferError::UploadFailed(format!("{} has no upload id", file_name)))?;

    let pending: Vec<Part> = parts
        .iter()
        .filter(|p| !job.is_uploaded(p.number))
        .copied()
        .collect();

    tracing::info!(
        upload_id = %upload_id,
        total_parts = parts.len(),
        pending_parts = pending.len(),
        part_size = part_size,
        "Uploading parts"
    );

    let mut first_failure = None;
    for (number, result) in upload_parts(ctx, path, &upload_id, pending).await? {
        match result {
            Ok(sha1) => job.mark_uploaded(number, sha1),
            Err(e) => {
                job.mark_failed(number);
                first_failure.get_or_insert((number, e));
            }
        }
    }

    if let Some((number, e)) = first_failure {
        metrics::record_upload_failure("multipart");
        tracing::error!(
            upload_id = %upload_id,
            part_number = number,
            uploaded_parts = job.uploaded_count(),
            total_parts = parts.len(),
            error = %e,
            "Multipart upload incomplete, not finishing"
        );
        if e.is_expired_token() {
            return Err(e);
        }
        return Err(TransferError::UploadFailed(format!(
            "part {} of {}: {}",
            number, file_name, e
        )));
    }

    let part_sha1s = job.ordered_part_sha1s(parts.len())?;
    let version = ctx
        .client
        .finish_large_file(&ctx.session, &upload_id, &part_sha1s)
        .await?;

    tracing::info!(
        file_id = %version.file_id,
        parts = parts.len(),
        bytes = file_size,
        "Finished multipart upload"
    );
    metrics::record_multipart_parts(parts.len());
    metrics::record_upload_success("multipart", file_size, started.elapsed().as_secs_f64());

    Ok(version)
}

async fn start_upload(
    ctx: &TransferContext,
    file_name: &str,
    info: &BTreeMap<String, String>,
    content_sha1: &str,
) -> Result<UploadJob, TransferError> {
    let mut file_info = info.clone();
    file_info.insert(LARGE_FILE_SHA1.to_string(), content_sha1.to_string());

    let version = ctx
        .client
        .start_large_file(&ctx.session, &ctx.bucket.id, file_name, &file_info)
        .await?;

    tracing::info!(upload_id = %version.file_id, "Started multipart upload");

    Ok(UploadJob::new(file_name, content_sha1, ctx.part_size()).with_upload_id(version.file_id))
}

/// Upload `parts` on at most `workers` concurrent tasks.
///
/// Results come back sorted by part number, whatever order the workers
/// finished in.
async fn upload_parts(
    ctx: &TransferContext,
    path: &Path,
    upload_id: &str,
    parts: Vec<Part>,
) -> Result<Vec<(u32, Result<String, TransferError>)>, TransferError> {
    let semaphore = Arc::new(Semaphore::new(ctx.settings.worker_count()));
    let mut tasks = JoinSet::new();
    let mut results = Vec::with_capacity(parts.len());

    for part in parts {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| TransferError::UploadFailed(e.to_string()))?;

        let ctx = ctx.clone();
        let path: PathBuf = path.to_path_buf();
        let upload_id = upload_id.to_string();

        tasks.spawn(async move {
            let _permit = permit;
            let result = send_part(&ctx, &path, &upload_id, part).await;
            (part.number, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => {
                return Err(TransferError::UploadFailed(format!("part worker failed: {}", e)));
            }
        }
    }

    results.sort_by_key(|(number, _)| *number);
    Ok(results)
}

/// Upload one part, retrying with a fresh part target per attempt.
///
/// Returns the part's SHA-1 once stored.
#[tracing::instrument(
    skip(ctx, path, upload_id, part),
    fields(part_number = part.number, offset = part.offset, length = part.length)
)]
async fn send_part(
    ctx: &TransferContext,
    path: &Path,
    upload_id: &str,
    part: Part,
) -> Result<String, TransferError> {
    let data = Bytes::from(hash::read_range(path, part.offset, part.length).await?);
    let sha1 = hash::sha1_hex(&data);
    let retry = &ctx.settings.retry;
    let mut last_error = None;

    for attempt in 1..=retry.max_attempts {
        match attempt_part(ctx, upload_id, part.number, data.clone(), &sha1).await {
            Ok(_) => {
                tracing::debug!(attempt = attempt, "Part stored");
                metrics::record_part_upload(true);
                return Ok(sha1);
            }
            Err(e) if e.is_expired_token() => {
                metrics::record_part_upload(false);
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = retry.max_attempts,
                    error = %e,
                    "Part upload attempt failed"
                );
                last_error = Some(e);
                if attempt < retry.max_attempts {
                    metrics::record_retry("upload_part");
                    tokio::time::sleep(retry.backoff(attempt)).await;
                }
            }
        }
    }

    metrics::record_part_upload(false);
    Err(match last_error {
        Some(e) => e.into(),
        None => TransferError::UploadFailed(format!("part {} was never attempted", part.number)),
    })
}

async fn attempt_part(
    ctx: &TransferContext,
    upload_id: &str,
    part_number: u32,
    data: Bytes,
    sha1: &str,
) -> Result<UploadedPart, B2ClientError> {
    let target = ctx
        .client
        .get_upload_part_url(&ctx.session, upload_id)
        .await?;

    ctx.client.upload_part(&target, part_number, data, sha1).await
}
