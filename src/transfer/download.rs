//! Sequential ranged download
//!
//! The object is fetched in windows of the session part size and appended to
//! the destination in order. When the backend reports the object size in
//! `Content-Range`, the loop runs until that many bytes are written; a short
//! window then only moves the next request forward. Without a size, a short
//! window ends the loop. A 416 always ends it.
//!
//! A 404 on the first encoding of the name is retried once with the name
//! encoded a second time, and that URL is kept for the rest of the object.
//! Some archived names were stored double-encoded.

use super::{TransferContext, TransferError};
use crate::b2::{encode_name, RangeResponse};
use crate::metrics;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;

/// Result of a finished download
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub bytes_written: u64,
    /// SHA-1 of the bytes written
    pub sha1: String,
    /// SHA-1 advertised by the backend, when it sent one
    pub declared_sha1: Option<String>,
}

/// Public URL of a stored name (without authorization)
pub fn object_url(ctx: &TransferContext, encoded_name: &str) -> String {
    format!(
        "{}/file/{}/{}",
        ctx.session.download_url, ctx.bucket.name, encoded_name
    )
}

/// Download `file_name` into `dest`, overwriting it.
///
/// When verification is enabled the written bytes are checked against
/// `expected_sha1`, or the backend-declared hash when none is given. On
/// failure a partial file may remain at `dest`.
#[tracing::instrument(skip(ctx, dest, expected_sha1), fields(dest = %dest.display()))]
pub async fn download(
    ctx: &TransferContext,
    file_name: &str,
    dest: &Path,
    expected_sha1: Option<&str>,
) -> Result<DownloadOutcome, TransferError> {
    let started = Instant::now();
    let result = fetch_to_file(ctx, file_name, dest).await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::record_download_failure();
            return Err(e);
        }
    };

    if ctx.settings.verify_downloads {
        let expected = expected_sha1
            .map(str::to_string)
            .or_else(|| outcome.declared_sha1.clone());

        match expected {
            Some(expected) if !expected.eq_ignore_ascii_case(&outcome.sha1) => {
                tracing::error!(expected = %expected, actual = %outcome.sha1, "Downloaded content does not match");
                metrics::record_download_failure();
                return Err(TransferError::IntegrityError {
                    expected,
                    actual: outcome.sha1,
                });
            }
            Some(_) => tracing::debug!(sha1 = %outcome.sha1, "Download verified"),
            None => tracing::warn!("No hash to verify the download against"),
        }
    }

    tracing::info!(bytes = outcome.bytes_written, "Downloaded file");
    metrics::record_download_success(outcome.bytes_written, started.elapsed().as_secs_f64());

    Ok(outcome)
}

async fn fetch_to_file(
    ctx: &TransferContext,
    file_name: &str,
    dest: &Path,
) -> Result<DownloadOutcome, TransferError> {
    let window = ctx.part_size().max(1);
    let mut url = object_url(ctx, &encode_name(file_name));
    let mut tried_alternate = false;

    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha1::new();
    let mut declared_sha1 = None;
    let mut offset: u64 = 0;
    let mut object_size: Option<u64> = None;

    loop {
        let end = offset + window - 1;

        match fetch_range(ctx, &url, offset, end).await? {
            RangeResponse::RangeNotSatisfiable => break,
            RangeResponse::NotFound if !tried_alternate => {
                tried_alternate = true;
                url = object_url(ctx, &encode_name(&encode_name(file_name)));
                tracing::warn!(url = %url, "Not found, retrying with alternate name encoding");
            }
            RangeResponse::NotFound => {
                return Err(TransferError::DownloadError {
                    status: Some(404),
                    reason: format!("{} not found", file_name),
                });
            }
            RangeResponse::Data {
                bytes,
                total_size,
                declared_sha1: declared,
            } => {
                if declared_sha1.is_none() {
                    declared_sha1 = declared;
                }

                let received = bytes.len() as u64;
                file.write_all(&bytes).await?;
                hasher.update(&bytes);
                offset += received;

                if total_size.is_some() {
                    object_size = total_size;
                }

                match object_size {
                    Some(total) if offset >= total => break,
                    Some(total) if received == 0 => {
                        return Err(TransferError::DownloadError {
                            status: None,
                            reason: format!("empty window at byte {} of {}", offset, total),
                        });
                    }
                    Some(_) => {}
                    None if received < window => break,
                    None => {}
                }
            }
        }
    }

    if let Some(total) = object_size.filter(|&total| offset < total) {
        return Err(TransferError::DownloadError {
            status: Some(416),
            reason: format!("{} ended at byte {} of {}", file_name, offset, total),
        });
    }

    file.flush().await?;

    Ok(DownloadOutcome {
        path: dest.to_path_buf(),
        bytes_written: offset,
        sha1: hex::encode(hasher.finalize()),
        declared_sha1,
    })
}

/// One ranged request, retried on transient failures
async fn fetch_range(
    ctx: &TransferContext,
    url: &str,
    start: u64,
    end: u64,
) -> Result<RangeResponse, TransferError> {
    let attempts = ctx.settings.download_attempts.max(1);
    let retry = &ctx.settings.retry;

    for attempt in 1..=attempts {
        match ctx.client.download_range(&ctx.session, url, start, end).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_expired_token() => return Err(e.into()),
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(attempt = attempt, start = start, error = %e, "Range request failed, retrying");
                metrics::record_retry("download_range");
                tokio::time::sleep(retry.backoff(attempt)).await;
            }
            Err(e) => {
                return Err(TransferError::DownloadError {
                    status: e.status(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(TransferError::DownloadError {
        status: None,
        reason: format!("range {}-{} not fetched", start, end),
    })
}
