//! Cancellation of abandoned multipart uploads

use super::{TransferContext, TransferError};
use crate::metrics;

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Cancel every unfinished upload in the bucket started more than
/// `retention_hours` ago. Returns how many were cancelled.
pub async fn expire_old_uploads(
    ctx: &TransferContext,
    retention_hours: u64,
) -> Result<usize, TransferError> {
    let now = chrono::Utc::now().timestamp_millis();
    let cutoff = now.saturating_sub((retention_hours as i64).saturating_mul(MILLIS_PER_HOUR));
    expire_uploads_started_before(ctx, cutoff).await
}

/// Cancel every unfinished upload started strictly before `cutoff_ms`
/// (milliseconds since the epoch).
///
/// A failed cancellation is logged and skipped; listing failures propagate.
#[tracing::instrument(skip(ctx), fields(bucket = %ctx.bucket.name))]
pub async fn expire_uploads_started_before(
    ctx: &TransferContext,
    cutoff_ms: i64,
) -> Result<usize, TransferError> {
    let mut cursor: Option<String> = None;
    let mut cancelled = 0;

    loop {
        let page = ctx
            .client
            .list_unfinished_large_files(&ctx.session, &ctx.bucket.id, cursor.as_deref())
            .await?;

        for file in page.files.iter().filter(|f| f.upload_timestamp < cutoff_ms) {
            match ctx.client.cancel_large_file(&ctx.session, &file.file_id).await {
                Ok(()) => {
                    tracing::info!(
                        file_id = %file.file_id,
                        file_name = %file.file_name,
                        started_at = file.upload_timestamp,
                        "Cancelled expired unfinished upload"
                    );
                    metrics::record_cancelled_upload("expired");
                    cancelled += 1;
                }
                Err(e) if e.is_expired_token() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(file_id = %file.file_id, error = %e, "Failed to cancel upload");
                    metrics::record_error("cancel_upload");
                }
            }
        }

        match page.next_file_id {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => break,
        }
    }

    if cancelled > 0 {
        tracing::info!(cancelled = cancelled, "Expired unfinished uploads");
    }

    Ok(cancelled)
}
