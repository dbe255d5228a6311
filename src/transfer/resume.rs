//! Resumption of interrupted multipart uploads
//!
//! An unfinished upload of the same name is continued only if it was started
//! for the same content (its recorded `large_file_sha1` equals the current
//! file hash). Otherwise it is cancelled and the caller starts from scratch.

use super::{Part, TransferContext, TransferError, UploadJob};
use crate::b2::{UnfinishedFile, UploadedPart};
use crate::metrics;

/// First unfinished upload in the bucket whose name is `file_name`
#[tracing::instrument(skip(ctx))]
pub async fn find_unfinished_upload(
    ctx: &TransferContext,
    file_name: &str,
) -> Result<Option<UnfinishedFile>, TransferError> {
    let mut cursor: Option<String> = None;

    loop {
        let page = ctx
            .client
            .list_unfinished_large_files(&ctx.session, &ctx.bucket.id, cursor.as_deref())
            .await?;

        if let Some(found) = page.files.into_iter().find(|f| f.file_name == file_name) {
            tracing::debug!(file_id = %found.file_id, "Found unfinished upload");
            return Ok(Some(found));
        }

        match page.next_file_id {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => return Ok(None),
        }
    }
}

/// Every part stored so far for an unfinished upload
pub async fn list_all_parts(
    ctx: &TransferContext,
    file_id: &str,
) -> Result<Vec<UploadedPart>, TransferError> {
    let mut parts = Vec::new();
    let mut cursor: Option<u32> = None;

    loop {
        let page = ctx.client.list_parts(&ctx.session, file_id, cursor).await?;
        parts.extend(page.parts);

        match page.next_part_number {
            Some(next) if cursor != Some(next) => cursor = Some(next),
            _ => return Ok(parts),
        }
    }
}

/// Turn a candidate into a resumable job, or cancel it.
///
/// Returns `None` after cancelling a candidate whose recorded hash differs
/// from `current_sha1`. Listed parts are salvaged only when their length
/// matches the part the current partition expects at that number; anything
/// else is uploaded again.
#[tracing::instrument(
    skip(ctx, candidate, expected_parts),
    fields(file_id = %candidate.file_id, file_name = %candidate.file_name)
)]
pub async fn validate_or_discard(
    ctx: &TransferContext,
    candidate: UnfinishedFile,
    current_sha1: &str,
    expected_parts: &[Part],
) -> Result<Option<UploadJob>, TransferError> {
    if candidate.large_file_sha1() != Some(current_sha1) {
        tracing::info!(
            recorded_sha1 = candidate.large_file_sha1().unwrap_or("none"),
            current_sha1 = %current_sha1,
            "File changed since the previous attempt, cancelling unfinished upload"
        );
        ctx.client
            .cancel_large_file(&ctx.session, &candidate.file_id)
            .await?;
        metrics::record_cancelled_upload("changed");
        return Ok(None);
    }

    let mut job = UploadJob::new(
        candidate.file_name.clone(),
        current_sha1,
        ctx.part_size(),
    )
    .with_upload_id(candidate.file_id.clone());

    for part in list_all_parts(ctx, &candidate.file_id).await? {
        let expected = expected_parts
            .iter()
            .find(|p| p.number == part.part_number);

        match expected {
            Some(p) if p.length == part.content_length => {
                job.mark_uploaded(part.part_number, part.content_sha1);
            }
            _ => tracing::debug!(
                part_number = part.part_number,
                content_length = part.content_length,
                "Stored part does not fit current partition, will upload again"
            ),
        }
    }

    tracing::info!(
        salvaged_parts = job.uploaded_count(),
        total_parts = expected_parts.len(),
        "Resuming unfinished upload"
    );

    Ok(Some(job))
}
