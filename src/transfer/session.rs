//! Authentication and bucket verification

use super::TransferError;
use crate::b2::{B2Client, B2ClientError, Bucket, Credentials, Session};

/// Exchange credentials for a session and derive its part size.
///
/// Every call produces a fresh, independent session.
#[tracing::instrument(skip(client, credentials), fields(key_id = %credentials.key_id()))]
pub async fn authenticate(
    client: &B2Client,
    auth_url: &str,
    credentials: &Credentials,
    max_part_size: u64,
) -> Result<Session, TransferError> {
    let auth = client
        .authorize_account(auth_url, credentials)
        .await
        .map_err(|e| match e {
            B2ClientError::ApiError {
                status,
                code,
                message,
            } => TransferError::AuthorizationError(format!("{} ({}): {}", status, code, message)),
            other => TransferError::BackendError(other),
        })?;

    let session = Session::from_authorization(auth, max_part_size);

    tracing::info!(
        account_id = %session.account_id,
        part_size = session.part_size,
        min_part_size = session.min_part_size,
        "Authorized"
    );

    Ok(session)
}

/// Confirm that `bucket_id` belongs to the session's account.
///
/// `b2_list_buckets` is not paged: one response lists every bucket.
#[tracing::instrument(skip(client, session))]
pub async fn verify_bucket(
    client: &B2Client,
    session: &Session,
    bucket_id: &str,
) -> Result<Bucket, TransferError> {
    let response = client.list_buckets(session).await?;

    let bucket = response
        .buckets
        .into_iter()
        .find(|b| b.bucket_id == bucket_id)
        .map(|b| Bucket {
            id: b.bucket_id,
            name: b.bucket_name,
        })
        .ok_or_else(|| {
            TransferError::ConfigurationError(format!(
                "bucket {} not found for account {}",
                bucket_id, session.account_id
            ))
        })?;

    tracing::debug!(bucket = %bucket.name, "Bucket verified");
    Ok(bucket)
}
