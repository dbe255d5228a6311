//! B2 Client module
//!
//! Thin, instrumented wrapper over the B2 native API calls the transfer
//! engine needs. Every call is a single HTTP exchange; retry policy lives in
//! the engine, not here.
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | Authorize | `b2.authorize_account` | http.status_code |
//! | Upload file | `b2.upload_file` | b2.file_name, upload.bytes, http.status_code |
//! | Start large file | `b2.start_large_file` | b2.file_name, b2.file_id |
//! | Upload part | `b2.upload_part` | b2.part_number, upload.bytes, http.status_code |
//! | Finish large file | `b2.finish_large_file` | b2.file_id, parts_count |
//! | Cancel large file | `b2.cancel_large_file` | b2.file_id |
//! | Download range | `b2.download_range` | range.start, range.end, http.status_code |
//!
//! # Example
//!
//! ```no_run
//! use cloud_archiver::b2::{B2Client, Credentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = B2Client::new(None)?;
//! let creds = Credentials::new("key-id", "application-key");
//! let auth = client
//!     .authorize_account("https://api.backblazeb2.com/b2api/v2/b2_authorize_account", &creds)
//!     .await?;
//! println!("API URL: {}", auth.api_url);
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub mod credentials;
pub mod session;
pub mod types;

pub use credentials::{Credentials, CredentialsError};
pub use session::{Bucket, Session};
pub use types::{
    DownloadAuthorization, FileVersion, ListPartsResponse, ListUnfinishedResponse,
    UnfinishedFile, UploadTarget, UploadedPart, LARGE_FILE_SHA1,
};

/// Path prefix of every API call
pub const API_PREFIX: &str = "/b2api/v2/";

/// Content type asking the backend to infer the type from the file name
pub const AUTO_CONTENT_TYPE: &str = "b2/x-auto";

/// Characters left as-is when a file name travels in a URL or header
const NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encode a file name (or info value) for URLs and `X-Bz-*` headers
pub fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, NAME_ENCODE_SET).to_string()
}

/// B2 client errors
#[derive(Error, Debug)]
pub enum B2ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API error {status} ({code}): {message}")]
    ApiError {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Response error: {0}")]
    ResponseError(String),
}

impl B2ClientError {
    /// HTTP status of the failed call, when the service answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::RequestError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether repeating the same call might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestError(_) => true,
            Self::ApiError { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            Self::ConfigError(_) | Self::ResponseError(_) => false,
        }
    }

    /// Whether the session token has expired and a new one is needed
    pub fn is_expired_token(&self) -> bool {
        matches!(
            self,
            Self::ApiError { status: 401, code, .. } if code == "expired_auth_token" || code == "bad_auth_token"
        )
    }
}

/// Outcome of a single ranged download request
#[derive(Debug)]
pub enum RangeResponse {
    /// Bytes of the requested range (possibly shorter at the end of the object)
    Data {
        bytes: Bytes,
        /// Total object size from `Content-Range`, when reported
        total_size: Option<u64>,
        /// Full-file SHA-1 advertised by the response headers, when any
        declared_sha1: Option<String>,
    },
    /// 416: the range starts past the end of the object
    RangeNotSatisfiable,
    /// 404: no object under this name (or this encoding of it)
    NotFound,
}

/// B2 Client
#[derive(Debug, Clone)]
pub struct B2Client {
    http_client: reqwest::Client,
}

impl B2Client {
    /// Create a new client with an optional per-request timeout
    pub fn new(request_timeout: Option<Duration>) -> Result<Self, B2ClientError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }

        let http_client = builder
            .build()
            .map_err(|e| B2ClientError::ConfigError(e.to_string()))?;

        Ok(Self { http_client })
    }

    /// Wrap an existing HTTP client (shares its connection pool)
    pub fn with_http_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Exchange an application key for a session token
    #[tracing::instrument(
        name = "b2.authorize_account",
        skip(self, credentials),
        fields(b2.key_id = %credentials.key_id(), http.status_code = tracing::field::Empty),
        err
    )]
    pub async fn authorize_account(
        &self,
        auth_url: &str,
        credentials: &Credentials,
    ) -> Result<types::AuthorizeAccountResponse, B2ClientError> {
        let response = self
            .http_client
            .get(auth_url)
            .header(AUTHORIZATION, credentials.basic_auth_header())
            .send()
            .await?;

        tracing::Span::current().record("http.status_code", response.status().as_u16());

        decode(response).await
    }

    /// POST a JSON body to an API call and decode the JSON answer
    async fn api_call<B, R>(&self, session: &Session, call: &str, body: &B) -> Result<R, B2ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let address = format!("{}{}{}", session.api_url, API_PREFIX, call);
        tracing::debug!(call = call, address = %address, "API call");

        let response = self
            .http_client
            .post(&address)
            .header(AUTHORIZATION, &session.auth_token)
            .json(body)
            .send()
            .await?;

        decode(response).await
    }

    /// List the account's buckets (one unpaged response)
    #[tracing::instrument(name = "b2.list_buckets", skip(self, session), err)]
    pub async fn list_buckets(
        &self,
        session: &Session,
    ) -> Result<types::ListBucketsResponse, B2ClientError> {
        self.api_call(session, "b2_list_buckets", &json!({ "accountId": session.account_id }))
            .await
    }

    /// Request a single-use target for a whole-file upload
    #[tracing::instrument(name = "b2.get_upload_url", skip(self, session), err)]
    pub async fn get_upload_url(
        &self,
        session: &Session,
        bucket_id: &str,
    ) -> Result<UploadTarget, B2ClientError> {
        self.api_call(session, "b2_get_upload_url", &json!({ "bucketId": bucket_id }))
            .await
    }

    /// Upload a whole file in one request.
    ///
    /// `body` may be a stream; `content_length` must be its exact size.
    #[tracing::instrument(
        name = "b2.upload_file",
        skip(self, target, body, info),
        fields(
            b2.file_name = %file_name,
            upload.bytes = content_length,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload_file(
        &self,
        target: &UploadTarget,
        file_name: &str,
        body: reqwest::Body,
        content_length: u64,
        sha1: &str,
        info: &BTreeMap<String, String>,
    ) -> Result<FileVersion, B2ClientError> {
        let mut request = self
            .http_client
            .post(&target.upload_url)
            .header(AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", encode_name(file_name))
            .header(CONTENT_TYPE, AUTO_CONTENT_TYPE)
            .header(CONTENT_LENGTH, content_length)
            .header("X-Bz-Content-Sha1", sha1);

        for (key, value) in info {
            request = request.header(format!("X-Bz-Info-{}", key), encode_name(value));
        }

        let response = request.body(body).send().await?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());

        decode(response).await
    }

    /// Begin a large (multipart) upload
    #[tracing::instrument(
        name = "b2.start_large_file",
        skip(self, session, file_info),
        fields(b2.file_name = %file_name, b2.file_id = tracing::field::Empty),
        err
    )]
    pub async fn start_large_file(
        &self,
        session: &Session,
        bucket_id: &str,
        file_name: &str,
        file_info: &BTreeMap<String, String>,
    ) -> Result<FileVersion, B2ClientError> {
        let version: FileVersion = self
            .api_call(
                session,
                "b2_start_large_file",
                &json!({
                    "bucketId": bucket_id,
                    "fileName": file_name,
                    "contentType": AUTO_CONTENT_TYPE,
                    "fileInfo": file_info,
                }),
            )
            .await?;

        tracing::Span::current().record("b2.file_id", version.file_id.as_str());
        Ok(version)
    }

    /// Request a single-use target for one part of a large upload
    #[tracing::instrument(name = "b2.get_upload_part_url", skip(self, session), err)]
    pub async fn get_upload_part_url(
        &self,
        session: &Session,
        file_id: &str,
    ) -> Result<UploadTarget, B2ClientError> {
        self.api_call(session, "b2_get_upload_part_url", &json!({ "fileId": file_id }))
            .await
    }

    /// Upload one part of a large file
    #[tracing::instrument(
        name = "b2.upload_part",
        skip(self, target, body),
        fields(
            b2.part_number = part_number,
            upload.bytes = body.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload_part(
        &self,
        target: &UploadTarget,
        part_number: u32,
        body: Bytes,
        sha1: &str,
    ) -> Result<UploadedPart, B2ClientError> {
        let response = self
            .http_client
            .post(&target.upload_url)
            .header(AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-Part-Number", part_number)
            .header("X-Bz-Content-Sha1", sha1)
            .body(body)
            .send()
            .await?;

        tracing::Span::current().record("http.status_code", response.status().as_u16());

        decode(response).await
    }

    /// One page of unfinished large uploads in a bucket
    #[tracing::instrument(name = "b2.list_unfinished_large_files", skip(self, session), err)]
    pub async fn list_unfinished_large_files(
        &self,
        session: &Session,
        bucket_id: &str,
        start_file_id: Option<&str>,
    ) -> Result<ListUnfinishedResponse, B2ClientError> {
        let mut body = json!({ "bucketId": bucket_id });
        if let Some(start) = start_file_id {
            body["startFileId"] = json!(start);
        }

        self.api_call(session, "b2_list_unfinished_large_files", &body)
            .await
    }

    /// One page of parts already stored for a large upload
    #[tracing::instrument(name = "b2.list_parts", skip(self, session), err)]
    pub async fn list_parts(
        &self,
        session: &Session,
        file_id: &str,
        start_part_number: Option<u32>,
    ) -> Result<ListPartsResponse, B2ClientError> {
        let mut body = json!({ "fileId": file_id });
        if let Some(start) = start_part_number {
            body["startPartNumber"] = json!(start);
        }

        self.api_call(session, "b2_list_parts", &body).await
    }

    /// Commit a large upload given its part hashes in part-number order
    #[tracing::instrument(
        name = "b2.finish_large_file",
        skip(self, session, part_sha1s),
        fields(b2.file_id = %file_id, parts_count = part_sha1s.len()),
        err
    )]
    pub async fn finish_large_file(
        &self,
        session: &Session,
        file_id: &str,
        part_sha1s: &[String],
    ) -> Result<FileVersion, B2ClientError> {
        self.api_call(
            session,
            "b2_finish_large_file",
            &json!({ "fileId": file_id, "partSha1Array": part_sha1s }),
        )
        .await
    }

    /// Abandon a large upload and free its stored parts
    #[tracing::instrument(
        name = "b2.cancel_large_file",
        skip(self, session),
        fields(b2.file_id = %file_id),
        err
    )]
    pub async fn cancel_large_file(
        &self,
        session: &Session,
        file_id: &str,
    ) -> Result<(), B2ClientError> {
        let _: serde_json::Value = self
            .api_call(session, "b2_cancel_large_file", &json!({ "fileId": file_id }))
            .await?;
        Ok(())
    }

    /// Metadata of a stored file
    #[tracing::instrument(name = "b2.get_file_info", skip(self, session), err)]
    pub async fn get_file_info(
        &self,
        session: &Session,
        file_id: &str,
    ) -> Result<FileVersion, B2ClientError> {
        self.api_call(session, "b2_get_file_info", &json!({ "fileId": file_id }))
            .await
    }

    /// Token granting time-limited downloads of names under a prefix
    #[tracing::instrument(name = "b2.get_download_authorization", skip(self, session), err)]
    pub async fn get_download_authorization(
        &self,
        session: &Session,
        bucket_id: &str,
        file_name_prefix: &str,
        valid_duration_secs: u64,
    ) -> Result<DownloadAuthorization, B2ClientError> {
        self.api_call(
            session,
            "b2_get_download_authorization",
            &json!({
                "bucketId": bucket_id,
                "fileNamePrefix": file_name_prefix,
                "validDurationInSeconds": valid_duration_secs,
            }),
        )
        .await
    }

    /// Fetch the inclusive byte range `[start, end]` of an object
    #[tracing::instrument(
        name = "b2.download_range",
        skip(self, session),
        fields(range.start = start, range.end = end, http.status_code = tracing::field::Empty),
        err
    )]
    pub async fn download_range(
        &self,
        session: &Session,
        url: &str,
        start: u64,
        end: u64,
    ) -> Result<RangeResponse, B2ClientError> {
        let response = self
            .http_client
            .get(url)
            .header(AUTHORIZATION, &session.auth_token)
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        match status {
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(RangeResponse::RangeNotSatisfiable),
            StatusCode::NOT_FOUND => Ok(RangeResponse::NotFound),
            s if s.is_success() => {
                let total_size = content_range_total(response.headers());
                let declared_sha1 = declared_sha1(response.headers());
                let bytes = response.bytes().await?;
                Ok(RangeResponse::Data {
                    bytes,
                    total_size,
                    declared_sha1,
                })
            }
            _ => Err(api_error(response).await),
        }
    }
}

/// Decode a JSON success body, or turn an error body into `ApiError`
async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, B2ClientError> {
    let status = response.status();

    if status.is_success() {
        return response
            .json::<R>()
            .await
            .map_err(|e| B2ClientError::ResponseError(e.to_string()));
    }

    Err(api_error(response).await)
}

async fn api_error(response: reqwest::Response) -> B2ClientError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let body: types::ApiErrorBody = serde_json::from_str(&text).unwrap_or(types::ApiErrorBody {
        code: String::new(),
        message: text,
    });

    B2ClientError::ApiError {
        status,
        code: body.code,
        message: body.message,
    }
}

/// Total length from a `Content-Range: bytes a-b/total` header
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .parse()
        .ok()
}

/// Full-file SHA-1 from `X-Bz-Content-Sha1`, or from the large-file info header
fn declared_sha1(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_start_matches("unverified:").to_string())
    };

    match header("X-Bz-Content-Sha1") {
        Some(sha1) if sha1 != "none" => Some(sha1),
        _ => header("X-Bz-Info-large_file_sha1"),
    }
}
