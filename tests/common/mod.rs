//! Shared test infrastructure
//!
//! A `wiremock::MockServer` stands in for both the API host and the
//! upload/download hosts. Helpers mount the common endpoints and build
//! transfer contexts pointed at the mock.

#![allow(dead_code)]

use cloud_archiver::b2::{B2Client, Bucket, Credentials, Session};
use cloud_archiver::config::{RetryConfig, TransferConfig};
use cloud_archiver::transfer::{hash, TransferContext};
use rand::Rng;
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const ACCOUNT_ID: &str = "acc-1";
pub const AUTH_TOKEN: &str = "session-token";
pub const BUCKET_ID: &str = "bucket-1";
pub const BUCKET_NAME: &str = "archive";
pub const LARGE_FILE_ID: &str = "large-1";

/// Path of an API call on the mock
pub fn api(call: &str) -> String {
    format!("/b2api/v2/{}", call)
}

pub fn auth_url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), api("b2_authorize_account"))
}

pub fn credentials() -> Credentials {
    Credentials::new("id", "secret")
}

/// Settings with immediate retries (3 attempts) and 4 workers
pub fn settings() -> TransferConfig {
    TransferConfig {
        workers: Some(4),
        download_attempts: 3,
        retry: RetryConfig::immediate(3),
        ..TransferConfig::default()
    }
}

pub fn session(server: &MockServer, part_size: u64) -> Session {
    Session {
        account_id: ACCOUNT_ID.to_string(),
        auth_token: AUTH_TOKEN.to_string(),
        api_url: server.uri(),
        download_url: server.uri(),
        min_part_size: 5,
        recommended_part_size: part_size,
        max_part_size: 20_971_520,
        part_size,
    }
}

pub fn bucket() -> Bucket {
    Bucket {
        id: BUCKET_ID.to_string(),
        name: BUCKET_NAME.to_string(),
    }
}

/// Context for a pre-authorized session with the given part size
pub fn context(server: &MockServer, part_size: u64) -> TransferContext {
    TransferContext::new(
        B2Client::new(None).unwrap(),
        session(server, part_size),
        bucket(),
        settings(),
    )
}

/// Write `size` random bytes to `name` inside `dir`
pub fn write_file(dir: &TempDir, name: &str, size: usize) -> (PathBuf, Vec<u8>) {
    let mut data = vec![0u8; size];
    rand::rng().fill(&mut data[..]);
    let path = dir.path().join(name);
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

pub fn sha1_hex(data: &[u8]) -> String {
    hash::sha1_hex(data)
}

/// SHA-1 of each `part_size` chunk, in order
pub fn chunk_sha1s(data: &[u8], part_size: usize) -> Vec<String> {
    data.chunks(part_size).map(sha1_hex).collect()
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Mounted endpoints
// ============================================================================

/// `b2_authorize_account` returning the mock as API and download host
pub async fn mount_auth(server: &MockServer, recommended: u64, minimum: u64) {
    Mock::given(method("GET"))
        .and(path(api("b2_authorize_account")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accountId": ACCOUNT_ID,
            "authorizationToken": AUTH_TOKEN,
            "apiUrl": server.uri(),
            "downloadUrl": server.uri(),
            "recommendedPartSize": recommended,
            "absoluteMinimumPartSize": minimum,
        })))
        .mount(server)
        .await;
}

pub async fn mount_buckets(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(api("b2_list_buckets")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "buckets": [
                { "bucketId": "other", "bucketName": "elsewhere" },
                { "bucketId": BUCKET_ID, "bucketName": BUCKET_NAME },
            ]
        })))
        .mount(server)
        .await;
}

/// `b2_list_unfinished_large_files` with a single page of `files`
pub async fn mount_unfinished(server: &MockServer, files: Value) {
    Mock::given(method("POST"))
        .and(path(api("b2_list_unfinished_large_files")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": files,
            "nextFileId": null,
        })))
        .mount(server)
        .await;
}

pub async fn mount_start_large_file(server: &MockServer, file_name: &str) {
    Mock::given(method("POST"))
        .and(path(api("b2_start_large_file")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fileId": LARGE_FILE_ID,
            "fileName": file_name,
        })))
        .mount(server)
        .await;
}

pub async fn mount_part_url(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(api("b2_get_upload_part_url")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/part", server.uri()),
            "authorizationToken": "part-token",
        })))
        .mount(server)
        .await;
}

/// `/upload/part` accepting every part
pub async fn mount_part_upload(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/upload/part"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fileId": LARGE_FILE_ID,
            "partNumber": 1,
            "contentLength": 100,
            "contentSha1": "ignored",
        })))
        .mount(server)
        .await;
}

pub async fn mount_finish(server: &MockServer, file_name: &str, content_sha1: &str) {
    Mock::given(method("POST"))
        .and(path(api("b2_finish_large_file")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fileId": LARGE_FILE_ID,
            "fileName": file_name,
            "contentSha1": "none",
            "fileInfo": { "large_file_sha1": content_sha1 },
        })))
        .mount(server)
        .await;
}

pub async fn mount_upload_url(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(api("b2_get_upload_url")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/file", server.uri()),
            "authorizationToken": "upload-token",
        })))
        .mount(server)
        .await;
}

/// `/upload/file` accepting the upload and echoing `file_name`
pub async fn mount_file_upload(server: &MockServer, file_name: &str, content_sha1: &str) {
    Mock::given(method("POST"))
        .and(path("/upload/file"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fileId": "small-1",
            "fileName": file_name,
            "contentLength": 0,
            "contentSha1": content_sha1,
        })))
        .mount(server)
        .await;
}

// ============================================================================
// Request inspection
// ============================================================================

/// Requests the mock received on `request_path`, in arrival order
pub async fn requests_to(server: &MockServer, request_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == request_path)
        .collect()
}

pub fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Part numbers of the part uploads the mock received, sorted
pub async fn uploaded_part_numbers(server: &MockServer) -> Vec<u32> {
    let mut numbers: Vec<u32> = requests_to(server, "/upload/part")
        .await
        .iter()
        .filter_map(|r| header(r, "X-Bz-Part-Number")?.parse().ok())
        .collect();
    numbers.sort_unstable();
    numbers
}

/// `partSha1Array` of the single finish call
pub async fn finished_part_sha1s(server: &MockServer) -> Vec<String> {
    let finishes = requests_to(server, &api("b2_finish_large_file")).await;
    assert_eq!(finishes.len(), 1, "expected exactly one finish call");
    let body: Value = serde_json::from_slice(&finishes[0].body).unwrap();
    serde_json::from_value(body["partSha1Array"].clone()).unwrap()
}
