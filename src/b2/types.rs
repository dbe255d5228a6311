//! Wire types for the B2 native API
//!
//! Field names follow the JSON bodies exchanged with the service
//! (`camelCase`), mapped onto Rust naming with serde.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response of `b2_authorize_account`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeAccountResponse {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
    pub recommended_part_size: u64,
    pub absolute_minimum_part_size: u64,
}

/// A bucket as reported by `b2_list_buckets`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketEntry {
    pub bucket_id: String,
    pub bucket_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListBucketsResponse {
    pub buckets: Vec<BucketEntry>,
}

/// Single-use upload target returned by `b2_get_upload_url` and
/// `b2_get_upload_part_url`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub upload_url: String,
    pub authorization_token: String,
}

/// Metadata of a stored (or in-progress) file version.
///
/// This is the "backend metadata" handed back to the object record store
/// after a successful transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub content_sha1: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_info: HashMap<String, String>,
    #[serde(default)]
    pub upload_timestamp: Option<i64>,
    #[serde(default)]
    pub action: Option<String>,
}

impl FileVersion {
    /// Full-file SHA-1 the backend knows for this version.
    ///
    /// Large files report `"none"` as their content hash and carry the real
    /// one in `large_file_sha1` file info.
    pub fn declared_sha1(&self) -> Option<&str> {
        match self.content_sha1.as_deref() {
            Some(sha1) if sha1 != "none" => Some(sha1.trim_start_matches("unverified:")),
            _ => self.file_info.get(LARGE_FILE_SHA1).map(String::as_str),
        }
    }
}

/// File info key under which a large file's full SHA-1 is recorded
pub const LARGE_FILE_SHA1: &str = "large_file_sha1";

/// Unfinished large upload, as listed by `b2_list_unfinished_large_files`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnfinishedFile {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_info: HashMap<String, String>,
    pub upload_timestamp: i64,
}

impl UnfinishedFile {
    /// Full-file SHA-1 recorded when the upload was started
    pub fn large_file_sha1(&self) -> Option<&str> {
        self.file_info.get(LARGE_FILE_SHA1).map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUnfinishedResponse {
    pub files: Vec<UnfinishedFile>,
    #[serde(default)]
    pub next_file_id: Option<String>,
}

/// Part already stored for an unfinished large upload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPart {
    pub part_number: u32,
    pub content_length: u64,
    pub content_sha1: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPartsResponse {
    pub parts: Vec<UploadedPart>,
    #[serde(default)]
    pub next_part_number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAuthorization {
    pub authorization_token: String,
}

/// Error body returned by the service on non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authorize_response() {
        let json = r#"{
            "accountId": "acc-1",
            "authorizationToken": "tok",
            "apiUrl": "https://api001.example.com",
            "downloadUrl": "https://f001.example.com",
            "recommendedPartSize": 100000000,
            "absoluteMinimumPartSize": 5000000,
            "allowed": {"capabilities": ["listBuckets"]}
        }"#;

        let auth: AuthorizeAccountResponse = serde_json::from_str(json).unwrap();
        assert_eq!(auth.account_id, "acc-1");
        assert_eq!(auth.recommended_part_size, 100_000_000);
        assert_eq!(auth.absolute_minimum_part_size, 5_000_000);
    }

    #[test]
    fn test_declared_sha1_small_file() {
        let version: FileVersion = serde_json::from_str(
            r#"{"fileId": "f1", "fileName": "a.mp3", "contentSha1": "abc"}"#,
        )
        .unwrap();
        assert_eq!(version.declared_sha1(), Some("abc"));
    }

    #[test]
    fn test_declared_sha1_large_file() {
        let version: FileVersion = serde_json::from_str(
            r#"{
                "fileId": "f1",
                "fileName": "a.mp3",
                "contentSha1": "none",
                "fileInfo": {"large_file_sha1": "def"}
            }"#,
        )
        .unwrap();
        assert_eq!(version.declared_sha1(), Some("def"));
    }

    #[test]
    fn test_list_unfinished_last_page() {
        let page: ListUnfinishedResponse =
            serde_json::from_str(r#"{"files": [], "nextFileId": null}"#).unwrap();
        assert!(page.files.is_empty());
        assert!(page.next_file_id.is_none());
    }
}
