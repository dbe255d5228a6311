//! Cloud Backend Integration Tests
//!
//! ## Test Coverage
//!
//! - Backend selection from configuration
//! - Object status transitions on upload
//! - Upload preconditions (missing file, already stored, in flight)
//! - Object info and public URLs need a stored copy
//! - Session refresh after an expired token
//! - Upload then download restores identical bytes, direct and multipart
//! - Upload sweep over pending objects

mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use cloud_archiver::b2::B2Client;
    use cloud_archiver::cloud::{upload_pending, B2Backend, Backend, ObjectStatus, StoredObject, UploadSummary};
    use cloud_archiver::config::{BackendKind, Config};
    use cloud_archiver::{CloudBackend, TransferError};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn connect(server: &MockServer) -> B2Backend {
        mount_auth(server, 100, 5).await;
        mount_buckets(server).await;

        B2Backend::connect(
            B2Client::new(None).unwrap(),
            &auth_url(server),
            credentials(),
            BUCKET_ID,
            settings(),
        )
        .await
        .unwrap()
    }

    fn stored(object: &mut StoredObject) {
        object.status = ObjectStatus::Stored;
        object.metadata = json!({ "fileId": "small-1", "fileName": object.name });
    }

    // ========================================================================
    // TEST: Backend selection
    // ========================================================================

    #[tokio::test]
    async fn test_from_config_builds_b2_backend() {
        let server = MockServer::start().await;
        mount_auth(&server, 100, 5).await;
        mount_buckets(&server).await;

        let yaml = format!(
            r#"
backend:
  kind: b2
  auth_url: "{}"
  key_id: "id"
  application_key: "secret"
  bucket_id: "{}"
transfer:
  workers: 2
"#,
            auth_url(&server),
            BUCKET_ID
        );
        let config = Config::from_yaml(&yaml).unwrap();

        let backend = Backend::from_config(&config).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::B2);

        let cloud = backend.cloud().unwrap();
        assert_eq!(cloud.test_configuration().await.unwrap(), BUCKET_NAME);
    }

    #[tokio::test]
    async fn test_unknown_bucket_is_configuration_error() {
        let server = MockServer::start().await;
        mount_auth(&server, 100, 5).await;
        mount_buckets(&server).await;

        let result = B2Backend::connect(
            B2Client::new(None).unwrap(),
            &auth_url(&server),
            credentials(),
            "missing-bucket",
            settings(),
        )
        .await;

        assert!(matches!(result, Err(TransferError::ConfigurationError(_))));
    }

    // ========================================================================
    // TEST: Upload status transitions
    // ========================================================================

    #[tokio::test]
    async fn test_upload_object_marks_stored() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let (file, data) = write_file(&dir, "short.mp3", 50);
        let sha1 = sha1_hex(&data);

        let backend = connect(&server).await;
        mount_upload_url(&server).await;
        mount_file_upload(&server, "events/1/short.mp3", &sha1).await;

        let mut object = StoredObject::new(7, "events/1/short.mp3", &file).with_info("event", "1");
        backend.upload_object(&mut object).await.unwrap();

        assert_eq!(object.status, ObjectStatus::Stored);
        assert_eq!(object.size, 50);
        assert_eq!(object.content_sha1.as_deref(), Some(sha1.as_str()));
        assert_eq!(object.file_id(), Some("small-1"));

        let upload = &requests_to(&server, "/upload/file").await[0];
        assert_eq!(header(upload, "X-Bz-Info-event"), Some("1"));
    }

    #[tokio::test]
    async fn test_upload_failure_marks_failed() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let (file, _) = write_file(&dir, "short.mp3", 50);

        let backend = connect(&server).await;
        mount_upload_url(&server).await;
        Mock::given(method("POST"))
            .and(path("/upload/file"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut object = StoredObject::new(7, "events/1/short.mp3", &file);
        let result = backend.upload_object(&mut object).await;

        assert!(matches!(result, Err(TransferError::UploadFailed(_))));
        assert_eq!(object.status, ObjectStatus::Failed);
    }

    #[tokio::test]
    async fn test_upload_stored_object_is_noop() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let (file, _) = write_file(&dir, "short.mp3", 50);

        let backend = connect(&server).await;
        Mock::given(method("POST"))
            .and(path(api("b2_get_upload_url")))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mut object = StoredObject::new(7, "events/1/short.mp3", &file);
        stored(&mut object);
        backend.upload_object(&mut object).await.unwrap();

        assert_eq!(object.status, ObjectStatus::Stored);
    }

    #[tokio::test]
    async fn test_upload_in_flight_object_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let (file, _) = write_file(&dir, "short.mp3", 50);

        let backend = connect(&server).await;
        let mut object = StoredObject::new(7, "events/1/short.mp3", &file);
        object.status = ObjectStatus::Uploading;

        let result = backend.upload_object(&mut object).await;
        assert!(matches!(result, Err(TransferError::InvalidObject(_))));
    }

    #[tokio::test]
    async fn test_upload_missing_local_file() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        let backend = connect(&server).await;
        let mut object = StoredObject::new(7, "events/1/gone.mp3", dir.path().join("gone.mp3"));

        let result = backend.upload_object(&mut object).await;
        assert!(matches!(result, Err(TransferError::FileMissing(_))));
        assert_eq!(object.status, ObjectStatus::Local);
    }

    // ========================================================================
    // TEST: Stored-copy operations
    // ========================================================================

    #[tokio::test]
    async fn test_object_info_requires_stored_copy() {
        let server = MockServer::start().await;
        let backend = connect(&server).await;

        let object = StoredObject::new(7, "events/1/a.mp3", "/tmp/a.mp3");
        let result = backend.object_info(&object).await;

        assert!(matches!(result, Err(TransferError::FileNotStored(_))));
    }

    #[tokio::test]
    async fn test_object_info_uses_file_id() {
        let server = MockServer::start().await;
        let backend = connect(&server).await;

        Mock::given(method("POST"))
            .and(path(api("b2_get_file_info")))
            .and(body_partial_json(json!({ "fileId": "small-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "fileId": "small-1",
                "fileName": "events/1/a.mp3",
                "contentLength": 50,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut object = StoredObject::new(7, "events/1/a.mp3", "/tmp/a.mp3");
        stored(&mut object);
        let version = backend.object_info(&object).await.unwrap();

        assert_eq!(version.content_length, Some(50));
    }

    #[tokio::test]
    async fn test_public_download_url() {
        let server = MockServer::start().await;
        let backend = connect(&server).await;

        Mock::given(method("POST"))
            .and(path(api("b2_get_download_authorization")))
            .and(body_partial_json(json!({
                "bucketId": BUCKET_ID,
                "fileNamePrefix": "events/1/a b.mp3",
                "validDurationInSeconds": 86400,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bucketId": BUCKET_ID,
                "fileNamePrefix": "events/1/a b.mp3",
                "authorizationToken": "dl-token",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut object = StoredObject::new(7, "events/1/a b.mp3", "/tmp/a.mp3");
        stored(&mut object);
        let url = backend.public_download_url(&object).await.unwrap();

        assert_eq!(
            url,
            format!("{}/file/archive/events/1/a%20b.mp3?Authorization=dl-token", server.uri())
        );
    }

    // ========================================================================
    // TEST: Session refresh
    // ========================================================================

    #[tokio::test]
    async fn test_expired_token_refreshes_session_once() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let (file, data) = write_file(&dir, "short.mp3", 50);

        Mock::given(method("GET"))
            .and(path(api("b2_authorize_account")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accountId": ACCOUNT_ID,
                "authorizationToken": AUTH_TOKEN,
                "apiUrl": server.uri(),
                "downloadUrl": server.uri(),
                "recommendedPartSize": 100,
                "absoluteMinimumPartSize": 5,
            })))
            .expect(2)
            .mount(&server)
            .await;
        mount_buckets(&server).await;

        Mock::given(method("POST"))
            .and(path(api("b2_get_upload_url")))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "status": 401,
                "code": "expired_auth_token",
                "message": "Authorization token has expired",
            })))
            .with_priority(1)
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_upload_url(&server).await;
        mount_file_upload(&server, "events/1/short.mp3", &sha1_hex(&data)).await;

        let backend = B2Backend::connect(
            B2Client::new(None).unwrap(),
            &auth_url(&server),
            credentials(),
            BUCKET_ID,
            settings(),
        )
        .await
        .unwrap();

        let mut object = StoredObject::new(7, "events/1/short.mp3", &file);
        backend.upload_object(&mut object).await.unwrap();

        assert_eq!(object.status, ObjectStatus::Stored);
    }

    // ========================================================================
    // TEST: Round trip
    // ========================================================================

    #[tokio::test]
    async fn test_upload_then_download_restores_bytes() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let (file, data) = write_file(&dir, "short.mp3", 64);

        let backend = connect(&server).await;
        mount_upload_url(&server).await;
        mount_file_upload(&server, "events/1/short.mp3", &sha1_hex(&data)).await;

        let mut object = StoredObject::new(7, "events/1/short.mp3", &file);
        backend.upload_object(&mut object).await.unwrap();

        // Serve back exactly what was uploaded
        let uploaded = requests_to(&server, "/upload/file").await[0].body.clone();
        Mock::given(method("GET"))
            .and(path("/file/archive/events/1/short.mp3"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(uploaded))
            .mount(&server)
            .await;

        std::fs::remove_file(&file).unwrap();
        object.path = dir.path().join("restored").join("short.mp3");
        let outcome = backend.download_object(&object).await.unwrap();

        assert_eq!(std::fs::read(&outcome.path).unwrap(), data);
        assert_eq!(Some(outcome.sha1), object.content_sha1);
    }

    #[tokio::test]
    async fn test_multipart_upload_then_ranged_download_restores_bytes() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let (file, data) = write_file(&dir, "long.mp3", 350);
        let name = "events/2/long.mp3";

        let backend = connect(&server).await;
        mount_unfinished(&server, json!([])).await;
        mount_start_large_file(&server, name).await;
        mount_part_url(&server).await;
        mount_part_upload(&server).await;
        mount_finish(&server, name, &sha1_hex(&data)).await;

        let mut object = StoredObject::new(8, name, &file);
        backend.upload_object(&mut object).await.unwrap();
        assert_eq!(object.status, ObjectStatus::Stored);

        // Reassemble the object from the part bodies the backend received
        let mut parts: Vec<(u32, Vec<u8>)> = requests_to(&server, "/upload/part")
            .await
            .into_iter()
            .map(|r| {
                let number = super::common::header(&r, "X-Bz-Part-Number")
                    .unwrap()
                    .parse()
                    .unwrap();
                (number, r.body)
            })
            .collect();
        parts.sort_by_key(|(number, _)| *number);
        assert_eq!(parts.len(), 4);
        let stored: Vec<u8> = parts.into_iter().flat_map(|(_, body)| body).collect();

        for start in (0..stored.len()).step_by(100) {
            let last = (start + 99).min(stored.len() - 1);
            Mock::given(method("GET"))
                .and(path("/file/archive/events/2/long.mp3"))
                .and(wiremock::matchers::header(
                    "Range",
                    format!("bytes={}-{}", start, start + 99).as_str(),
                ))
                .respond_with(
                    ResponseTemplate::new(206)
                        .set_body_bytes(stored[start..=last].to_vec())
                        .insert_header(
                            "Content-Range",
                            format!("bytes {}-{}/{}", start, last, stored.len()).as_str(),
                        ),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        std::fs::remove_file(&file).unwrap();
        object.path = dir.path().join("restored").join("long.mp3");
        let outcome = backend.download_object(&object).await.unwrap();

        assert_eq!(outcome.bytes_written, 350);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), data);
        assert_eq!(Some(outcome.sha1), object.content_sha1);
    }

    #[tokio::test]
    async fn test_download_requires_stored_copy() {
        let server = MockServer::start().await;
        let backend = connect(&server).await;

        let object = StoredObject::new(7, "events/1/a.mp3", "/tmp/a.mp3");
        let result = backend.download_object(&object).await;

        assert!(matches!(result, Err(TransferError::FileNotStored(_))));
    }

    // ========================================================================
    // TEST: Upload sweep
    // ========================================================================

    #[tokio::test]
    async fn test_upload_pending_counts_outcomes() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let (ready, data) = write_file(&dir, "ready.mp3", 50);
        let (done, _) = write_file(&dir, "done.mp3", 50);

        let backend = connect(&server).await;
        mount_upload_url(&server).await;
        mount_file_upload(&server, "events/1/ready.mp3", &sha1_hex(&data)).await;

        let mut already = StoredObject::new(2, "events/1/done.mp3", &done);
        stored(&mut already);

        let mut objects = vec![
            StoredObject::new(1, "events/1/ready.mp3", &ready),
            already,
            StoredObject::new(3, "events/1/gone.mp3", dir.path().join("gone.mp3")),
        ];

        let summary = upload_pending(&backend, &mut objects).await;

        assert_eq!(
            summary,
            UploadSummary {
                uploaded: 1,
                failed: 1,
                skipped: 1,
            }
        );
        assert_eq!(objects[0].status, ObjectStatus::Stored);
        assert_eq!(objects[2].status, ObjectStatus::Local);
    }
}
