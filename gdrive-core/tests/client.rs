use std::time::Duration;

use gdrive_core::{ApiErrorClass, DriveClient, DriveError, FileList, FileMetadata, RequestSpec};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn list_children_sends_bearer_token_and_parses_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", "'folder-abc' in parents and trashed = false"))
        .and(query_param("pageSize", "2"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nextPageToken": "page-2",
            "files": [
                {
                    "id": "f1",
                    "name": "Sub",
                    "mimeType": "application/vnd.google-apps.folder"
                },
                {
                    "id": "f2",
                    "name": "a.txt",
                    "mimeType": "text/plain",
                    "size": "12",
                    "md5Checksum": "h1"
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri()).unwrap();
    let spec = RequestSpec::list_children("folder-abc", None, 2, false);
    let page: FileList = client.send_as(&spec, "test-token", TIMEOUT).await.unwrap();

    assert_eq!(page.next_page_token.as_deref(), Some("page-2"));
    assert_eq!(page.files.len(), 2);
    assert!(page.files[0].is_folder());
    assert_eq!(page.files[1].size, Some(12));
}

#[tokio::test]
async fn create_folder_posts_folder_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/drive/v3/files"))
        .and(query_param("supportsAllDrives", "true"))
        .and(body_json(json!({
            "name": "Backup",
            "mimeType": "application/vnd.google-apps.folder",
            "parents": ["parent-1"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "new-folder",
            "name": "Backup",
            "mimeType": "application/vnd.google-apps.folder"
        })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri()).unwrap();
    let created: FileMetadata = client
        .send_as(
            &RequestSpec::create_folder("Backup", "parent-1"),
            "test-token",
            TIMEOUT,
        )
        .await
        .unwrap();

    assert_eq!(created.id, "new-folder");
}

#[tokio::test]
async fn delete_returns_null_on_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/drive/v3/files/item-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri()).unwrap();
    let value = client
        .send(&RequestSpec::delete("item-1"), "test-token", TIMEOUT)
        .await
        .unwrap();

    assert!(value.is_null());
}

#[tokio::test]
async fn trash_patches_trashed_flag() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/drive/v3/files/item-2"))
        .and(body_json(json!({ "trashed": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "item-2" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri()).unwrap();
    client
        .send(&RequestSpec::trash("item-2"), "test-token", TIMEOUT)
        .await
        .unwrap();
}

#[tokio::test]
async fn rate_limit_response_is_classified() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/drive/v3/files/file-1/copy"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "User rate limit exceeded." }
        })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri()).unwrap();
    let err = client
        .send(&RequestSpec::copy_file("file-1", "dest"), "test-token", TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, DriveError::Api { .. }));
    assert_eq!(err.classification(), ApiErrorClass::RateLimit);
    assert_eq!(err.api_message().as_deref(), Some("User rate limit exceeded."));
}

#[tokio::test]
async fn slow_response_times_out_as_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "slow", "name": "slow" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri()).unwrap();
    let err = client
        .send(
            &RequestSpec::get_metadata("slow"),
            "test-token",
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.classification(), ApiErrorClass::Transient);
}
