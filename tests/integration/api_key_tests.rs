//! Upload API authentication

use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::common::*;

#[tokio::test]
async fn test_missing_authorization() {
    let app = TestApp::new().await;

    let response = app.upload("/api/upload", None, "text/plain", "data").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(
        body,
        json!({
            "auth": false,
            "success": false,
            "error": { "authorization": "No authorization provided." },
        })
    );
}

#[tokio::test]
async fn test_unknown_key() {
    let app = TestApp::new().await;

    let response = app
        .upload("/api/upload", Some("Bearer ug_unknown"), "text/plain", "data")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["authorization"], "Invalid api key provided.");
}

#[tokio::test]
async fn test_header_without_credential() {
    let app = TestApp::new().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let key = issue_api_key(&app, &user).await;

    // No space: nothing after the scheme word, so no credential
    let response = app.upload("/api/upload", Some(key.as_str()), "text/plain", "data").await;
    let body: Value = response.json();
    assert_eq!(body["error"]["authorization"], "Invalid api key provided.");
}

#[tokio::test]
async fn test_valid_key_stores_file() {
    let app = TestApp::new().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let key = issue_api_key(&app, &user).await;

    let response = app
        .upload(
            "/api/upload/file",
            Some(format!("Bearer {}", key).as_str()),
            "application/pdf",
            vec![0x25u8, 0x50, 0x44, 0x46],
        )
        .await;
    response.assert_ok();

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["file"]["uploaded_by"], "alice");
    assert_eq!(body["file"]["size"], 4);

    let name = body["file"]["name"].as_str().unwrap();
    assert!(name.ends_with(".pdf"));
    let stored = std::fs::read(app.upload_dir().join(name)).unwrap();
    assert_eq!(stored, vec![0x25u8, 0x50, 0x44, 0x46]);
}

#[tokio::test]
async fn test_any_scheme_word_is_accepted() {
    let app = TestApp::new().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let key = issue_api_key(&app, &user).await;

    app.upload(
        "/api/upload/text",
        Some(format!("Key {}", key).as_str()),
        "text/plain",
        "hello",
    )
    .await
    .assert_ok();
}

#[tokio::test]
async fn test_key_of_deleted_owner_is_invalid() {
    let app = TestApp::new().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let key = issue_api_key(&app, &user).await;
    app.state.auth.credentials.delete_user(user.id).await.unwrap();

    let response = app
        .upload("/api/upload", Some(format!("Bearer {}", key).as_str()), "text/plain", "data")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["authorization"], "Invalid api key provided.");
}

#[tokio::test]
async fn test_image_route_rejects_other_types() {
    let app = TestApp::new().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let key = issue_api_key(&app, &user).await;

    app.upload(
        "/api/upload/image",
        Some(format!("Bearer {}", key).as_str()),
        "text/plain",
        "not an image",
    )
    .await
    .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let app = TestApp::new().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let key = issue_api_key(&app, &user).await;

    app.upload("/api/upload", Some(format!("Bearer {}", key).as_str()), "text/plain", "")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_does_not_open_upload_api() {
    let app = TestApp::new().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let session = login(&app, &user).await;

    let response = app
        .send(
            session.apply(
                app.build(axum::http::Method::POST, "/api/upload")
                    .header("content-type", "text/plain"),
            ),
            axum::body::Body::from("data"),
        )
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}
