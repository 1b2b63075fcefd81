//! Fallback and health routes

use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::common::*;

#[tokio::test]
async fn test_unknown_path_plain() {
    let app = TestApp::new().await;

    let response = app.get("/nope").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "Not Found");
}

#[tokio::test]
async fn test_unknown_path_json() {
    let app = TestApp::new().await;

    let response = app.get_json("/nope", None).await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body, json!({ "error": "not_found", "message": "Not found" }));
}

#[tokio::test]
async fn test_readiness_reports_store() {
    let app = TestApp::new().await;

    let response = app.get("/health/ready").await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["status"], "healthy");
}

#[tokio::test]
async fn test_index_shows_current_user() {
    let app = TestApp::new().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let session = login(&app, &user).await;

    let body: Value = app.get_json("/", Some(&session.cookie)).await.json();
    assert_eq!(body["page"], "index");
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["signups_enabled"], true);
}

#[tokio::test]
async fn test_csrf_token_reuses_session() {
    let app = TestApp::new().await;
    let session = anonymous_session(&app).await;

    let response = app.get_json("/csrf-token", Some(&session.cookie)).await;
    let body: Value = response.json();
    assert_eq!(body["csrfToken"].as_str(), session.csrf_token.as_deref());
}
