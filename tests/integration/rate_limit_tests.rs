//! Fixed-window rate limiting through the full router

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use crate::common::*;

#[tokio::test]
async fn test_api_quota_and_window_reset() {
    let app = TestApp::new().await;

    for i in 0..15 {
        let response = app.upload("/api/upload", None, "text/plain", "data").await;
        assert_eq!(
            response.status,
            StatusCode::UNAUTHORIZED,
            "request {} should reach the API key check",
            i + 1
        );
    }

    let limited = app.upload("/api/upload", None, "text/plain", "data").await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.text(), "Too many requests, please try again later.");
    assert!(limited.headers.contains_key("retry-after"));
    assert_eq!(
        limited.headers.get("x-ratelimit-remaining").unwrap(),
        "0"
    );

    app.clock.advance(Duration::from_secs(60));

    app.upload("/api/upload", None, "text/plain", "data")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_limit_headers_count_down() {
    let app = TestApp::new().await;

    let first = app.upload("/api/upload", None, "text/plain", "data").await;
    assert_eq!(first.headers.get("x-ratelimit-limit").unwrap(), "15");
    assert_eq!(first.headers.get("x-ratelimit-remaining").unwrap(), "14");

    let second = app.upload("/api/upload", None, "text/plain", "data").await;
    assert_eq!(second.headers.get("x-ratelimit-remaining").unwrap(), "13");
}

#[tokio::test]
async fn test_groups_are_counted_separately() {
    let app = TestApp::new().await;

    for _ in 0..16 {
        app.upload("/api/upload", None, "text/plain", "data").await;
    }
    app.upload("/api/upload", None, "text/plain", "data")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    app.post_json("/user/forgot", json!({ "email": "nobody@example.com" }), None)
        .await
        .assert_ok();
}

#[tokio::test]
async fn test_ungrouped_paths_are_not_limited() {
    let app = TestApp::new().await;

    for _ in 0..30 {
        let response = app.get("/health").await;
        response.assert_ok();
        assert!(!response.headers.contains_key("x-ratelimit-limit"));
    }
}

#[tokio::test]
async fn test_account_quota() {
    let app = TestApp::new().await;

    for _ in 0..50 {
        app.post_json("/user/forgot", json!({ "email": "nobody@example.com" }), None)
            .await
            .assert_ok();
    }

    app.post_json("/user/forgot", json!({ "email": "nobody@example.com" }), None)
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(Duration::from_secs(15 * 60));

    app.post_json("/user/forgot", json!({ "email": "nobody@example.com" }), None)
        .await
        .assert_ok();
}
