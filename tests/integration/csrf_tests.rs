//! CSRF verification on state-mutating requests

use axum::{
    body::Body,
    http::{header, Method, StatusCode},
};
use serde_json::{json, Value};

use crate::common::*;

fn assert_csrf_rejection(response: &TestResponse) {
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body, json!({ "message": "NO CSRF TOKEN", "error": {} }));
}

#[tokio::test]
async fn test_post_without_token_is_rejected() {
    let app = TestApp::with_csrf().await;

    let response = app
        .send(app.build(Method::POST, "/logout"), Body::empty())
        .await;
    assert_csrf_rejection(&response);
}

#[tokio::test]
async fn test_post_with_wrong_token_is_rejected() {
    let app = TestApp::with_csrf().await;
    let mut session = anonymous_session(&app).await;
    session.csrf_token = Some("not-the-token".to_string());

    let response = app
        .post_json("/user/forgot", json!({ "email": "a@example.com" }), Some(&session))
        .await;
    assert_csrf_rejection(&response);
}

#[tokio::test]
async fn test_token_in_header_is_accepted() {
    let app = TestApp::with_csrf().await;
    let session = anonymous_session(&app).await;

    app.post_json("/user/forgot", json!({ "email": "a@example.com" }), Some(&session))
        .await
        .assert_ok();
}

#[tokio::test]
async fn test_token_in_query_is_accepted() {
    let app = TestApp::with_csrf().await;
    let session = anonymous_session(&app).await;
    let token = session.csrf_token.clone().unwrap();

    let response = app
        .send(
            app.build(Method::POST, &format!("/logout?_csrf={}", token))
                .header(header::COOKIE, &session.cookie),
            Body::empty(),
        )
        .await;
    response.assert_redirect("/");
}

#[tokio::test]
async fn test_token_in_form_field_is_accepted() {
    let app = TestApp::with_csrf().await;
    let session = anonymous_session(&app).await;
    let token = session.csrf_token.clone().unwrap();

    let response = app
        .send(
            app.build(Method::POST, "/user/forgot")
                .header(header::COOKIE, &session.cookie)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded"),
            Body::from(format!("email=a%40example.com&_csrf={}", token)),
        )
        .await;
    response.assert_redirect("/login");
}

#[tokio::test]
async fn test_token_without_session_is_rejected() {
    let app = TestApp::with_csrf().await;
    let session = anonymous_session(&app).await;

    let response = app
        .send(
            app.build(Method::POST, "/logout")
                .header("x-csrf-token", session.csrf_token.unwrap()),
            Body::empty(),
        )
        .await;
    assert_csrf_rejection(&response);
}

#[tokio::test]
async fn test_token_dies_with_regenerated_session() {
    let app = TestApp::with_csrf().await;
    let user = create_user(&app, "alice", UserKind::Member).await;

    let anonymous = anonymous_session(&app).await;
    let response = app
        .post_json(
            "/login",
            json!({ "email": user.email, "password": TEST_PASSWORD }),
            Some(&anonymous),
        )
        .await;
    response.assert_ok();

    let stale = app
        .send(anonymous.apply(app.build(Method::POST, "/logout")), Body::empty())
        .await;
    assert_csrf_rejection(&stale);
}

#[tokio::test]
async fn test_logged_in_session_token() {
    let app = TestApp::with_csrf().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let session = login(&app, &user).await;

    app.post_json("/me/keys", json!({ "name": "ci" }), Some(&session))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_safe_methods_skip_verification() {
    let app = TestApp::with_csrf().await;

    app.get_json("/", None).await.assert_ok();
    app.get_json("/login", None).await.assert_ok();
}

#[tokio::test]
async fn test_upload_paths_are_exempt() {
    let app = TestApp::with_csrf().await;
    let user = create_user(&app, "alice", UserKind::Member).await;
    let key = issue_api_key(&app, &user).await;

    for path in ["/api/upload", "/api/upload/file", "/api/upload/text"] {
        app.upload(path, Some(format!("Bearer {}", key).as_str()), "text/plain", "hello")
            .await
            .assert_ok();
    }
}

#[tokio::test]
async fn test_test_environment_skips_verification() {
    let app = TestApp::new().await;

    let response = app
        .send(app.build(Method::POST, "/logout"), Body::empty())
        .await;
    response.assert_redirect("/");
}

#[tokio::test]
async fn test_unreadable_body_without_token_is_a_csrf_rejection() {
    let app = TestApp::with_csrf().await;

    let malformed = app
        .send(
            app.build(Method::POST, "/user/forgot")
                .header(header::CONTENT_TYPE, "application/json"),
            Body::from("{oops"),
        )
        .await;
    assert_csrf_rejection(&malformed);

    let oversized = app
        .send(
            app.build(Method::POST, "/user/forgot")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded"),
            Body::from(format!("email={}", "a".repeat(70 * 1024))),
        )
        .await;
    assert_csrf_rejection(&oversized);
}

#[tokio::test]
async fn test_unreadable_body_with_valid_token_is_reported() {
    let app = TestApp::with_csrf().await;
    let session = anonymous_session(&app).await;

    let response = app
        .send(
            session.apply(
                app.build(Method::POST, "/user/forgot")
                    .header(header::CONTENT_TYPE, "application/json"),
            ),
            Body::from("{oops"),
        )
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
