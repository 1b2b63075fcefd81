//! Signup, activation and password reset

use axum::{
    body::Body,
    http::{Method, StatusCode},
};
use serde_json::{json, Value};

use upload_gate::{middleware::guard::NOT_ACTIVATED_MESSAGE, models::TokenKind};

use crate::common::*;

async fn signup(app: &TestApp, username: &str) -> TestResponse {
    app.post_json(
        "/user/signup",
        json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": TEST_PASSWORD,
        }),
        None,
    )
    .await
}

#[tokio::test]
async fn test_signup_then_activate_then_login() {
    let app = TestApp::new().await;

    let response = signup(&app, "newbie").await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["user"]["is_activated"], false);
    assert_eq!(body["user"]["is_admin"], false);

    // Not activated yet
    let denied = app
        .post_json(
            "/login",
            json!({ "email": "newbie@example.com", "password": TEST_PASSWORD }),
            None,
        )
        .await;
    denied.assert_status(StatusCode::FORBIDDEN);
    let denied: Value = denied.json();
    assert_eq!(denied["error"], "not_activated");
    assert_eq!(denied["messages"][0]["text"], NOT_ACTIVATED_MESSAGE);

    let identity = app
        .state
        .auth
        .accounts
        .find_by_email("newbie@example.com")
        .await
        .unwrap();
    let token = app
        .state
        .auth
        .accounts
        .issue_token(identity.id, TokenKind::Activation)
        .await
        .unwrap();

    app.get_json(&format!("/user/activate/{}", token), None)
        .await
        .assert_ok();

    let identity = app
        .state
        .auth
        .accounts
        .find_by_email("newbie@example.com")
        .await
        .unwrap();
    assert!(identity.is_activated);
    login(&app, &identity).await;
}

#[tokio::test]
async fn test_activation_token_is_single_use() {
    let app = TestApp::new().await;
    let user = create_user(&app, "pending", UserKind::Pending).await;
    let token = app
        .state
        .auth
        .accounts
        .issue_token(user.id, TokenKind::Activation)
        .await
        .unwrap();

    app.get_json(&format!("/user/activate/{}", token), None)
        .await
        .assert_ok();
    app.get_json(&format!("/user/activate/{}", token), None)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_browser_login_of_pending_account_is_redirected() {
    let app = TestApp::new().await;
    create_user(&app, "pending", UserKind::Pending).await;

    let response = app
        .send(
            app.build(Method::POST, "/login")
                .header("content-type", "application/x-www-form-urlencoded"),
            Body::from(format!("email=pending%40example.com&password={}", TEST_PASSWORD)),
        )
        .await;
    response.assert_redirect("/login");
    assert!(response.cookie(app.cookie_name()).is_some());
}

#[tokio::test]
async fn test_duplicate_signup_conflicts() {
    let app = TestApp::new().await;
    create_user(&app, "taken", UserKind::Member).await;

    signup(&app, "taken")
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_signup_validation() {
    let app = TestApp::new().await;

    let response = app
        .post_json(
            "/user/signup",
            json!({ "username": "x", "email": "not-an-email", "password": "short" }),
            None,
        )
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_signups_can_be_disabled() {
    let mut config = test_config();
    config.accounts.signups_enabled = false;
    let app = TestApp::with_config(config).await;

    signup(&app, "newbie")
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let index: Value = app.get_json("/", None).await.json();
    assert_eq!(index["signups_enabled"], false);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = TestApp::new().await;
    let user = create_user(&app, "forgetful", UserKind::Member).await;
    let token = app
        .state
        .auth
        .accounts
        .issue_token(user.id, TokenKind::PasswordReset)
        .await
        .unwrap();
    let path = format!("/user/reset/{}", token);

    let form = app.get_json(&path, None).await;
    form.assert_ok();
    let form: Value = form.json();
    assert_eq!(form["page"], "reset");
    assert_eq!(form["token"], token.as_str());

    app.post_json(&path, json!({ "password": "a-brand-new-password" }), None)
        .await
        .assert_ok();

    assert!(app
        .state
        .auth
        .accounts
        .authenticate(&user.email, "a-brand-new-password")
        .await
        .is_some());
    assert!(app
        .state
        .auth
        .accounts
        .authenticate(&user.email, TEST_PASSWORD)
        .await
        .is_none());

    // Consumed
    app.get_json(&path, None)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_reset_token() {
    let app = TestApp::new().await;

    let response = app.get_json("/user/reset/bogus", None).await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_reset_token");
    assert_eq!(body["redirect"], "/user/forgot");

    app.get("/user/reset/bogus")
        .await
        .assert_redirect("/user/forgot");
}

#[tokio::test]
async fn test_activation_token_cannot_reset_password() {
    let app = TestApp::new().await;
    let user = create_user(&app, "pending", UserKind::Pending).await;
    let token = app
        .state
        .auth
        .accounts
        .issue_token(user.id, TokenKind::Activation)
        .await
        .unwrap();

    app.get_json(&format!("/user/reset/{}", token), None)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_forgot_and_resend_do_not_reveal_accounts() {
    let app = TestApp::new().await;
    create_user(&app, "pending", UserKind::Pending).await;

    for email in ["pending@example.com", "nobody@example.com"] {
        let forgot: Value = app
            .post_json("/user/forgot", json!({ "email": email }), None)
            .await
            .json();
        let resend: Value = app
            .post_json("/user/activate/resend", json!({ "email": email }), None)
            .await
            .json();
        assert_eq!(forgot["success"], true);
        assert_eq!(resend["success"], true);
    }
}
