//! Test fixtures for accounts, sessions and API keys

use axum::http::StatusCode;
use serde_json::json;

use upload_gate::{models::Identity, services::password::hash_password};

use super::test_app::{TestApp, TestSession};

/// Password given to every fixture account
pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Kinds of fixture account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKind {
    Admin,
    Member,
    /// Signed up but never activated
    Pending,
}

/// Insert an account straight into the credential store
pub async fn create_user(app: &TestApp, username: &str, kind: UserKind) -> Identity {
    let hash = hash_password(TEST_PASSWORD).expect("Failed to hash password");
    let mut identity = Identity::new(
        username.to_string(),
        format!("{}@example.com", username),
        hash,
    );
    match kind {
        UserKind::Admin => identity = identity.activated().admin(),
        UserKind::Member => identity = identity.activated(),
        UserKind::Pending => {}
    }

    app.state
        .auth
        .credentials
        .insert_user(&identity)
        .await
        .expect("Failed to insert user");
    identity
}

/// Fetch a CSRF token, starting an anonymous session
pub async fn anonymous_session(app: &TestApp) -> TestSession {
    let response = app.get_json("/csrf-token", None).await;
    response.assert_ok();

    let cookie = response
        .cookie(app.cookie_name())
        .expect("csrf-token should start a session");
    let body: serde_json::Value = response.json();
    TestSession {
        cookie,
        csrf_token: body["csrfToken"].as_str().map(str::to_string),
    }
}

/// Log `identity` in through `POST /login` and return the new session
pub async fn login(app: &TestApp, identity: &Identity) -> TestSession {
    let anonymous = anonymous_session(app).await;
    let response = app
        .post_json(
            "/login",
            json!({ "email": identity.email, "password": TEST_PASSWORD }),
            Some(&anonymous),
        )
        .await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    TestSession {
        cookie: response
            .cookie(app.cookie_name())
            .expect("login should set the session cookie"),
        csrf_token: body["csrfToken"].as_str().map(str::to_string),
    }
}

/// Create an API key for `owner` and return the raw key
pub async fn issue_api_key(app: &TestApp, owner: &Identity) -> String {
    let (_, key) = app
        .state
        .auth
        .api_keys
        .issue_key(owner.id, "fixture")
        .await
        .expect("Failed to issue API key");
    key
}
