//! Test application setup utilities
//!
//! Provides a router wired exactly like the server, backed by the in-memory
//! store, with a manual rate-limit clock and a fixed client address.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, request::Builder, HeaderMap, Method, Request, StatusCode},
    Router,
};
use tower::ServiceExt;
use uuid::Uuid;

use upload_gate::{
    api,
    config::{AppConfig, Environment},
    middleware::{ManualClock, RateLimitState},
    AppState, Stores,
};

/// Start of the manual clock; aligned to a one-minute window
pub const CLOCK_START_MS: u64 = 1_700_000_040_000;

/// Address every test request appears to come from
pub const TEST_PEER: ([u8; 4], u16) = ([127, 0, 0, 1], 40000);

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    /// Create a new test application (test environment, CSRF off)
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Create a test application that enforces CSRF tokens
    pub async fn with_csrf() -> Self {
        Self::with_config(test_config_with_csrf()).await
    }

    /// Create a new test application with custom configuration
    pub async fn with_config(config: AppConfig) -> Self {
        let clock = Arc::new(ManualClock::new(CLOCK_START_MS));
        let rate_limits = RateLimitState::with_clock(
            config.rate_limits.clone(),
            config.server.trust_proxy,
            clock.clone(),
        );
        let state = AppState::with_rate_limits(config, Stores::memory(), rate_limits);

        let router = api::router(state.clone()).layer(MockConnectInfo(SocketAddr::from(TEST_PEER)));

        Self {
            router,
            state,
            clock,
        }
    }

    /// Start building a request
    pub fn build(&self, method: Method, uri: &str) -> Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Make a GET request to the test application
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(self.build(Method::GET, uri), Body::empty()).await
    }

    /// Make a GET request asking for JSON, optionally with a session cookie
    pub async fn get_json(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = self
            .build(Method::GET, uri)
            .header(header::ACCEPT, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder, Body::empty()).await
    }

    /// Make a POST request with a JSON body asking for a JSON answer
    pub async fn post_json(
        &self,
        uri: &str,
        body: serde_json::Value,
        session: Option<&TestSession>,
    ) -> TestResponse {
        let mut builder = self
            .build(Method::POST, uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json");
        if let Some(session) = session {
            builder = session.apply(builder);
        }
        self.send(builder, Body::from(body.to_string())).await
    }

    /// Upload `body` to `uri` with an optional `Authorization` value
    pub async fn upload(
        &self,
        uri: &str,
        authorization: Option<&str>,
        content_type: &str,
        body: impl Into<Body>,
    ) -> TestResponse {
        let mut builder = self
            .build(Method::POST, uri)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        self.send(builder, body.into()).await
    }

    /// Send a built request
    pub async fn send(&self, builder: Builder, body: Body) -> TestResponse {
        self.request(builder.body(body).expect("Failed to build request"))
            .await
    }

    /// Make an arbitrary request
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Name of the session cookie
    pub fn cookie_name(&self) -> &str {
        &self.state.config.session.cookie_name
    }

    /// Directory uploads are written to
    pub fn upload_dir(&self) -> &PathBuf {
        &self.state.config.uploads.directory
    }
}

/// A logged-in (or anonymous) browser: its cookie and CSRF token
#[derive(Debug, Clone)]
pub struct TestSession {
    pub cookie: String,
    pub csrf_token: Option<String>,
}

impl TestSession {
    /// Attach the cookie and, when known, the CSRF header
    pub fn apply(&self, builder: Builder) -> Builder {
        let builder = builder.header(header::COOKIE, &self.cookie);
        match &self.csrf_token {
            Some(token) => builder.header("x-csrf-token", token),
            None => builder,
        }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

impl TestResponse {
    /// Get the response body as a string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Parse the response body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    /// `Location` header, if any
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    /// `name=value` pair of the cookie named `name` set by this response
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim())
            .find(|pair| pair.split_once('=').is_some_and(|(n, _)| n == name))
            .map(str::to_string)
    }

    /// Assert the response status
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    /// Assert the response status is OK (200)
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Assert a `303 See Other` to `location`
    pub fn assert_redirect(&self, location: &str) -> &Self {
        self.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(self.location(), Some(location));
        self
    }
}

/// Test configuration: test environment, in-memory stores, private upload dir
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.environment = Environment::Test;
    config.database.url = "memory".to_string();
    config.server.host = "127.0.0.1".to_string();
    config.uploads.directory = std::env::temp_dir().join(format!(
        "upload_gate_test_{}",
        Uuid::new_v4().simple()
    ));
    config
}

/// Test configuration with CSRF verification enforced
pub fn test_config_with_csrf() -> AppConfig {
    let mut config = test_config();
    config.environment = Environment::Development;
    config.csrf.enabled = true;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_creation() {
        let app = TestApp::new().await;
        assert!(!app.state.config.csrf_active());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = TestApp::new().await;
        let response = app.get("/health").await;
        response.assert_ok();
        let json: serde_json::Value = response.json();
        assert_eq!(json["status"], "healthy");
    }
}
