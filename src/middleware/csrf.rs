//! CSRF verification middleware
//!
//! Every state-mutating request must echo the CSRF secret of its session.
//! Paths listed in `csrf.exempt_paths` (the multipart upload endpoints) are
//! skipped, and the whole check is off in the test environment.
//!
//! A body the form capture layer could not read is reported here, after the
//! token check, so a forged request always sees the CSRF rejection first.

use axum::{
    extract::{Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::form::{is_safe_method, FormFields, FormRejection};
use super::session::RequestAuth;
use crate::utils::tokens::secrets_match;
use crate::utils::{AppError, AppResult};
use crate::AppState;

/// Headers checked for a token, in order
pub const CSRF_HEADER_NAMES: [&str; 3] = ["x-csrf-token", "x-xsrf-token", "csrf-token"];

/// Query and form field carrying the token
pub const CSRF_FORM_FIELD: &str = "_csrf";

/// Find the token a request presents
pub fn presented_token(
    headers: &HeaderMap,
    query: Option<&str>,
    form: Option<&FormFields>,
) -> Option<String> {
    CSRF_HEADER_NAMES
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(str::to_string)
        .or_else(|| {
            query.and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(key, _)| key == CSRF_FORM_FIELD)
                    .map(|(_, value)| value.into_owned())
            })
        })
        .or_else(|| form.and_then(|f| f.get(CSRF_FORM_FIELD)).map(str::to_string))
        .filter(|token| !token.is_empty())
}

fn is_exempt(state: &AppState, parts: &Parts) -> bool {
    !state.config.csrf_active()
        || is_safe_method(&parts.method)
        || state
            .config
            .csrf
            .exempt_paths
            .iter()
            .any(|p| p == parts.uri.path())
}

/// CSRF middleware
pub async fn csrf_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    let (parts, body) = request.into_parts();
    if !is_exempt(&state, &parts) {
        verify(&state, &parts)?;
    }

    if let Some(rejection) = parts.extensions.get::<FormRejection>() {
        return Err(rejection.clone().into());
    }
    Ok(next.run(Request::from_parts(parts, body)).await)
}

fn verify(state: &AppState, parts: &Parts) -> AppResult<()> {
    let expected = parts
        .extensions
        .get::<RequestAuth>()
        .and_then(|auth| auth.csrf_secret());
    let presented = presented_token(
        &parts.headers,
        parts.uri.query(),
        parts.extensions.get::<FormFields>(),
    );

    let valid = match (expected, presented.as_deref()) {
        (Some(expected), Some(presented)) => {
            secrets_match(state.config.session.secret.as_bytes(), expected, presented)
        }
        _ => false,
    };

    if !valid {
        warn!(
            method = %parts.method,
            path = %parts.uri.path(),
            has_session = expected.is_some(),
            has_token = presented.is_some(),
            "CSRF verification failed"
        );
        return Err(AppError::InvalidCsrfToken);
    }

    debug!(path = %parts.uri.path(), "CSRF token accepted");
    Ok(())
}
