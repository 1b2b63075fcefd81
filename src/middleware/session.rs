//! Session resolution middleware
//!
//! Resolves the session cookie once per request and stores the result as a
//! [`RequestAuth`] extension. Everything downstream (CSRF, guards, handlers)
//! reads the identity from there.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::SET_COOKIE, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::models::Identity;
use crate::services::ResolvedSession;
use crate::utils::AppError;
use crate::AppState;

/// Authentication state of the current request
#[derive(Debug, Clone, Default)]
pub struct RequestAuth {
    pub session: Option<ResolvedSession>,
}

impl RequestAuth {
    pub fn is_authenticated(&self) -> bool {
        self.current_identity().is_some()
    }

    pub fn current_identity(&self) -> Option<&Arc<Identity>> {
        self.session.as_ref().and_then(|s| s.identity.as_ref())
    }

    pub fn csrf_secret(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session.csrf_secret.as_str())
    }
}

/// Session middleware
///
/// Never rejects: an absent or unusable cookie just means anonymous.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolved = state.auth.sessions.resolve(request.headers()).await;
    let reissue = resolved
        .as_ref()
        .filter(|r| r.refreshed)
        .map(|r| r.token.clone());

    request.extensions_mut().insert(RequestAuth { session: resolved });
    let mut response = next.run(request).await;

    // Sliding sessions carry the new Max-Age back, unless the handler
    // already replaced or cleared the cookie
    if let Some(token) = reissue {
        let sessions = &state.auth.sessions;
        if !sets_cookie(response.headers(), &sessions.settings().cookie_name) {
            match sessions.cookie(&token) {
                Ok(cookie) => {
                    response.headers_mut().append(SET_COOKIE, cookie);
                }
                Err(e) => warn!(error = %e, "Failed to build session cookie"),
            }
        }
    }

    response
}

fn sets_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            v.split_once('=')
                .is_some_and(|(cookie_name, _)| cookie_name == name)
        })
}

impl<S> FromRequestParts<S> for RequestAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<RequestAuth>().cloned().unwrap_or_default())
    }
}

/// Extractor for the logged-in user
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Arc<Identity>);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestAuth>()
            .and_then(|auth| auth.current_identity().cloned())
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthenticated("You need to be logged in to do that!".into()))
    }
}
