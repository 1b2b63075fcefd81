//! Login, logout and CSRF token endpoints

use axum::{
    extract::State,
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::finish;
use crate::middleware::{FormFields, RequestAuth};
use crate::models::{FlashMessage, IdentityPublic, LoginRequest};
use crate::utils::{wants_json, AppError, AppResult};
use crate::AppState;

/// View model for page-style routes
#[derive(Debug, Serialize)]
pub struct PageView {
    pub page: &'static str,
    pub user: Option<IdentityPublic>,
    pub messages: Vec<FlashMessage>,
    pub signups_enabled: bool,
}

/// Build a page view, draining the session's flash messages
pub(crate) async fn page_view(state: &AppState, auth: &RequestAuth, page: &'static str) -> PageView {
    let messages = match &auth.session {
        Some(resolved) => {
            let mut session = resolved.session.clone();
            state
                .auth
                .sessions
                .take_flash(&mut session)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to drain flash messages");
                    Vec::new()
                })
        }
        None => Vec::new(),
    };

    PageView {
        page,
        user: auth.current_identity().map(|i| IdentityPublic::from(i.as_ref())),
        messages,
        signups_enabled: state.config.accounts.signups_enabled,
    }
}

/// GET /
pub async fn index(State(state): State<AppState>, auth: RequestAuth) -> Json<PageView> {
    Json(page_view(&state, &auth, "index").await)
}

/// GET /login
pub async fn login_page(State(state): State<AppState>, auth: RequestAuth) -> Json<PageView> {
    Json(page_view(&state, &auth, "login").await)
}

#[derive(Serialize)]
pub struct CsrfTokenResponse {
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

/// GET /csrf-token
///
/// Returns the CSRF token of the current session, starting an anonymous
/// session when the request has none.
pub async fn csrf_token(State(state): State<AppState>, auth: RequestAuth) -> AppResult<Response> {
    if let Some(secret) = auth.csrf_secret() {
        return Ok(Json(CsrfTokenResponse {
            csrf_token: secret.to_string(),
        })
        .into_response());
    }

    let sessions = &state.auth.sessions;
    let started = sessions.start(None, Vec::new()).await?;
    let cookie = sessions
        .cookie(&started.token)
        .map_err(|e| AppError::Internal(format!("Failed to build session cookie: {}", e)))?;

    Ok((
        [(SET_COOKIE, cookie)],
        Json(CsrfTokenResponse {
            csrf_token: started.session.csrf_secret,
        }),
    )
        .into_response())
}

#[derive(Serialize)]
struct LoginResponse {
    success: bool,
    user: IdentityPublic,
    #[serde(rename = "csrfToken")]
    csrf_token: String,
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    auth: RequestAuth,
    form: FormFields,
    headers: HeaderMap,
) -> AppResult<Response> {
    let credentials: LoginRequest = form.parse()?;

    let Some(identity) = state
        .auth
        .accounts
        .authenticate(&credentials.email, &credentials.password)
        .await
    else {
        return Ok(finish(
            &state,
            &auth,
            &headers,
            StatusCode::UNAUTHORIZED,
            "/login",
            FlashMessage::error("Invalid email or password."),
        )
        .await);
    };

    let identity = Arc::new(identity);
    let sessions = &state.auth.sessions;
    let fresh = sessions
        .regenerate(auth.session.as_ref(), identity.clone())
        .await?;
    let cookie = sessions
        .cookie(&fresh.token)
        .map_err(|e| AppError::Internal(format!("Failed to build session cookie: {}", e)))?;

    info!(user_id = %identity.id, "User logged in");

    if wants_json(&headers) {
        Ok((
            [(SET_COOKIE, cookie)],
            Json(LoginResponse {
                success: true,
                user: IdentityPublic::from(identity.as_ref()),
                csrf_token: fresh.session.csrf_secret,
            }),
        )
            .into_response())
    } else {
        Ok((
            StatusCode::SEE_OTHER,
            [(SET_COOKIE, cookie), (LOCATION, HeaderValue::from_static("/me"))],
        )
            .into_response())
    }
}

/// POST /logout
pub async fn logout(State(state): State<AppState>, auth: RequestAuth) -> AppResult<Response> {
    let sessions = &state.auth.sessions;
    if let Some(resolved) = &auth.session {
        if let Err(e) = sessions.destroy(&resolved.session).await {
            warn!(error = %e, "Failed to delete session");
        }
        if let Some(identity) = &resolved.identity {
            info!(user_id = %identity.id, "User logged out");
        }
    }

    // Always clear the cookie, even if the session record was missing
    let mut response = (StatusCode::SEE_OTHER, [(LOCATION, "/")]).into_response();
    match sessions.clear_cookie() {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        Err(e) => warn!(error = %e, "Failed to build cookie"),
    }
    Ok(response)
}
