//! Access guard chain
//!
//! A route group declares an ordered [`GuardChain`]. Each guard inspects the
//! request's resolved identity (and, for some guards, submitted fields or
//! path parameters) and returns a [`Decision`]. The first denial wins and
//! the handler never runs.
//!
//! Guards do not touch the session. A denial carries its flash messages as
//! values, and the dispatcher persists them before rendering the redirect.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{rejection::RawPathParamsRejection, RawPathParams, Request, State},
    http::{
        header::{LOCATION, SET_COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, warn};

use super::form::FormFields;
use super::session::RequestAuth;
use crate::models::FlashMessage;
use crate::services::AuthContext;
use crate::utils::wants_json;
use crate::AppState;

/// Why a guard refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    AlreadyAuthenticated,
    Forbidden,
    NotActivated,
    InvalidResetToken,
    StoreUnavailable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "unauthenticated",
            DenyReason::AlreadyAuthenticated => "already_authenticated",
            DenyReason::Forbidden => "forbidden",
            DenyReason::NotActivated => "not_activated",
            DenyReason::InvalidResetToken => "invalid_reset_token",
            DenyReason::StoreUnavailable => "store_unavailable",
        }
    }

    /// Status used when the client wants JSON instead of a redirect
    pub fn status(&self) -> StatusCode {
        match self {
            DenyReason::Unauthenticated => StatusCode::UNAUTHORIZED,
            DenyReason::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::FORBIDDEN,
        }
    }
}

/// Where a denied request goes and what it is told
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub redirect: String,
    pub messages: Vec<FlashMessage>,
}

impl GuardOutcome {
    pub fn redirect(location: &str) -> Self {
        Self {
            redirect: location.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: FlashMessage) -> Self {
        self.messages.push(message);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        reason: DenyReason,
        outcome: GuardOutcome,
    },
}

impl Decision {
    pub fn deny(reason: DenyReason, outcome: GuardOutcome) -> Self {
        Decision::Deny { reason, outcome }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// What a guard gets to look at
pub struct GuardRequest<'a> {
    pub auth: &'a RequestAuth,
    pub form: Option<&'a FormFields>,
    /// The `{token}` path parameter, when the route has one
    pub token: Option<&'a str>,
}

#[async_trait]
pub trait Guard: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, request: &GuardRequest<'_>, auth: &AuthContext) -> Decision;
}

/// Ordered guards for one route group
#[derive(Clone, Default)]
pub struct GuardChain {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    /// Run the guards in order, stopping at the first denial
    pub async fn evaluate(&self, request: &GuardRequest<'_>, auth: &AuthContext) -> Decision {
        for guard in &self.guards {
            let decision = guard.check(request, auth).await;
            if let Decision::Deny { reason, .. } = &decision {
                debug!(guard = guard.name(), reason = reason.as_str(), "Guard denied request");
                return decision;
            }
        }
        Decision::Allow
    }
}

/// Deny when a user is logged in
pub struct RequireAnonymous;

#[async_trait]
impl Guard for RequireAnonymous {
    fn name(&self) -> &'static str {
        "require_anonymous"
    }

    async fn check(&self, request: &GuardRequest<'_>, _auth: &AuthContext) -> Decision {
        if request.auth.is_authenticated() {
            Decision::deny(DenyReason::AlreadyAuthenticated, GuardOutcome::redirect("/me"))
        } else {
            Decision::Allow
        }
    }
}

/// Deny when nobody is logged in
pub struct RequireAuthenticated;

#[async_trait]
impl Guard for RequireAuthenticated {
    fn name(&self) -> &'static str {
        "require_authenticated"
    }

    async fn check(&self, request: &GuardRequest<'_>, _auth: &AuthContext) -> Decision {
        if request.auth.is_authenticated() {
            Decision::Allow
        } else {
            Decision::deny(
                DenyReason::Unauthenticated,
                GuardOutcome::redirect("/login")
                    .with_message(FlashMessage::error("You need to be logged in to do that!")),
            )
        }
    }
}

/// Deny unless the logged-in user is an admin. Anonymous requests are denied too.
pub struct RequireAdmin;

#[async_trait]
impl Guard for RequireAdmin {
    fn name(&self) -> &'static str {
        "require_admin"
    }

    async fn check(&self, request: &GuardRequest<'_>, _auth: &AuthContext) -> Decision {
        match request.auth.current_identity() {
            Some(identity) if identity.is_admin => Decision::Allow,
            _ => Decision::deny(
                DenyReason::Forbidden,
                GuardOutcome::redirect("/").with_message(FlashMessage::error("You must be admin.")),
            ),
        }
    }
}

/// Deny a login attempt for an account that has not been activated yet
pub struct RequireActivated;

pub const NOT_ACTIVATED_MESSAGE: &str = "You MUST verify your email before you can login. \
     If you need to resend the verify email, go to /user/activate/resend";

#[async_trait]
impl Guard for RequireActivated {
    fn name(&self) -> &'static str {
        "require_activated"
    }

    async fn check(&self, request: &GuardRequest<'_>, auth: &AuthContext) -> Decision {
        let Some(email) = request
            .form
            .and_then(|f| f.get("email"))
            .filter(|e| !e.trim().is_empty())
        else {
            // Nothing to look up; the credential check rejects it
            return Decision::Allow;
        };

        match tokio::time::timeout(auth.store_timeout, auth.credentials.find_user_by_email(email))
            .await
        {
            Ok(Ok(Some(identity))) if !identity.is_activated => Decision::deny(
                DenyReason::NotActivated,
                GuardOutcome::redirect("/login")
                    .with_message(FlashMessage::error(NOT_ACTIVATED_MESSAGE)),
            ),
            Ok(Ok(_)) => Decision::Allow,
            Ok(Err(e)) => {
                warn!(error = %e, "Activation lookup failed");
                store_unavailable()
            }
            Err(_) => {
                warn!("Activation lookup timed out");
                store_unavailable()
            }
        }
    }
}

fn store_unavailable() -> Decision {
    Decision::deny(
        DenyReason::StoreUnavailable,
        GuardOutcome::redirect("/login")
            .with_message(FlashMessage::error("Something went wrong, please try again.")),
    )
}

/// Deny unless the `{token}` path parameter is a live password reset token
pub struct RequireValidResetToken;

#[async_trait]
impl Guard for RequireValidResetToken {
    fn name(&self) -> &'static str {
        "require_valid_reset_token"
    }

    async fn check(&self, request: &GuardRequest<'_>, auth: &AuthContext) -> Decision {
        let valid = match request.token {
            Some(token) => auth.accounts.reset_token_owner(token).await.is_some(),
            None => false,
        };

        if valid {
            Decision::Allow
        } else {
            Decision::deny(
                DenyReason::InvalidResetToken,
                GuardOutcome::redirect("/user/forgot").with_message(FlashMessage::error(
                    "Password reset token is invalid or has expired.",
                )),
            )
        }
    }
}

/// State for [`guard_middleware`]: the app plus the chain of one route group
#[derive(Clone)]
pub struct GuardState {
    pub app: AppState,
    pub chain: GuardChain,
}

impl GuardState {
    pub fn new(app: &AppState, chain: GuardChain) -> Self {
        Self {
            app: app.clone(),
            chain,
        }
    }
}

/// Guard middleware, installed per route group with `route_layer`
pub async fn guard_middleware(
    State(state): State<GuardState>,
    params: Result<RawPathParams, RawPathParamsRejection>,
    request: Request,
    next: Next,
) -> Response {
    let token = params.ok().and_then(|params| {
        params
            .iter()
            .find(|(key, _)| *key == "token")
            .map(|(_, value)| value.to_string())
    });

    let auth = request
        .extensions()
        .get::<RequestAuth>()
        .cloned()
        .unwrap_or_default();

    let decision = {
        let guard_request = GuardRequest {
            auth: &auth,
            form: request.extensions().get::<FormFields>(),
            token: token.as_deref(),
        };
        state.chain.evaluate(&guard_request, &state.app.auth).await
    };

    match decision {
        Decision::Allow => next.run(request).await,
        Decision::Deny { reason, outcome } => {
            if wants_json(request.headers()) {
                deny_json(reason, outcome)
            } else {
                redirect_with_flash(&state.app.auth, &auth, &outcome.redirect, outcome.messages)
                    .await
            }
        }
    }
}

fn deny_json(reason: DenyReason, outcome: GuardOutcome) -> Response {
    (
        reason.status(),
        Json(json!({
            "error": reason.as_str(),
            "messages": outcome.messages,
            "redirect": outcome.redirect,
        })),
    )
        .into_response()
}

/// `303 See Other` to `location`, queueing `messages` on the session.
///
/// A request without a session gets a fresh anonymous one so the messages
/// survive the redirect.
pub async fn redirect_with_flash(
    auth: &AuthContext,
    request_auth: &RequestAuth,
    location: &str,
    messages: Vec<FlashMessage>,
) -> Response {
    let mut response = (StatusCode::SEE_OTHER, [(LOCATION, location.to_string())]).into_response();
    if messages.is_empty() {
        return response;
    }

    match &request_auth.session {
        Some(resolved) => {
            let mut session = resolved.session.clone();
            if let Err(e) = auth.sessions.push_flash(&mut session, messages).await {
                warn!(error = %e, "Failed to store flash messages");
            }
        }
        None => match auth.sessions.start(None, messages).await {
            Ok(started) => match auth.sessions.cookie(&started.token) {
                Ok(cookie) => {
                    response.headers_mut().append(SET_COOKIE, cookie);
                }
                Err(e) => warn!(error = %e, "Failed to build session cookie"),
            },
            Err(e) => warn!(error = %e, "Failed to start session for flash messages"),
        },
    }

    response
}
