//! Middleware components
//!
//! This module contains the request authentication chain, in the order it
//! runs:
//! - Rate limiting (per route group and client IP)
//! - Session resolution
//! - Form capture
//! - CSRF verification
//! - Access guards (per route group)
//! - API key verification (upload API only)

pub mod api_key;
pub mod csrf;
pub mod form;
pub mod guard;
pub mod rate_limit;
pub mod session;

pub use api_key::{api_key_middleware, ApiPrincipal};
pub use csrf::csrf_middleware;
pub use form::{form_fields_middleware, FormFields, FormRejection};
pub use guard::{
    guard_middleware, Decision, DenyReason, Guard, GuardChain, GuardOutcome, GuardState,
    RequireActivated, RequireAdmin, RequireAnonymous, RequireAuthenticated,
    RequireValidResetToken,
};
pub use rate_limit::{
    rate_limit_middleware, spawn_rate_limit_cleanup, Clock, ManualClock, RateLimitState,
};
pub use session::{session_middleware, CurrentUser, RequestAuth};
