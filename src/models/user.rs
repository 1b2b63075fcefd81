//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Principal owned by the credential store.
///
/// Request handling only ever holds it behind an `Arc`; it is never
/// written back from the request path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_activated: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Create a new, not yet activated, non-admin identity
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email: normalize_email(&email),
            password_hash,
            is_activated: false,
            is_admin: false,
            created_at: Utc::now(),
        }
    }

    pub fn activated(mut self) -> Self {
        self.is_activated = true;
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// Identity without password hash for safe serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityPublic {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_activated: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Identity> for IdentityPublic {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            is_activated: identity.is_activated,
            is_admin: identity.is_admin,
            created_at: identity.created_at,
        }
    }
}

/// Normalize an email for lookup and uniqueness checks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Login form
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Signup form
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 3, max = 64))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
}

/// Form carrying only an email (resend activation, forgot password)
#[derive(Debug, Clone, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

/// Password reset submission
#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}
