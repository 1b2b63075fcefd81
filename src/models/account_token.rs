//! Single-use account tokens (activation and password reset)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Activation,
    PasswordReset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Activation => "activation",
            TokenKind::PasswordReset => "password_reset",
        }
    }
}

impl std::str::FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activation" => Ok(TokenKind::Activation),
            "password_reset" => Ok(TokenKind::PasswordReset),
            _ => Err(format!("Invalid token kind: {}", s)),
        }
    }
}

/// Stored account token. Only the SHA-256 of the raw token is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
}

impl AccountToken {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
