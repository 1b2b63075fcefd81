//! Account lifecycle: signup, activation, password reset
//!
//! Mail delivery is not part of this service. Where a message would be
//! mailed, the link it would carry is written to the log instead.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::AccountsConfig;
use crate::db::{bounded_lookup, bounded_write, CredentialStore, StoreError, StoreResult};
use crate::models::{AccountToken, Identity, SignupRequest, TokenKind};
use crate::services::password::{hash_password, verify_password};
use crate::utils::tokens::{generate_token, sha256_hex};
use crate::utils::{AppError, AppResult};

#[derive(Clone)]
pub struct AccountService {
    credentials: Arc<dyn CredentialStore>,
    settings: Arc<AccountsConfig>,
    store_timeout: Duration,
}

impl AccountService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        settings: AccountsConfig,
        store_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            settings: Arc::new(settings),
            store_timeout,
        }
    }

    /// Register a new, not yet activated account and send its activation link
    pub async fn signup(&self, request: SignupRequest) -> AppResult<Identity> {
        if !self.settings.signups_enabled {
            return Err(AppError::Forbidden("Signups are disabled.".to_string()));
        }

        request.validate()?;
        self.check_password(&request.password)?;

        let identity = Identity::new(
            request.username.trim().to_string(),
            request.email,
            hash_password(&request.password)?,
        );

        bounded_write(self.store_timeout, "user_insert", self.credentials.insert_user(&identity))
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(_) => AppError::Conflict(
                    "A user with that email or username already exists.".to_string(),
                ),
                other => other.into(),
            })?;

        info!(user_id = %identity.id, username = %identity.username, "User signed up");
        self.send_link(&identity, TokenKind::Activation).await?;

        Ok(identity)
    }

    /// Check an email/password pair.
    ///
    /// Unknown emails, wrong passwords and store failures all come back as
    /// `None`.
    pub async fn authenticate(&self, email: &str, password: &str) -> Option<Identity> {
        let identity = bounded_lookup(
            self.store_timeout,
            "user_by_email",
            self.credentials.find_user_by_email(email),
        )
        .await?;

        if verify_password(password, &identity.password_hash) {
            Some(identity)
        } else {
            info!(user_id = %identity.id, "Password mismatch");
            None
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Option<Identity> {
        bounded_lookup(
            self.store_timeout,
            "user_by_email",
            self.credentials.find_user_by_email(email),
        )
        .await
    }

    /// Consume an activation token and mark its account activated
    pub async fn activate(&self, raw_token: &str) -> AppResult<Uuid> {
        let token = self
            .live_token(TokenKind::Activation, raw_token)
            .await
            .ok_or_else(|| {
                AppError::BadRequest("Activation token is invalid or has expired.".to_string())
            })?;

        let activated = self.credentials.set_activated(token.user_id, true);
        if !bounded_write(self.store_timeout, "user_activate", activated).await? {
            return Err(AppError::NotFound("User no longer exists".to_string()));
        }
        self.consume(&token).await?;

        info!(user_id = %token.user_id, "Account activated");
        Ok(token.user_id)
    }

    /// Send a new activation link if `email` belongs to a pending account.
    ///
    /// Succeeds silently otherwise so the endpoint does not reveal which
    /// addresses are registered.
    pub async fn resend_activation(&self, email: &str) -> AppResult<()> {
        match self.find_by_email(email).await {
            Some(identity) if !identity.is_activated => {
                self.send_link(&identity, TokenKind::Activation).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Send a password reset link if `email` is registered
    pub async fn forgot_password(&self, email: &str) -> AppResult<()> {
        if let Some(identity) = self.find_by_email(email).await {
            self.send_link(&identity, TokenKind::PasswordReset).await?;
        }
        Ok(())
    }

    /// Owner of a live password reset token
    pub async fn reset_token_owner(&self, raw_token: &str) -> Option<Uuid> {
        self.live_token(TokenKind::PasswordReset, raw_token)
            .await
            .map(|t| t.user_id)
    }

    /// Set a new password through a reset token, consuming the token
    pub async fn reset_password(&self, raw_token: &str, password: &str) -> AppResult<()> {
        self.check_password(password)?;

        let token = self
            .live_token(TokenKind::PasswordReset, raw_token)
            .await
            .ok_or_else(|| {
                AppError::BadRequest("Password reset token is invalid or has expired.".to_string())
            })?;

        let hash = hash_password(password)?;
        let updated = self.credentials.update_password(token.user_id, &hash);
        if !bounded_write(self.store_timeout, "user_password", updated).await? {
            return Err(AppError::NotFound("User no longer exists".to_string()));
        }
        self.consume(&token).await?;

        info!(user_id = %token.user_id, "Password reset");
        Ok(())
    }

    /// Store a fresh token of `kind` for `user_id` and return the raw value
    pub async fn issue_token(&self, user_id: Uuid, kind: TokenKind) -> StoreResult<String> {
        let ttl = match kind {
            TokenKind::Activation => self.settings.activation_ttl_secs,
            TokenKind::PasswordReset => self.settings.reset_ttl_secs,
        };

        let raw = generate_token();
        let token = AccountToken {
            token_hash: sha256_hex(&raw),
            user_id,
            kind,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl as i64),
        };
        bounded_write(
            self.store_timeout,
            "account_token_insert",
            self.credentials.insert_account_token(&token),
        )
        .await?;
        Ok(raw)
    }

    async fn consume(&self, token: &AccountToken) -> StoreResult<()> {
        bounded_write(
            self.store_timeout,
            "account_token_delete",
            self.credentials.delete_account_token(&token.token_hash),
        )
        .await
    }

    async fn send_link(&self, identity: &Identity, kind: TokenKind) -> StoreResult<()> {
        let raw = self.issue_token(identity.id, kind).await?;
        let path = match kind {
            TokenKind::Activation => "activate",
            TokenKind::PasswordReset => "reset",
        };
        let link = format!(
            "{}/user/{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            path,
            raw
        );
        info!(
            to = %identity.email,
            kind = kind.as_str(),
            link = %link,
            "Account email"
        );
        Ok(())
    }

    async fn live_token(&self, kind: TokenKind, raw_token: &str) -> Option<AccountToken> {
        if raw_token.is_empty() {
            return None;
        }
        let token = bounded_lookup(
            self.store_timeout,
            "account_token",
            self.credentials.find_account_token(kind, &sha256_hex(raw_token)),
        )
        .await?;

        if token.is_live_at(Utc::now()) {
            Some(token)
        } else {
            warn!(kind = kind.as_str(), user_id = %token.user_id, "Expired account token presented");
            None
        }
    }

    fn check_password(&self, password: &str) -> AppResult<()> {
        if password.chars().count() < self.settings.password_min_length {
            return Err(AppError::ValidationError(format!(
                "Password must be at least {} characters long",
                self.settings.password_min_length
            )));
        }
        Ok(())
    }
}
