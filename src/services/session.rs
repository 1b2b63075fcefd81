//! Session authenticator
//!
//! Resolves the signed session cookie into a server-side [`Session`] and,
//! when the session is bound to a user, the current [`Identity`].
//!
//! The cookie carries `token.signature`, where the signature is the hex
//! HMAC-SHA256 of the token under the session secret. The store is keyed by
//! the SHA-256 of the token, so a leaked session table cannot be replayed.

use std::{sync::Arc, time::Duration};

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{bounded_lookup, bounded_write, CredentialStore, SessionStore, StoreResult};
use crate::models::{FlashMessage, Identity, Session, SessionExpiry};
use crate::utils::tokens::{generate_token, hmac_hex, hmac_verify, sha256_hex};

/// Cookie and lifetime settings for sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub secret: String,
    pub cookie_name: String,
    pub max_age_secs: u64,
    pub expiry: SessionExpiry,
    pub secure: bool,
    pub store_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            secret: config.session.secret.clone(),
            cookie_name: config.session.cookie_name.clone(),
            max_age_secs: config.session.max_age_secs,
            expiry: config.session.expiry,
            secure: config.secure_cookies(),
            store_timeout: config.store.timeout(),
        }
    }
}

/// A session found for the current request
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    /// Raw token from the cookie, needed to re-issue it
    pub token: String,
    pub session: Session,
    pub identity: Option<Arc<Identity>>,
    /// The sliding window moved and the cookie should be re-issued
    pub refreshed: bool,
}

impl ResolvedSession {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

#[derive(Clone)]
pub struct SessionAuthenticator {
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    settings: Arc<SessionSettings>,
}

impl SessionAuthenticator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions,
            credentials,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Resolve the session cookie carried by `headers`.
    ///
    /// Every failure mode (no cookie, bad signature, unknown or expired
    /// record, store trouble) yields `None`. A record bound to a user that no
    /// longer exists loses that binding and is returned as anonymous.
    pub async fn resolve(&self, headers: &HeaderMap) -> Option<ResolvedSession> {
        let raw = read_cookie(headers, &self.settings.cookie_name)?;
        let token = self.unsign(&raw)?;
        let token_hash = sha256_hex(&token);

        let mut session = bounded_lookup(
            self.settings.store_timeout,
            "session",
            self.sessions.load(&token_hash),
        )
        .await?;

        let now = Utc::now();
        if session.is_expired_at(now) {
            debug!("Session expired");
            if let Err(e) = self.write("session_delete", self.sessions.delete(&token_hash)).await {
                warn!(error = %e, "Failed to delete expired session");
            }
            return None;
        }

        let mut dirty = false;
        let identity = match session.user_id {
            Some(user_id) => {
                match tokio::time::timeout(
                    self.settings.store_timeout,
                    self.credentials.find_user_by_id(user_id),
                )
                .await
                {
                    Ok(Ok(Some(identity))) => Some(Arc::new(identity)),
                    Ok(Ok(None)) => {
                        info!(user_id = %user_id, "Session bound to a deleted user, dropping binding");
                        session.user_id = None;
                        dirty = true;
                        None
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Identity lookup failed, treating session as anonymous");
                        None
                    }
                    Err(_) => {
                        warn!("Identity lookup timed out, treating session as anonymous");
                        None
                    }
                }
            }
            None => None,
        };

        let refreshed = self.settings.expiry == SessionExpiry::Sliding;
        if refreshed {
            session.expires_at = now + self.max_age();
            dirty = true;
        }

        if dirty {
            // Best-effort; the request proceeds with the in-memory view
            match self.write("session_refresh", self.sessions.update(&session)).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Session destroyed while resolving, treating request as anonymous");
                    return None;
                }
                Err(e) => warn!(error = %e, "Failed to persist session refresh"),
            }
        }

        Some(ResolvedSession {
            token,
            session,
            identity,
            refreshed,
        })
    }

    /// Create and persist a new session
    pub async fn start(
        &self,
        user_id: Option<Uuid>,
        flash: Vec<FlashMessage>,
    ) -> StoreResult<ResolvedSession> {
        let token = generate_token();
        let now = Utc::now();
        let session = Session {
            token_hash: sha256_hex(&token),
            user_id,
            csrf_secret: generate_token(),
            flash,
            created_at: now,
            expires_at: now + self.max_age(),
        };
        self.write("session_insert", self.sessions.insert(&session)).await?;
        debug!(authenticated = user_id.is_some(), "Session started");

        Ok(ResolvedSession {
            token,
            session,
            identity: None,
            refreshed: false,
        })
    }

    /// Replace `previous` with a fresh session bound to `identity`.
    ///
    /// The old record is destroyed so its token and CSRF secret die with it;
    /// pending flash messages move over.
    pub async fn regenerate(
        &self,
        previous: Option<&ResolvedSession>,
        identity: Arc<Identity>,
    ) -> StoreResult<ResolvedSession> {
        let flash = match previous {
            Some(old) => {
                self.destroy(&old.session).await?;
                old.session.flash.clone()
            }
            None => Vec::new(),
        };

        let mut fresh = self.start(Some(identity.id), flash).await?;
        fresh.identity = Some(identity);
        Ok(fresh)
    }

    pub async fn destroy(&self, session: &Session) -> StoreResult<()> {
        self.write("session_delete", self.sessions.delete(&session.token_hash))
            .await
    }

    /// Queue flash messages on an existing session.
    ///
    /// A session destroyed in the meantime stays destroyed and the messages
    /// are dropped.
    pub async fn push_flash(
        &self,
        session: &mut Session,
        messages: Vec<FlashMessage>,
    ) -> StoreResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        session.flash.extend(messages);
        if !self.write("session_flash", self.sessions.update(session)).await? {
            debug!("Session gone, dropping flash messages");
        }
        Ok(())
    }

    /// Drain the queued flash messages
    pub async fn take_flash(&self, session: &mut Session) -> StoreResult<Vec<FlashMessage>> {
        if session.flash.is_empty() {
            return Ok(Vec::new());
        }
        let messages = std::mem::take(&mut session.flash);
        if !self.write("session_flash", self.sessions.update(session)).await? {
            return Ok(Vec::new());
        }
        Ok(messages)
    }

    pub async fn purge_expired(&self) -> StoreResult<u64> {
        self.sessions.purge_expired(Utc::now()).await
    }

    async fn write<T>(
        &self,
        what: &'static str,
        op: impl std::future::Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        bounded_write(self.settings.store_timeout, what, op).await
    }

    /// Cookie value for `token`: `token.signature`
    pub fn sign(&self, token: &str) -> String {
        format!(
            "{}.{}",
            token,
            hmac_hex(self.settings.secret.as_bytes(), token.as_bytes())
        )
    }

    /// Check the signature of a cookie value and return the bare token
    pub fn unsign(&self, value: &str) -> Option<String> {
        let (token, signature) = value.rsplit_once('.')?;
        if token.is_empty() {
            return None;
        }
        hmac_verify(self.settings.secret.as_bytes(), token.as_bytes(), signature)
            .then(|| token.to_string())
    }

    /// Build the `Set-Cookie` value carrying `token`
    pub fn cookie(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.settings.cookie_name,
            self.sign(token),
            self.settings.max_age_secs
        );
        if self.settings.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// Build a `Set-Cookie` value that removes the session cookie
    pub fn clear_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.settings.cookie_name
        );
        if self.settings.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    fn max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settings.max_age_secs as i64)
    }
}

/// Find a cookie by name in the `Cookie` headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
}

/// Spawn a background task that periodically deletes expired sessions
pub fn spawn_session_purge(sessions: SessionAuthenticator, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match sessions.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged expired sessions"),
                Err(e) => warn!(error = %e, "Session purge failed"),
            }
        }
    });
}
