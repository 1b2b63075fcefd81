//! Credential and session stores
//!
//! The access-control layer only talks to storage through the two traits in
//! this module. Two implementations exist:
//! - `SqliteStore`: sqlx-backed, used in production
//! - `MemoryStore`: in-process maps, used by tests and `database.url = "memory"`
//!
//! Every lookup made on the request path goes through [`bounded_lookup`],
//! which turns store errors and timeouts into "not found". Writes on the
//! request path go through [`bounded_write`].

pub mod memory;
pub mod sqlite;

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{AccountToken, ApiKeyRecord, Identity, Session, TokenKind};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Database connection pool type
pub type DbPool = sqlx::SqlitePool;

/// Store failure. The request path never surfaces the detail to callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint failed") => {
                StoreError::Duplicate(db_err.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Query surface of the credential store
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Identity>>;

    async fn find_api_key_by_hash(&self, hash: &str) -> StoreResult<Option<ApiKeyRecord>>;

    async fn list_users(&self) -> StoreResult<Vec<Identity>>;

    async fn insert_user(&self, identity: &Identity) -> StoreResult<()>;

    async fn set_activated(&self, id: Uuid, activated: bool) -> StoreResult<bool>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool>;

    /// Delete a user together with its keys, tokens and sessions' identity binding
    async fn delete_user(&self, id: Uuid) -> StoreResult<bool>;

    async fn insert_api_key(&self, key: &ApiKeyRecord) -> StoreResult<()>;

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn list_api_keys(&self, owner_id: Uuid) -> StoreResult<Vec<ApiKeyRecord>>;

    async fn insert_account_token(&self, token: &AccountToken) -> StoreResult<()>;

    async fn find_account_token(
        &self,
        kind: TokenKind,
        token_hash: &str,
    ) -> StoreResult<Option<AccountToken>>;

    async fn delete_account_token(&self, token_hash: &str) -> StoreResult<()>;
}

/// Server-side session storage
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, token_hash: &str) -> StoreResult<Option<Session>>;

    /// Persist a newly created session
    async fn insert(&self, session: &Session) -> StoreResult<()>;

    /// Overwrite an existing session. Returns `false`, writing nothing, when
    /// the record is gone, so a destroyed session is never brought back.
    async fn update(&self, session: &Session) -> StoreResult<bool>;

    async fn delete(&self, token_hash: &str) -> StoreResult<()>;

    /// Remove every session that expired before `now`; returns how many went
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Run a point query under `timeout`, failing closed.
///
/// Errors and timeouts are logged and reported as `None`, which every
/// caller treats the same way as a record that does not exist.
pub async fn bounded_lookup<T, F>(timeout: Duration, what: &'static str, query: F) -> Option<T>
where
    F: Future<Output = StoreResult<Option<T>>>,
{
    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            warn!(lookup = what, error = %e, "Store lookup failed, treating as not found");
            None
        }
        Err(_) => {
            warn!(lookup = what, timeout_ms = timeout.as_millis() as u64, "Store lookup timed out, treating as not found");
            None
        }
    }
}

/// Run a store write under `timeout`; a timeout becomes `StoreError::Unavailable`
pub async fn bounded_write<T, F>(timeout: Duration, what: &'static str, write: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, write).await {
        Ok(result) => result,
        Err(_) => {
            warn!(write = what, timeout_ms = timeout.as_millis() as u64, "Store write timed out");
            Err(StoreError::Unavailable(format!("{} timed out", what)))
        }
    }
}

/// Both store halves, chosen from `database.url`
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            credentials: store.clone(),
            sessions: store,
        }
    }
}

/// Initialize the configured stores
pub async fn init_stores(config: &DatabaseConfig) -> Result<Stores> {
    if config.url == "memory" {
        return Ok(Stores::memory());
    }

    let pool = init_pool(config).await?;
    let store = Arc::new(SqliteStore::new(pool));
    Ok(Stores {
        credentials: store.clone(),
        sessions: store,
    })
}

/// Initialize the database connection pool and run migrations
pub async fn init_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await
        .with_context(|| format!("Failed to connect to database: {}", config.url))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}
