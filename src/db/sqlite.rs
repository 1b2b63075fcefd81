//! SQLite-backed credential and session store

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{CredentialStore, SessionStore, StoreError, StoreResult};
use crate::models::{
    normalize_email, AccountToken, ApiKeyRecord, FlashMessage, Identity, Session, TokenKind,
};

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    is_activated: bool,
    is_admin: bool,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    id: String,
    hash: String,
    owner_id: String,
    name: String,
    last_used_at: Option<String>,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AccountTokenRow {
    token_hash: String,
    user_id: String,
    kind: String,
    expires_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    token_hash: String,
    user_id: Option<String>,
    csrf_secret: String,
    flash: String,
    created_at: String,
    expires_at: String,
}

/// Timestamps are stored with a fixed width so string order equals time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn encode_flash(session: &Session) -> StoreResult<String> {
    serde_json::to_string(&session.flash)
        .map_err(|e| StoreError::Corrupt(format!("unserializable flash: {}", e)))
}

fn parse_ts(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", value, e)))
}

fn parse_uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("bad id {:?}: {}", value, e)))
}

impl TryFrom<UserRow> for Identity {
    type Error = StoreError;

    fn try_from(row: UserRow) -> StoreResult<Self> {
        Ok(Identity {
            id: parse_uuid(&row.id)?,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            is_activated: row.is_activated,
            is_admin: row.is_admin,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<ApiKeyRow> for ApiKeyRecord {
    type Error = StoreError;

    fn try_from(row: ApiKeyRow) -> StoreResult<Self> {
        Ok(ApiKeyRecord {
            id: parse_uuid(&row.id)?,
            hash: row.hash,
            owner_id: parse_uuid(&row.owner_id)?,
            name: row.name,
            last_used_at: row.last_used_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<AccountTokenRow> for AccountToken {
    type Error = StoreError;

    fn try_from(row: AccountTokenRow) -> StoreResult<Self> {
        Ok(AccountToken {
            token_hash: row.token_hash,
            user_id: parse_uuid(&row.user_id)?,
            kind: row.kind.parse().map_err(StoreError::Corrupt)?,
            expires_at: parse_ts(&row.expires_at)?,
        })
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> StoreResult<Self> {
        let flash: Vec<FlashMessage> = serde_json::from_str(&row.flash)
            .map_err(|e| StoreError::Corrupt(format!("bad flash payload: {}", e)))?;
        Ok(Session {
            token_hash: row.token_hash,
            user_id: row.user_id.as_deref().map(parse_uuid).transpose()?,
            csrf_secret: row.csrf_secret,
            flash,
            created_at: parse_ts(&row.created_at)?,
            expires_at: parse_ts(&row.expires_at)?,
        })
    }
}

/// sqlx-backed store; one pool serves both traits
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, is_activated, is_admin, created_at";
const API_KEY_COLUMNS: &str = "id, hash, owner_id, name, last_used_at, created_at";

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Identity::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Identity::try_from).transpose()
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> StoreResult<Option<ApiKeyRecord>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {} FROM api_keys WHERE hash = ?",
            API_KEY_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ApiKeyRecord::try_from).transpose()
    }

    async fn list_users(&self) -> StoreResult<Vec<Identity>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY created_at",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Identity::try_from).collect()
    }

    async fn insert_user(&self, identity: &Identity) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, is_activated, is_admin, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(identity.id.to_string())
        .bind(&identity.username)
        .bind(normalize_email(&identity.email))
        .bind(&identity.password_hash)
        .bind(identity.is_activated)
        .bind(identity.is_admin)
        .bind(ts(identity.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_activated(&self, id: Uuid, activated: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET is_activated = ? WHERE id = ?")
            .bind(activated)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let id = id.to_string();

        sqlx::query("DELETE FROM api_keys WHERE owner_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM account_tokens WHERE user_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_api_key(&self, key: &ApiKeyRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, hash, owner_id, name, last_used_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.id.to_string())
        .bind(&key.hash)
        .bind(key.owner_id.to_string())
        .bind(&key.name)
        .bind(key.last_used_at.map(ts))
        .bind(ts(key.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(ts(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_api_keys(&self, owner_id: Uuid) -> StoreResult<Vec<ApiKeyRecord>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {} FROM api_keys WHERE owner_id = ? ORDER BY created_at DESC",
            API_KEY_COLUMNS
        ))
        .bind(owner_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ApiKeyRecord::try_from).collect()
    }

    async fn insert_account_token(&self, token: &AccountToken) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO account_tokens (token_hash, user_id, kind, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&token.token_hash)
        .bind(token.user_id.to_string())
        .bind(token.kind.as_str())
        .bind(ts(token.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_account_token(
        &self,
        kind: TokenKind,
        token_hash: &str,
    ) -> StoreResult<Option<AccountToken>> {
        let row = sqlx::query_as::<_, AccountTokenRow>(
            "SELECT token_hash, user_id, kind, expires_at FROM account_tokens WHERE token_hash = ? AND kind = ?",
        )
        .bind(token_hash)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountToken::try_from).transpose()
    }

    async fn delete_account_token(&self, token_hash: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM account_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT token_hash, user_id, csrf_secret, flash, created_at, expires_at
            FROM sessions
            WHERE token_hash = ?
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn insert(&self, session: &Session) -> StoreResult<()> {
        let flash = encode_flash(session)?;

        sqlx::query(
            r#"
            INSERT INTO sessions (token_hash, user_id, csrf_secret, flash, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.token_hash)
        .bind(session.user_id.map(|id| id.to_string()))
        .bind(&session.csrf_secret)
        .bind(flash)
        .bind(ts(session.created_at))
        .bind(ts(session.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, session: &Session) -> StoreResult<bool> {
        let flash = encode_flash(session)?;

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET user_id = ?, csrf_secret = ?, flash = ?, expires_at = ?
            WHERE token_hash = ?
            "#,
        )
        .bind(session.user_id.map(|id| id.to_string()))
        .bind(&session.csrf_secret)
        .bind(flash)
        .bind(ts(session.expires_at))
        .bind(&session.token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, token_hash: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(ts(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
