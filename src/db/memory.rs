//! In-process store backed by `RwLock`ed maps

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CredentialStore, SessionStore, StoreError, StoreResult};
use crate::models::{normalize_email, AccountToken, ApiKeyRecord, Identity, Session, TokenKind};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, Identity>,
    api_keys: HashMap<Uuid, ApiKeyRecord>,
    account_tokens: HashMap<String, AccountToken>,
    sessions: HashMap<String, Session>,
}

/// Credential and session store kept entirely in memory.
///
/// Nothing survives a restart. Used by tests and for local development.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live session records (test helper)
    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let email = normalize_email(email);
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> StoreResult<Option<ApiKeyRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.api_keys.values().find(|k| k.hash == hash).cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<Identity>> {
        let mut users: Vec<Identity> = self.tables.read().await.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn insert_user(&self, identity: &Identity) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|u| u.email == identity.email || u.username == identity.username)
        {
            return Err(StoreError::Duplicate("user already exists".to_string()));
        }
        tables.users.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn set_activated(&self, id: Uuid, activated: bool) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.users.get_mut(&id) {
            Some(user) => {
                user.is_activated = activated;
                true
            }
            None => false,
        })
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let removed = tables.users.remove(&id).is_some();
        tables.api_keys.retain(|_, k| k.owner_id != id);
        tables.account_tokens.retain(|_, t| t.user_id != id);
        Ok(removed)
    }

    async fn insert_api_key(&self, key: &ApiKeyRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.api_keys.values().any(|k| k.hash == key.hash) {
            return Err(StoreError::Duplicate("api key already exists".to_string()));
        }
        tables.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(key) = self.tables.write().await.api_keys.get_mut(&id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn list_api_keys(&self, owner_id: Uuid) -> StoreResult<Vec<ApiKeyRecord>> {
        let tables = self.tables.read().await;
        let mut keys: Vec<ApiKeyRecord> = tables
            .api_keys
            .values()
            .filter(|k| k.owner_id == owner_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn insert_account_token(&self, token: &AccountToken) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .account_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_account_token(
        &self,
        kind: TokenKind,
        token_hash: &str,
    ) -> StoreResult<Option<AccountToken>> {
        let tables = self.tables.read().await;
        Ok(tables
            .account_tokens
            .get(token_hash)
            .filter(|t| t.kind == kind)
            .cloned())
    }

    async fn delete_account_token(&self, token_hash: &str) -> StoreResult<()> {
        self.tables.write().await.account_tokens.remove(token_hash);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(token_hash).cloned())
    }

    async fn insert(&self, session: &Session) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.token_hash) {
            return Err(StoreError::Duplicate("session token".into()));
        }
        tables
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn update(&self, session: &Session) -> StoreResult<bool> {
        match self.tables.write().await.sessions.get_mut(&session.token_hash) {
            Some(stored) => {
                *stored = session.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, token_hash: &str) -> StoreResult<()> {
        self.tables.write().await.sessions.remove(token_hash);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}
