//! API key issuing and verification
//!
//! Raw keys are `ug_` followed by 32 random bytes (base64url). Only the keyed
//! HMAC-SHA256 of a key is ever stored; verification hashes the presented
//! credential and looks the digest up.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{bounded_lookup, bounded_write, CredentialStore, StoreResult};
use crate::models::{ApiKeyRecord, Identity};
use crate::utils::tokens::{generate_token, hmac_hex};

/// Prefix of every generated key
pub const KEY_PREFIX: &str = "ug_";

/// Why an API key credential was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiKeyError {
    #[error("No authorization provided.")]
    Missing,

    #[error("Invalid api key provided.")]
    Invalid,
}

/// Deterministic keyed hash of raw API keys
#[derive(Clone)]
pub struct ApiKeyHasher {
    secret: Arc<[u8]>,
}

impl ApiKeyHasher {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret.as_bytes()),
        }
    }

    pub fn hash_key(&self, raw: &str) -> String {
        hmac_hex(&self.secret, raw.as_bytes())
    }
}

/// Create a new raw API key
pub fn generate_key() -> String {
    format!("{}{}", KEY_PREFIX, generate_token())
}

/// Extract the credential from an `Authorization` header value.
///
/// Everything after the first space is the credential, whatever the scheme
/// word is. A value without a space yields an empty credential.
pub fn credential_from_header(value: &str) -> &str {
    value.split_once(' ').map(|(_, rest)| rest).unwrap_or("")
}

#[derive(Clone)]
pub struct ApiKeyAuthenticator {
    credentials: Arc<dyn CredentialStore>,
    hasher: ApiKeyHasher,
    store_timeout: Duration,
}

impl ApiKeyAuthenticator {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        hasher: ApiKeyHasher,
        store_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            hasher,
            store_timeout,
        }
    }

    /// Resolve an `Authorization` header value to the key's owner
    pub async fn verify(&self, header: Option<&str>) -> Result<Arc<Identity>, ApiKeyError> {
        let header = header.ok_or(ApiKeyError::Missing)?;
        let credential = credential_from_header(header);
        if credential.is_empty() {
            return Err(ApiKeyError::Invalid);
        }

        let hash = self.hasher.hash_key(credential);
        let key = bounded_lookup(
            self.store_timeout,
            "api_key",
            self.credentials.find_api_key_by_hash(&hash),
        )
        .await
        .ok_or(ApiKeyError::Invalid)?;

        let owner = bounded_lookup(
            self.store_timeout,
            "api_key_owner",
            self.credentials.find_user_by_id(key.owner_id),
        )
        .await
        .ok_or_else(|| {
            warn!(key_id = %key.id, "API key owner no longer exists");
            ApiKeyError::Invalid
        })?;

        let touch = self.credentials.touch_api_key(key.id, Utc::now());
        if let Err(e) = bounded_write(self.store_timeout, "api_key_touch", touch).await {
            warn!(key_id = %key.id, error = %e, "Failed to update API key last_used_at");
        }

        debug!(key_id = %key.id, user_id = %owner.id, "API key accepted");
        Ok(Arc::new(owner))
    }

    /// Create a key for `owner_id`; the plaintext is only returned here
    pub async fn issue_key(
        &self,
        owner_id: Uuid,
        name: &str,
    ) -> StoreResult<(ApiKeyRecord, String)> {
        let raw = generate_key();
        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            hash: self.hasher.hash_key(&raw),
            owner_id,
            name: name.to_string(),
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.credentials.insert_api_key(&record).await?;
        Ok((record, raw))
    }
}
