//! Business logic services

pub mod account;
pub mod api_key;
pub mod password;
pub mod session;

use std::{sync::Arc, time::Duration};

pub use account::AccountService;
pub use api_key::{ApiKeyAuthenticator, ApiKeyError, ApiKeyHasher};
pub use session::{ResolvedSession, SessionAuthenticator, SessionSettings};

use crate::config::AppConfig;
use crate::db::{CredentialStore, Stores};

/// Authentication services shared by the middleware chain and handlers.
///
/// Built once at startup from the configuration and the selected stores.
#[derive(Clone)]
pub struct AuthContext {
    pub credentials: Arc<dyn CredentialStore>,
    pub sessions: SessionAuthenticator,
    pub api_keys: ApiKeyAuthenticator,
    pub accounts: AccountService,
    pub store_timeout: Duration,
}

impl AuthContext {
    pub fn new(config: &AppConfig, stores: Stores) -> Self {
        let store_timeout = config.store.timeout();
        Self {
            sessions: SessionAuthenticator::new(
                stores.sessions,
                stores.credentials.clone(),
                SessionSettings::from_config(config),
            ),
            api_keys: ApiKeyAuthenticator::new(
                stores.credentials.clone(),
                ApiKeyHasher::new(&config.api_keys.secret),
                store_timeout,
            ),
            accounts: AccountService::new(
                stores.credentials.clone(),
                config.accounts.clone(),
                store_timeout,
            ),
            credentials: stores.credentials,
            store_timeout,
        }
    }
}
