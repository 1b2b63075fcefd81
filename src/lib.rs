//! Upload Gate Library
//!
//! This crate provides a session and API-key gated file upload service. The
//! core of it is the request authentication chain in [`middleware`].

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::{DbPool, Stores};
pub use services::AuthContext;

use middleware::RateLimitState;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Session, API key and account services
    pub auth: AuthContext,
    /// Fixed-window rate limit counters
    pub rate_limits: RateLimitState,
}

impl AppState {
    pub fn new(config: AppConfig, stores: Stores) -> Self {
        let rate_limits =
            RateLimitState::new(config.rate_limits.clone(), config.server.trust_proxy);
        Self::with_rate_limits(config, stores, rate_limits)
    }

    pub fn with_rate_limits(config: AppConfig, stores: Stores, rate_limits: RateLimitState) -> Self {
        let auth = AuthContext::new(&config, stores);
        Self {
            config: Arc::new(config),
            auth,
            rate_limits,
        }
    }
}
