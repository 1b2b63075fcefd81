//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides (including the short `COOKIE_SECRET`,
//!   `COOKIE_NAME`, `IP`, `PORT`, `PROXY` and `SIGNUPS` names)
//! - Multiple configuration file locations
//! - Default values for all settings
//! - Per-route-group rate limits and the CSRF exemption list

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::SessionExpiry;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub csrf: CsrfConfig,
    #[serde(default = "default_rate_limits")]
    pub rate_limits: Vec<RateLimitRule>,
    pub api_keys: ApiKeyConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    /// CSRF verification is switched off entirely
    Test,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trust_proxy: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5050
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_proxy: false,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL, or `memory` for the in-process store
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://./data/upload-gate.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Key used to sign session cookies
    pub secret: String,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_session_max_age")]
    pub max_age_secs: u64,
    #[serde(default)]
    pub expiry: SessionExpiry,
    /// Force the `Secure` cookie attribute; defaults to on in production
    #[serde(default)]
    pub secure: Option<bool>,
    /// Interval of the expired-session sweep (0 disables it)
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_cookie_name() -> String {
    "upload_gate.sid".to_string()
}

fn default_session_max_age() -> u64 {
    14 * 24 * 3600 // Two weeks
}

fn default_purge_interval() -> u64 {
    3600
}

/// CSRF verification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CsrfConfig {
    #[serde(default = "default_csrf_enabled")]
    pub enabled: bool,
    /// Paths that skip verification because their body is streamed multipart
    #[serde(default = "default_csrf_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

fn default_csrf_enabled() -> bool {
    true
}

fn default_csrf_exempt_paths() -> Vec<String> {
    vec![
        "/api/upload".to_string(),
        "/api/upload/image".to_string(),
        "/api/upload/text".to_string(),
        "/api/upload/file".to_string(),
    ]
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: default_csrf_enabled(),
            exempt_paths: default_csrf_exempt_paths(),
        }
    }
}

/// Fixed-window quota applied to every path under `path_prefix`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateLimitRule {
    pub name: String,
    pub path_prefix: String,
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitRule {
    pub fn new(name: &str, path_prefix: &str, max_requests: u32, window_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            path_prefix: path_prefix.to_string(),
            max_requests,
            window_ms,
        }
    }
}

fn default_rate_limits() -> Vec<RateLimitRule> {
    vec![
        // 50 requests per 15 minutes on account routes
        RateLimitRule::new("account", "/user", 50, 15 * 60 * 1000),
        // 15 requests per minute on the upload API
        RateLimitRule::new("api", "/api", 15, 60 * 1000),
    ]
}

/// API key hashing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyConfig {
    /// Key for the HMAC applied to raw API keys before lookup
    pub secret: String,
}

/// Store access configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Upper bound on any single lookup made while authenticating a request
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

fn default_store_timeout() -> u64 {
    2000
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_store_timeout(),
        }
    }
}

/// Account lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountsConfig {
    #[serde(default = "default_signups_enabled")]
    pub signups_enabled: bool,
    #[serde(default = "default_activation_ttl")]
    pub activation_ttl_secs: u64,
    #[serde(default = "default_reset_ttl")]
    pub reset_ttl_secs: u64,
    #[serde(default = "default_password_min_length")]
    pub password_min_length: usize,
    /// Public base URL used in activation and reset links
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_signups_enabled() -> bool {
    true
}

fn default_activation_ttl() -> u64 {
    24 * 3600
}

fn default_reset_ttl() -> u64 {
    3600
}

fn default_password_min_length() -> usize {
    8
}

fn default_base_url() -> String {
    "http://localhost:5050".to_string()
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            signups_enabled: default_signups_enabled(),
            activation_ttl_secs: default_activation_ttl(),
            reset_ttl_secs: default_reset_ttl(),
            password_min_length: default_password_min_length(),
            base_url: default_base_url(),
        }
    }
}

/// Upload storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_upload_max_bytes")]
    pub max_bytes: usize,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

fn default_upload_max_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            directory: default_upload_dir(),
            max_bytes: default_upload_max_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file" or "both")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_log_prefix() -> String {
    "upload-gate".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            session: SessionConfig {
                secret: "change-me-in-production-minimum-32-characters-long".to_string(),
                cookie_name: default_cookie_name(),
                max_age_secs: default_session_max_age(),
                expiry: SessionExpiry::default(),
                secure: None,
                purge_interval_secs: default_purge_interval(),
            },
            csrf: CsrfConfig::default(),
            rate_limits: default_rate_limits(),
            api_keys: ApiKeyConfig {
                secret: "change-me-too-api-key-hmac-secret-32-chars".to_string(),
            },
            store: StoreConfig::default(),
            accounts: AccountsConfig::default(),
            uploads: UploadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (and `.env`)
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("UPLOAD_GATE_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_overrides_from(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/upload-gate/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("upload-gate/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply overrides from an environment-style lookup
    pub fn apply_overrides_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = var("UPLOAD_GATE_ENV") {
            if let Ok(env) = env.parse() {
                self.environment = env;
            }
        }

        // Server overrides
        if let Some(host) = var("IP") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Some(proxy) = var("PROXY") {
            self.server.trust_proxy = is_truthy(&proxy);
        }

        // Database overrides
        if let Some(url) = var("DATABASE_URL") {
            self.database.url = url;
        }

        // Session overrides
        if let Some(secret) = var("COOKIE_SECRET") {
            self.session.secret = secret;
        }
        if let Some(name) = var("COOKIE_NAME") {
            self.session.cookie_name = name;
        }

        if let Some(secret) = var("API_KEY_SECRET") {
            self.api_keys.secret = secret;
        }

        // Account overrides
        if let Some(signups) = var("SIGNUPS") {
            self.accounts.signups_enabled = is_truthy(&signups);
        }
        if let Some(url) = var("UPLOAD_GATE_BASE_URL") {
            self.accounts.base_url = url;
        }

        if let Some(dir) = var("UPLOAD_GATE_UPLOAD_DIR") {
            self.uploads.directory = PathBuf::from(dir);
        }

        // Logging overrides
        if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = var("UPLOAD_GATE_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
        if let Some(target) = var("UPLOAD_GATE_LOG_TARGET") {
            self.logging.target = match target.to_lowercase().as_str() {
                "file" => LogTarget::File,
                "both" => LogTarget::Both,
                _ => LogTarget::Console,
            };
        }
        if let Some(dir) = var("UPLOAD_GATE_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.session.secret.len() < 32 {
            anyhow::bail!("Session secret must be at least 32 characters long");
        }

        if self.api_keys.secret.len() < 32 {
            anyhow::bail!("API key secret must be at least 32 characters long");
        }

        if self.session.cookie_name.is_empty()
            || self
                .session
                .cookie_name
                .chars()
                .any(|c| c.is_whitespace() || c == ';' || c == '=' || c == ',')
        {
            anyhow::bail!("Invalid session cookie name: {:?}", self.session.cookie_name);
        }

        if self.session.max_age_secs == 0 {
            anyhow::bail!("Session max age cannot be 0");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        for rule in &self.rate_limits {
            if rule.max_requests == 0 || rule.window_ms == 0 {
                anyhow::bail!(
                    "Rate limit group '{}' needs a non-zero quota and window",
                    rule.name
                );
            }
            if !rule.path_prefix.starts_with('/') {
                anyhow::bail!(
                    "Rate limit group '{}' path prefix must start with '/'",
                    rule.name
                );
            }
        }

        if let Some(path) = self.csrf.exempt_paths.iter().find(|p| !p.starts_with('/')) {
            anyhow::bail!("CSRF exempt path must start with '/': {}", path);
        }

        if self.environment == Environment::Production && self.session.secure == Some(false) {
            tracing::warn!("Session cookies are not marked Secure in production");
        }

        Ok(())
    }

    /// Whether CSRF tokens are checked at all
    pub fn csrf_active(&self) -> bool {
        self.csrf.enabled && self.environment != Environment::Test
    }

    /// Whether session cookies carry the `Secure` attribute
    pub fn secure_cookies(&self) -> bool {
        self.session
            .secure
            .unwrap_or(self.environment == Environment::Production)
    }

    /// Create a default configuration file
    pub fn create_default_config(path: &PathBuf) -> Result<()> {
        let config = AppConfig::default();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_norway::to_string(&config)?;
        std::fs::write(path, yaml)?;

        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
