//! Application-level configuration
//!
//! Defines the top-level configuration (database, logging, provider credentials,
//! sync limits) and the typed per-provider configs handed to the clients.

use crate::error::{Error, Result as SyncResult};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Embedded default configuration file
const DEFAULT_CONFIG: &str = include_str!("../../bizsync.config.toml");

/// Configuration file name
const CONFIG_FILE_NAME: &str = "bizsync.config.toml";

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Ledger provider (QuickBooks) OAuth application settings
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Phone provider (OpenPhone) settings
    #[serde(default)]
    pub phone: PhoneConfig,
    /// Sync run limits
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Load configuration from file or fall back to the embedded default
    pub fn load() -> Result<Self> {
        if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_NAME) {
            return toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", CONFIG_FILE_NAME, e));
        }

        if let Some(base_dirs) = BaseDirs::new() {
            let home_config = base_dirs.home_dir().join(".bizsync").join(CONFIG_FILE_NAME);
            if let Ok(content) = std::fs::read_to_string(&home_config) {
                return toml::from_str(&content).map_err(|e| {
                    anyhow::anyhow!("Failed to parse {}: {}", home_config.display(), e)
                });
            }
        }

        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            if let Ok(content) = std::fs::read_to_string(&config_path) {
                return toml::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e));
            }
        }

        toml::from_str(DEFAULT_CONFIG)
            .map_err(|e| anyhow::anyhow!("Failed to parse embedded default config: {}", e))
    }

    /// Load configuration from a specific file path
    /// If the file doesn't exist, creates it with default settings
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .context(format!("Failed to create directory {}", parent.display()))?;
                }

                std::fs::write(path, DEFAULT_CONFIG).context(format!(
                    "Failed to create config file at {}",
                    path.display()
                ))?;

                eprintln!(
                    "Created {}. Fill in provider credentials before syncing.",
                    path.display()
                );

                toml::from_str(DEFAULT_CONFIG)
                    .map_err(|e| anyhow::anyhow!("Failed to parse embedded default config: {}", e))
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            )),
        }
    }

    /// Validate the configuration. Credentials are checked later, when a
    /// client for that provider is constructed.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level)),
        }

        if self.sync.call_limit == 0 || self.sync.message_limit == 0 {
            return Err(anyhow::anyhow!("Sync limits must be greater than zero"));
        }

        if self.sync.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("request_timeout_secs must be greater than zero"));
        }

        if self.phone.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("phone.base_url cannot be empty"));
        }

        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        // Helper: prefer BIZSYNC_* over the provider-conventional name if both present
        fn first(a: &str, b: &str) -> Option<String> {
            std::env::var(a).ok().or_else(|| std::env::var(b).ok())
        }

        if let Some(level) = first("BIZSYNC_LOG_LEVEL", "LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(db_path) = first("BIZSYNC_DB_PATH", "DATABASE_PATH") {
            self.database.path = PathBuf::from(db_path);
        }
        if let Some(key) = first("BIZSYNC_PHONE_API_KEY", "OPENPHONE_API_KEY") {
            self.phone.api_key = Some(key);
        }
        if let Some(url) = first("BIZSYNC_PHONE_BASE_URL", "OPENPHONE_BASE_URL") {
            self.phone.base_url = url;
        }
        if let Some(id) = first("BIZSYNC_LEDGER_CLIENT_ID", "QUICKBOOKS_CLIENT_ID") {
            self.ledger.client_id = Some(id);
        }
        if let Some(secret) = first("BIZSYNC_LEDGER_CLIENT_SECRET", "QUICKBOOKS_CLIENT_SECRET") {
            self.ledger.client_secret = Some(secret);
        }
        if let Some(uri) = first("BIZSYNC_LEDGER_REDIRECT_URI", "QUICKBOOKS_REDIRECT_URI") {
            self.ledger.redirect_uri = Some(uri);
        }
        if let Some(env) = first("BIZSYNC_LEDGER_ENVIRONMENT", "QUICKBOOKS_ENVIRONMENT") {
            if let Some(parsed) = LedgerEnvironment::parse(&env) {
                self.ledger.environment = parsed;
            }
        }
    }

    /// Typed settings for the ledger OAuth client. Fails when a credential is missing.
    pub fn ledger_auth_config(&self) -> SyncResult<LedgerAuthConfig> {
        let client_id = required(&self.ledger.client_id, "ledger.client_id")?;
        let client_secret = required(&self.ledger.client_secret, "ledger.client_secret")?;
        let redirect_uri = required(&self.ledger.redirect_uri, "ledger.redirect_uri")?;

        let mut endpoints = LedgerEndpoints::for_environment(self.ledger.environment);
        if let Some(url) = &self.ledger.authorization_endpoint {
            endpoints.authorization = url.clone();
        }
        if let Some(url) = &self.ledger.token_endpoint {
            endpoints.token = url.clone();
        }
        if let Some(url) = &self.ledger.revoke_endpoint {
            endpoints.revoke = url.clone();
        }
        if let Some(url) = &self.ledger.api_base_url {
            endpoints.api_base = url.clone();
        }

        Ok(LedgerAuthConfig {
            client_id,
            client_secret,
            redirect_uri,
            environment: self.ledger.environment,
            scope: self.ledger.scope.clone(),
            endpoints,
            request_timeout: Duration::from_secs(self.sync.request_timeout_secs),
        })
    }

    /// Typed settings for the phone sync client. Fails when the API key is missing.
    pub fn phone_sync_config(&self) -> SyncResult<PhoneSyncConfig> {
        let api_key = required(&self.phone.api_key, "phone.api_key (OPENPHONE_API_KEY)")?;
        Ok(PhoneSyncConfig {
            api_key,
            base_url: self.phone.base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(self.sync.request_timeout_secs),
            call_limit: self.sync.call_limit,
            message_limit: self.sync.message_limit,
        })
    }

    /// Get a summary of the configuration
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str("Configuration loaded:\n");
        summary.push_str(&format!("Database: {}\n", self.database.path.display()));
        summary.push_str(&format!("Logging Level: {}\n", self.logging.level));
        summary.push_str(&format!(
            "Ledger Environment: {}\n",
            self.ledger.environment.as_str()
        ));
        summary.push_str(&format!(
            "Ledger Credentials: {}\n",
            if self.ledger.client_id.is_some() && self.ledger.client_secret.is_some() {
                "configured"
            } else {
                "missing"
            }
        ));
        summary.push_str(&format!(
            "Phone API Key: {}\n",
            if self.phone.api_key.is_some() {
                "configured"
            } else {
                "missing"
            }
        ));
        summary.push_str(&format!(
            "Sync Limits: calls={} messages={}\n",
            self.sync.call_limit, self.sync.message_limit
        ));
        summary
    }
}

fn required(value: &Option<String>, name: &str) -> SyncResult<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::Config(format!("{} is not set", name))),
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bizsync.duckdb"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Which ledger provider deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl LedgerEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEnvironment::Sandbox => "sandbox",
            LedgerEnvironment::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "development" => Some(LedgerEnvironment::Sandbox),
            "production" | "prod" => Some(LedgerEnvironment::Production),
            _ => None,
        }
    }
}

/// Ledger provider settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub environment: LedgerEnvironment,
    /// OAuth scope requested on the consent screen
    #[serde(default = "default_ledger_scope")]
    pub scope: String,
    /// Endpoint overrides (mainly for local testing against a fake provider)
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub revoke_endpoint: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
}

fn default_ledger_scope() -> String {
    "com.intuit.quickbooks.accounting".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            environment: LedgerEnvironment::default(),
            scope: default_ledger_scope(),
            authorization_endpoint: None,
            token_endpoint: None,
            revoke_endpoint: None,
            api_base_url: None,
        }
    }
}

/// Phone provider settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_phone_base_url")]
    pub base_url: String,
}

fn default_phone_base_url() -> String {
    "https://api.openphone.com/v1".to_string()
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_phone_base_url(),
        }
    }
}

/// Sync run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Calls fetched per run
    #[serde(default = "default_limit")]
    pub call_limit: u32,
    /// Messages fetched per run
    #[serde(default = "default_limit")]
    pub message_limit: u32,
    /// Deadline applied to every outbound HTTP request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_limit() -> u32 {
    100
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            call_limit: default_limit(),
            message_limit: default_limit(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Provider URLs for one ledger environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEndpoints {
    pub authorization: String,
    pub token: String,
    pub revoke: String,
    /// Base for `/v3/company/{realm}` API calls
    pub api_base: String,
}

impl LedgerEndpoints {
    pub fn for_environment(environment: LedgerEnvironment) -> Self {
        let api_base = match environment {
            LedgerEnvironment::Sandbox => "https://sandbox-quickbooks.api.intuit.com",
            LedgerEnvironment::Production => "https://quickbooks.api.intuit.com",
        };
        Self {
            authorization: "https://appcenter.intuit.com/connect/oauth2".to_string(),
            token: "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer".to_string(),
            revoke: "https://developer.api.intuit.com/v2/oauth2/tokens/revoke".to_string(),
            api_base: api_base.to_string(),
        }
    }
}

/// Validated settings for `LedgerOAuthClient`.
#[derive(Debug, Clone)]
pub struct LedgerAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub environment: LedgerEnvironment,
    pub scope: String,
    pub endpoints: LedgerEndpoints,
    pub request_timeout: Duration,
}

/// Validated settings for the phone provider client.
#[derive(Debug, Clone)]
pub struct PhoneSyncConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub call_limit: u32,
    pub message_limit: u32,
}
