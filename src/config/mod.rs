pub mod app_config;

// Re-export common types for convenience
pub use app_config::{
    AppConfig, DatabaseConfig, LedgerAuthConfig, LedgerConfig, LedgerEndpoints,
    LedgerEnvironment, LoggingConfig, PhoneConfig, PhoneSyncConfig, SyncConfig,
};
