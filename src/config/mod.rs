//! Configuration module for the realmgate server
//!
//! Loads `realmgate.toml`. Every section and field has a default, so a
//! missing file or a partial one still yields a usable configuration.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    DEFAULT_ADMIN_PORT, DEFAULT_ALLOWED_BUILDS, DEFAULT_LOGON_PORT, DEFAULT_WORLD_PORT,
    MAX_CONNECTIONS_PER_IP, MAX_TOTAL_CONNECTIONS,
};
use crate::session::AccountLevel;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "REALMGATE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettingsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub realm: RealmConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettingsConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_logon_port")]
    pub logon_port: u16,
    #[serde(default = "default_world_port")]
    pub world_port: u16,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
}

impl Default for ServerSettingsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            logon_port: default_logon_port(),
            world_port: default_world_port(),
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            max_connections_per_ip: default_max_connections_per_ip(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Upper bound on unparsed inbound bytes per connection.
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,
    #[serde(default = "default_unauthenticated_timeout")]
    pub unauthenticated_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: default_max_buffered_bytes(),
            unauthenticated_timeout_secs: default_unauthenticated_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_allowed_builds")]
    pub allowed_builds: Vec<u16>,
    /// Failed proofs before an automatic ban. 0 disables.
    #[serde(default = "default_max_wrong_password")]
    pub max_wrong_password: u32,
    #[serde(default = "default_wrong_password_ban_secs")]
    pub wrong_password_ban_secs: u64,
    /// Ban the address instead of the account.
    #[serde(default)]
    pub wrong_password_ban_ip: bool,
    /// Too-fast pings tolerated before a kick. 0 disables.
    #[serde(default = "default_max_overspeed_pings")]
    pub max_overspeed_pings: u32,
    #[serde(default = "default_min_security_level")]
    pub min_security_level: AccountLevel,
}

impl SecurityConfig {
    pub fn is_build_allowed(&self, build: u16) -> bool {
        self.allowed_builds.contains(&build)
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_builds: default_allowed_builds(),
            max_wrong_password: default_max_wrong_password(),
            wrong_password_ban_secs: default_wrong_password_ban_secs(),
            wrong_password_ban_ip: false,
            max_overspeed_pings: default_max_overspeed_pings(),
            min_security_level: default_min_security_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealmConfig {
    /// Realm served by this world listener.
    #[serde(default = "default_realm_id")]
    pub id: u32,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            id: default_realm_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_admin_port")]
    pub port: u16,
    #[serde(default = "default_admin_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_admin_port(),
            host: default_admin_host(),
            api_key: String::new(),
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_logon_port() -> u16 { DEFAULT_LOGON_PORT }
fn default_world_port() -> u16 { DEFAULT_WORLD_PORT }
fn default_database_url() -> String { "sqlite://realmgate.db?mode=rwc".to_string() }
fn default_max_connections() -> usize { MAX_TOTAL_CONNECTIONS }
fn default_max_connections_per_ip() -> usize { MAX_CONNECTIONS_PER_IP }
fn default_log_level() -> String { "info".to_string() }
fn default_max_buffered_bytes() -> usize { 64 * 1024 }
fn default_unauthenticated_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 900 }
fn default_allowed_builds() -> Vec<u16> { DEFAULT_ALLOWED_BUILDS.to_vec() }
fn default_max_wrong_password() -> u32 { 5 }
fn default_wrong_password_ban_secs() -> u64 { 600 }
fn default_max_overspeed_pings() -> u32 { 2 }
fn default_min_security_level() -> AccountLevel { AccountLevel::Player }
fn default_realm_id() -> u32 { 1 }
fn default_admin_port() -> u16 { DEFAULT_ADMIN_PORT }
fn default_admin_host() -> String { "127.0.0.1".to_string() }

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_toml(path.as_ref())
    }

    /// Load from the file named by `REALMGATE_CONFIG`, or fall back to the
    /// built-in defaults when the variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}

fn load_toml<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    let path_str = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path_str.clone(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path_str,
        source: e,
    })
}
