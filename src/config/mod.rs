//! # Configuration Management
//!
//! Configuration is assembled in layers: built-in defaults, an optional TOML file, then
//! environment variables. Command line flags are applied last by the CLI.
//!
//! | Variable | Setting |
//! |---|---|
//! | `VAULT_ADDR` | `vault.address` |
//! | `VAULT_TOKEN` | `vault.token` |
//! | `VAULT_NAMESPACE` | `vault.namespace` |
//! | `VAULT_RECONCILE_REQUEST_TIMEOUT_SECS` | `vault.request_timeout_secs` |
//! | `VAULT_RECONCILE_MAX_DISPATCH` | `dispatch.max_dispatch` |
//! | `VAULT_RECONCILE_FANOUT_LIMIT` | `dispatch.fanout_limit` |
//! | `VAULT_RECONCILE_LOG_LEVEL` | `observability.log_level` |
//! | `VAULT_RECONCILE_JSON_LOGS` | `observability.json_logs` |

pub mod settings;

use std::path::Path;
use std::str::FromStr;

pub use settings::{AppConfig, DispatchConfig, ObservabilityConfig};

use crate::errors::{Error, Result};
use crate::secrets::SecretString;

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_value(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|e| Error::config(format!("Invalid {} '{}': {}", name, value, e)))
        })
        .transpose()
}

impl AppConfig {
    /// Defaults overlaid with the environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Read a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::config(format!("Invalid config file '{}': {}", path.display(), e)))
    }

    /// File (if any), then environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overwrite every setting whose environment variable is set
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(address) = env_value("VAULT_ADDR") {
            self.vault.address = address;
        }
        if let Some(token) = env_value("VAULT_TOKEN") {
            self.vault.token = Some(SecretString::new(token));
        }
        if let Some(namespace) = env_value("VAULT_NAMESPACE") {
            self.vault.namespace = Some(namespace);
        }
        if let Some(timeout) = env_parse("VAULT_RECONCILE_REQUEST_TIMEOUT_SECS")? {
            self.vault.request_timeout_secs = timeout;
        }
        if let Some(max_dispatch) = env_parse("VAULT_RECONCILE_MAX_DISPATCH")? {
            self.dispatch.max_dispatch = max_dispatch;
        }
        if let Some(limit) = env_parse("VAULT_RECONCILE_FANOUT_LIMIT")? {
            self.dispatch.fanout_limit = Some(limit);
        }
        if let Some(level) = env_value("VAULT_RECONCILE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(json) = env_value("VAULT_RECONCILE_JSON_LOGS") {
            self.observability.json_logs = json.eq_ignore_ascii_case("true") || json == "1";
        }
        Ok(())
    }
}
