//! # Configuration Settings
//!
//! Defines the configuration structure for vault-reconcile.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{Error, Result};
use crate::secrets::VaultConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    /// Vault connection
    #[validate(nested)]
    pub vault: VaultConfig,

    /// Concurrency limits
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// Logging
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    /// Checks the validator crate cannot express
    fn validate_custom(&self) -> Result<()> {
        let address = url::Url::parse(&self.vault.address).map_err(|e| {
            Error::validation(format!("Invalid Vault address '{}': {}", self.vault.address, e))
        })?;

        if address.scheme() != "http" && address.scheme() != "https" {
            return Err(Error::validation("Vault address must use http:// or https://"));
        }
        Ok(())
    }
}

/// Bounds on concurrent work
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatchConfig {
    /// Concurrent discoveries and concurrent backend calls per processor (0 = unbounded)
    #[validate(range(max = 1024, message = "max_dispatch must be at most 1024"))]
    pub max_dispatch: usize,

    /// Handlers run at once for a single published event (unset = unbounded)
    pub fanout_limit: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_dispatch: 10, fanout_limit: None }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info", "vault_reconcile=debug")
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logs: false }
    }
}
