//! # Structured Logging
//!
//! Subscriber setup and the span macro resource handling runs under.
//!
//! The filter comes from `RUST_LOG` when it is set, otherwise from the configured level
//! (`debug` when verbose output was requested). JSON output is available for log
//! shipping.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::ObservabilityConfig;

/// Create a tracing span for one resource's reconciliation.
///
/// ```rust,ignore
/// let span = resource_span!(ResourceKind::Issuer, "pki_int/intermediate");
/// let span = resource_span!(ResourceKind::Password, "secret/db", forced = true);
/// ```
#[macro_export]
macro_rules! resource_span {
    ($kind:expr, $path:expr) => {
        tracing::info_span!(
            "reconcile_resource",
            kind = %$kind,
            path = %$path,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($kind:expr, $path:expr, $($field:tt)*) => {
        tracing::info_span!(
            "reconcile_resource",
            kind = %$kind,
            path = %$path,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Filter directive used when `RUST_LOG` is unset
pub fn default_directive(config: &ObservabilityConfig, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    }
}

/// Install the global subscriber.
///
/// Logs go to stderr so reports on stdout stay machine readable. Installing twice is
/// harmless; the first subscriber stays in place.
pub fn init_logging(config: &ObservabilityConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config, verbose)));

    let builder = FmtSubscriber::builder().with_env_filter(filter).with_writer(std::io::stderr);
    let installed = if config.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    if installed.is_err() {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
    }
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        vault_address = %config.vault.address,
        vault_namespace = ?config.vault.namespace,
        token_configured = config.vault.token.is_some(),
        max_dispatch = config.dispatch.max_dispatch,
        fanout_limit = ?config.dispatch.fanout_limit,
        "vault-reconcile configuration"
    );
}
