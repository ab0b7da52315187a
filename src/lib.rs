//! # vault-reconcile
//!
//! Declarative reconciliation of HashiCorp Vault resources. Manifests declare secrets
//! engine mounts, PKI issuers and roles, password policies and generated passwords; the
//! engine creates each one once whatever it depends on exists.
//!
//! ## Architecture
//!
//! ```text
//! Manifests → Dispatcher → EventBus → Processors → SecretsBackend (Vault)
//!                              ↑            ↓
//!                              └── lifecycle events
//! ```
//!
//! - **Dispatcher**: publishes one `Discovered` event per resource, then `PostProcessRequested`
//! - **Processors**: one per resource kind; dependents wait in a [`dependency::DependencyGraph`]
//!   until every dependency reports `Created`, `Updated` or `Unchanged`
//! - **Post-processing**: every dependent still waiting is attempted anyway
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vault_reconcile::{config::DispatchConfig, secrets::MemoryBackend, Dispatcher, Result};
//!
//! # async fn run() -> Result<()> {
//! let manifests = [std::path::PathBuf::from("manifests")];
//! let resources = vault_reconcile::manifest::load(&manifests, true)?;
//! let (dispatcher, _processors) =
//!     Dispatcher::for_backend(Arc::new(MemoryBackend::permissive()), &DispatchConfig::default());
//! let report = dispatcher.dispatch(resources).await?;
//! println!("{} resources reconciled", report.len());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod dependency;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod events;
pub mod manifest;
pub mod observability;
pub mod processor;
pub mod secrets;
pub mod services;
pub mod utils;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use dispatcher::{ApplyReport, Dispatcher};
pub use domain::{Resource, ResourceKind};
pub use errors::{Error, Result};
pub use events::{Event, EventBus, EventKind};
pub use processor::Processors;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
