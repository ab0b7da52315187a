//! Secrets backend abstraction.
//!
//! The reconciliation engine talks to its backend only through the [`SecretsBackend`]
//! trait. Two implementations ship with the crate:
//!
//! - [`VaultBackend`]: HashiCorp Vault over its HTTP API (PKI, password policies, KV v2)
//! - [`MemoryBackend`]: in-process state for tests and `apply --dry-run`
//!
//! # Example
//!
//! ```rust,ignore
//! use vault_reconcile::secrets::{SecretsBackend, VaultBackend, VaultConfig};
//!
//! let backend = VaultBackend::connect(&VaultConfig::default()).await?;
//! let password = backend.generate_password("strong").await?;
//! backend.write_kv_secret("secret", "db", "password", &password, Some(0)).await?;
//! ```

pub mod client;
pub mod error;
pub mod memory;
pub mod types;
pub mod vault;

pub use client::SecretsBackend;
pub use error::{BackendError, BackendErrorKind};
pub use memory::{BackendCall, InjectedFailure, MemoryBackend};
pub use types::{MountConfig, MountInfo, SecretString};
pub use vault::{VaultBackend, VaultConfig};
