//! Core secrets backend trait.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::Result;
use super::types::{MountInfo, SecretString};
use crate::domain::{CsrParams, EngineParams, IssuanceParams, IssuerRef, KvConfig, RoleParams};

/// Operations the reconciliation engine needs from a secrets backend.
///
/// Every call is an independent request; implementations apply their own timeouts and
/// report them as [`BackendError::ConnectionFailed`](super::BackendError::ConnectionFailed).
///
/// # Security Considerations
///
/// - Implementations MUST NOT log secret values or tokens
/// - Generated passwords travel as [`SecretString`] end to end
#[async_trait]
pub trait SecretsBackend: Send + Sync {
    /// Generate a self-signed root issuer in `mount`.
    ///
    /// # Errors
    ///
    /// - [`BackendError::IssuerNameTaken`](super::BackendError::IssuerNameTaken) if the
    ///   mount already holds an issuer called `params.issuer_name`
    async fn generate_root_issuer(&self, mount: &str, params: &CsrParams) -> Result<()>;

    /// Generate a key pair in `mount` and return the PEM encoded CSR for it.
    async fn generate_intermediate_csr(&self, mount: &str, params: &CsrParams) -> Result<String>;

    /// Sign `csr` with the issuer `signer`, returning the PEM encoded certificate.
    ///
    /// # Errors
    ///
    /// - [`BackendError::NotFound`](super::BackendError::NotFound) if the signing issuer
    ///   does not exist
    async fn sign_intermediate(
        &self,
        signer: &IssuerRef,
        csr: &str,
        params: &IssuanceParams,
    ) -> Result<String>;

    /// Import a signed certificate into `mount`, returning the imported issuer ids.
    async fn set_signed_intermediate(&self, mount: &str, certificate: &str) -> Result<Vec<String>>;

    /// Rename the issuer `issuer_ref` in `mount` to `issuer_name`.
    async fn update_issuer(&self, mount: &str, issuer_ref: &str, issuer_name: &str) -> Result<()>;

    /// Fetch the HCL of the password policy at `path`, `None` when it does not exist.
    async fn read_password_policy(&self, path: &str) -> Result<Option<String>>;

    /// Create or replace the password policy at `path`.
    async fn write_password_policy(&self, path: &str, policy: &str) -> Result<()>;

    /// Generate a password from the policy at `policy_path`.
    ///
    /// # Errors
    ///
    /// - [`BackendError::PasswordPolicyNotFound`](super::BackendError::PasswordPolicyNotFound)
    ///   if the policy does not exist
    async fn generate_password(&self, policy_path: &str) -> Result<SecretString>;

    /// Write `key = value` to the KV v2 secret `mount/path`.
    ///
    /// With `cas` set, the write only succeeds if the secret's current version matches.
    ///
    /// # Errors
    ///
    /// - [`BackendError::CasMismatch`](super::BackendError::CasMismatch) on a version
    ///   conflict
    async fn write_kv_secret(
        &self,
        mount: &str,
        path: &str,
        key: &str,
        value: &SecretString,
        cas: Option<u64>,
    ) -> Result<()>;

    /// Read the latest version of the KV v2 secret `mount/path`.
    async fn read_kv_secret(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<Option<HashMap<String, SecretString>>>;

    /// Describe the secrets engine mounted at `path`, `None` when nothing is mounted there.
    async fn read_secrets_engine(&self, path: &str) -> Result<Option<MountInfo>>;

    /// Mount a new secrets engine at `path`.
    ///
    /// # Errors
    ///
    /// - [`BackendError::MountPathInUse`](super::BackendError::MountPathInUse) if an
    ///   engine is already mounted there
    async fn enable_secrets_engine(&self, path: &str, params: &EngineParams) -> Result<()>;

    /// Apply the declared description and lease settings to the engine at `path`.
    async fn tune_secrets_engine(&self, path: &str, params: &EngineParams) -> Result<()>;

    /// Engine-wide settings of the KV v2 mount `mount`, `None` when it has none.
    async fn read_kv_config(&self, mount: &str) -> Result<Option<KvConfig>>;

    async fn configure_kv(&self, mount: &str, config: &KvConfig) -> Result<()>;

    /// Fetch the role `name` in the PKI mount `mount`, `None` when it does not exist.
    async fn read_pki_role(
        &self,
        mount: &str,
        name: &str,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>>;

    /// Create or replace the role `name` in the PKI mount `mount`.
    ///
    /// # Errors
    ///
    /// - [`BackendError::NotFound`](super::BackendError::NotFound) if the mount or the
    ///   issuer the role names does not exist
    async fn write_pki_role(&self, mount: &str, name: &str, params: &RoleParams) -> Result<()>;

    /// Check the backend is reachable and unsealed.
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}
