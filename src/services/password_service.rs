//! Generated password materialization.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::info;

use crate::dependency::NodeKey;
use crate::domain::{Password, ResourceKind, StringEncoding};
use crate::errors::{Error, Result};
use crate::secrets::{SecretString, SecretsBackend};

/// Generates passwords from their policy and stores them in KV v2
#[derive(Clone)]
pub struct PasswordService {
    backend: Arc<dyn SecretsBackend>,
}

impl PasswordService {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Generate a value for `password` and write it to its secret.
    ///
    /// A missing policy surfaces as the backend's `PasswordPolicyNotFound` error.
    pub async fn create(&self, password: &Password) -> Result<()> {
        let spec = &password.spec;
        let wrap = |e| Error::backend(ResourceKind::Password, password.absolute_path(), e);

        let generated =
            self.backend.generate_password(&password.policy_name()).await.map_err(wrap)?;
        let value = encode(&generated, spec.encoding);

        let secret_path = NodeKey::from_path(&spec.path);
        self.backend
            .write_kv_secret(
                &spec.secret_engine,
                secret_path.as_str(),
                &spec.secret_keys.secret_key,
                &value,
                spec.cas,
            )
            .await
            .map_err(wrap)?;

        info!(
            path = %password.absolute_path(),
            policy = %password.policy_name(),
            "Password stored"
        );
        Ok(())
    }
}

fn encode(value: &SecretString, encoding: StringEncoding) -> SecretString {
    match encoding {
        StringEncoding::Utf8 => value.clone(),
        StringEncoding::Base64 => value.map(|raw| STANDARD.encode(raw.as_bytes())),
    }
}
