//! PKI issuer materialization.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{Issuer, ResourceKind};
use crate::errors::{Error, Result};
use crate::secrets::{BackendError, SecretsBackend};

/// Creates root and intermediate issuers on the backend
#[derive(Clone)]
pub struct IssuerService {
    backend: Arc<dyn SecretsBackend>,
}

impl IssuerService {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Create `issuer` on the backend.
    ///
    /// A root is generated in place. An intermediate goes through CSR generation, signing
    /// by its root, import of the signed certificate and naming of the imported issuer.
    pub async fn push(&self, issuer: &Issuer) -> Result<()> {
        let path = issuer.absolute_path();
        self.push_inner(issuer).await.map_err(|e| Error::backend(ResourceKind::Issuer, path, e))
    }

    async fn push_inner(&self, issuer: &Issuer) -> std::result::Result<(), BackendError> {
        let spec = &issuer.spec;
        let mount = spec.secret_engine.as_str();

        let Some(issuance) = spec.issuance_params.as_ref() else {
            self.backend.generate_root_issuer(mount, &spec.csr_params).await?;
            info!(path = %issuer.absolute_path(), "Root issuer created");
            return Ok(());
        };

        let csr = self.backend.generate_intermediate_csr(mount, &spec.csr_params).await?;
        debug!(path = %issuer.absolute_path(), "Intermediate CSR generated");

        let certificate =
            self.backend.sign_intermediate(&issuance.issuer_ref, &csr, issuance).await?;
        debug!(
            path = %issuer.absolute_path(),
            root = %issuance.issuer_ref.absolute_path(),
            "Intermediate signed"
        );

        let imported = self.backend.set_signed_intermediate(mount, &certificate).await?;
        let [issuer_id] = imported.as_slice() else {
            return Err(BackendError::unexpected(format!(
                "expected exactly one imported issuer in '{}', got {}",
                mount,
                imported.len()
            )));
        };

        self.backend.update_issuer(mount, issuer_id, &spec.csr_params.issuer_name).await?;
        info!(
            path = %issuer.absolute_path(),
            root = %issuance.issuer_ref.absolute_path(),
            "Intermediate issuer created"
        );
        Ok(())
    }
}
