//! Password policy reads, writes and diffing.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{PasswordPolicy, ResourceKind};
use crate::errors::{Error, Result};
use crate::events::ReconcileOutcome;
use crate::secrets::SecretsBackend;

/// Keeps password policies on the backend in line with their declaration
#[derive(Clone)]
pub struct PasswordPolicyService {
    backend: Arc<dyn SecretsBackend>,
}

impl PasswordPolicyService {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Current HCL of the policy, `None` when it does not exist
    pub async fn read(&self, policy: &PasswordPolicy) -> Result<Option<String>> {
        self.backend
            .read_password_policy(&policy.absolute_path())
            .await
            .map_err(|e| Error::backend(ResourceKind::PasswordPolicy, policy.absolute_path(), e))
    }

    pub async fn write(&self, policy: &PasswordPolicy) -> Result<()> {
        self.backend
            .write_password_policy(&policy.absolute_path(), &policy.spec.policy_params.to_hcl())
            .await
            .map_err(|e| Error::backend(ResourceKind::PasswordPolicy, policy.absolute_path(), e))
    }

    /// Write the policy when it is missing or differs from the declaration.
    pub async fn reconcile(&self, policy: &PasswordPolicy) -> Result<ReconcileOutcome> {
        let desired = policy.spec.policy_params.to_hcl();

        let outcome = match self.read(policy).await? {
            None => ReconcileOutcome::Created,
            Some(current) if same_policy(&current, &desired) => {
                debug!(path = %policy.absolute_path(), "Password policy is up to date");
                return Ok(ReconcileOutcome::Unchanged);
            }
            Some(_) => ReconcileOutcome::Updated,
        };

        self.write(policy).await?;
        info!(path = %policy.absolute_path(), outcome = ?outcome, "Password policy written");
        Ok(outcome)
    }
}

/// Policies compare equal when they differ only in whitespace.
fn same_policy(current: &str, desired: &str) -> bool {
    current.split_whitespace().eq(desired.split_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{BackendCall, MemoryBackend};

    #[test]
    fn test_same_policy_ignores_whitespace() {
        assert!(same_policy(
            "length = 20\n\nrule \"charset\" {\n  charset = \"ab\"\n}\n",
            "length = 20 rule \"charset\" { charset = \"ab\" }"
        ));
        assert!(!same_policy("length = 20", "length = 21"));
    }

    #[tokio::test]
    async fn test_reconcile_outcomes() {
        let backend = Arc::new(MemoryBackend::new());
        let service = PasswordPolicyService::new(backend.clone());
        let policy = PasswordPolicy::with_charset("strong", 20, "abcdef");

        assert_eq!(service.reconcile(&policy).await.unwrap(), ReconcileOutcome::Created);
        assert_eq!(service.reconcile(&policy).await.unwrap(), ReconcileOutcome::Unchanged);

        let changed = PasswordPolicy::with_charset("strong", 24, "abcdef");
        assert_eq!(service.reconcile(&changed).await.unwrap(), ReconcileOutcome::Updated);
        assert!(backend.policy("strong").await.unwrap().starts_with("length = 24"));

        let writes = backend
            .calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, BackendCall::WritePasswordPolicy { .. }))
            .count();
        assert_eq!(writes, 2);
    }
}
