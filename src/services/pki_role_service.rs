//! PKI role reads, writes and diffing.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{PkiRole, ResourceKind};
use crate::errors::{Error, Result};
use crate::events::ReconcileOutcome;
use crate::secrets::{BackendError, SecretsBackend};

#[derive(Clone)]
pub struct PkiRoleService {
    backend: Arc<dyn SecretsBackend>,
}

impl PkiRoleService {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Write the role when it is missing or a declared field differs.
    ///
    /// Fields the declaration leaves unset are not compared, so the backend's defaults
    /// never count as drift.
    pub async fn reconcile(&self, role: &PkiRole) -> Result<ReconcileOutcome> {
        let path = role.absolute_path();
        let tag = |e: BackendError| Error::backend(ResourceKind::PkiRole, path.as_str(), e);
        let mount = role.mount();
        let params = &role.spec.role_params;

        let desired = serde_json::to_value(params).map_err(BackendError::from).map_err(tag)?;
        let Value::Object(desired) = desired else {
            return Err(Error::internal(format!("PKIRole '{}' parameters are not a map", path)));
        };

        let current = self.backend.read_pki_role(&mount, &role.spec.name).await.map_err(tag)?;
        let outcome = match current {
            None => ReconcileOutcome::Created,
            Some(current) if declared_fields_match(&desired, &current) => {
                debug!(path = %path, "PKI role is up to date");
                return Ok(ReconcileOutcome::Unchanged);
            }
            Some(_) => ReconcileOutcome::Updated,
        };

        self.backend.write_pki_role(&mount, &role.spec.name, params).await.map_err(tag)?;
        info!(path = %path, outcome = ?outcome, "PKI role written");
        Ok(outcome)
    }
}

fn declared_fields_match(desired: &Map<String, Value>, current: &Map<String, Value>) -> bool {
    desired
        .iter()
        .all(|(field, value)| current.get(field).is_some_and(|remote| same_value(value, remote)))
}

/// List fields compare as sets; Vault does not keep their order.
fn same_value(desired: &Value, remote: &Value) -> bool {
    match (desired, remote) {
        (Value::Array(desired), Value::Array(remote)) => sorted(desired) == sorted(remote),
        _ => desired == remote,
    }
}

fn sorted(values: &[Value]) -> Vec<String> {
    let mut values: Vec<String> = values.iter().map(Value::to_string).collect();
    values.sort();
    values
}
