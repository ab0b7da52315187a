//! Secrets engine mounting and tuning.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{EngineParams, KvConfig, ResourceKind, SecretsEngine};
use crate::errors::{Error, Result};
use crate::events::ReconcileOutcome;
use crate::secrets::{BackendError, MountInfo, SecretsBackend};

/// Mounts declared secrets engines and keeps their tunable settings in step
#[derive(Clone)]
pub struct SecretsEngineService {
    backend: Arc<dyn SecretsBackend>,
}

impl SecretsEngineService {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Enable the engine when its path is free, tune it when its settings drifted.
    ///
    /// A path already holding an engine of another type is an error; the mount is
    /// never replaced.
    pub async fn reconcile(&self, engine: &SecretsEngine) -> Result<ReconcileOutcome> {
        let path = engine.absolute_path();
        let params = &engine.spec.engine;
        let tag = |e: BackendError| Error::backend(ResourceKind::SecretsEngine, path.as_str(), e);

        let Some(mount) = self.backend.read_secrets_engine(&path).await.map_err(tag)? else {
            self.backend.enable_secrets_engine(&path, params).await.map_err(tag)?;
            if !params.kv.is_empty() {
                self.backend.configure_kv(&path, &params.kv).await.map_err(tag)?;
            }
            info!(path = %path, engine_type = %params.engine_type, "Secrets engine mounted");
            return Ok(ReconcileOutcome::Created);
        };

        if !params.matches_type(&mount.engine_type, &mount.options) {
            return Err(tag(BackendError::mount_path_in_use(&path, Some(mount.engine_type))));
        }

        let mut changed = false;
        if tune_drifted(params, &mount) {
            self.backend.tune_secrets_engine(&path, params).await.map_err(tag)?;
            changed = true;
        }
        if !params.kv.is_empty() {
            let current = self.backend.read_kv_config(&path).await.map_err(tag)?;
            if kv_drifted(&params.kv, current.as_ref()) {
                self.backend.configure_kv(&path, &params.kv).await.map_err(tag)?;
                changed = true;
            }
        }

        if !changed {
            debug!(path = %path, "Secrets engine is up to date");
            return Ok(ReconcileOutcome::Unchanged);
        }
        info!(path = %path, "Secrets engine tuned");
        Ok(ReconcileOutcome::Updated)
    }
}

/// Whether a declared tunable setting differs from the mounted engine. Undeclared
/// settings are left to the backend.
fn tune_drifted(params: &EngineParams, mount: &MountInfo) -> bool {
    let config = &params.config;
    params.description.as_ref().is_some_and(|description| *description != mount.description)
        || config.default_lease_ttl.is_some_and(|ttl| ttl != mount.config.default_lease_ttl)
        || config.max_lease_ttl.is_some_and(|ttl| ttl != mount.config.max_lease_ttl)
        || config
            .listing_visibility
            .is_some_and(|visibility| visibility.as_str() != mount.config.listing_visibility)
}

fn kv_drifted(desired: &KvConfig, current: Option<&KvConfig>) -> bool {
    let Some(current) = current else {
        return true;
    };
    desired.cas_required.is_some_and(|cas| Some(cas) != current.cas_required)
        || desired.max_versions.is_some_and(|max| Some(max) != current.max_versions)
        || desired
            .delete_version_after
            .is_some_and(|after| Some(after) != current.delete_version_after)
}
