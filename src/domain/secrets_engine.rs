//! Secrets engine mount declarations.
//!
//! A secrets engine is enabled at `sys/mounts/{path}`. Tunable settings are kept in
//! step with the declaration on every apply; the engine type of an existing mount is
//! never changed. KV v2 mounts may additionally declare their engine-wide config.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ttl::Ttl;
use crate::dependency::{Identified, NodeKey};
use crate::errors::{Error, Result};

/// Vault path secrets engines are mounted under
pub const SECRETS_ENGINE_MOUNT: &str = "sys/mounts";

/// Top-level paths Vault reserves for itself
const RESERVED_MOUNTS: [&str; 4] = ["sys", "auth", "identity", "cubbyhole"];

/// Graph identity of the secrets engine mounted at `path`.
pub fn engine_node_key(path: &str) -> NodeKey {
    NodeKey::from_segments([SECRETS_ENGINE_MOUNT, path])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingVisibility {
    Hidden,
    Unauth,
}

impl ListingVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Unauth => "unauth",
        }
    }
}

/// Mount settings Vault lets you tune after the engine is enabled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountTune {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_lease_ttl: Option<Ttl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lease_ttl: Option<Ttl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_visibility: Option<ListingVisibility>,
}

impl MountTune {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Engine-wide settings of a KV v2 mount
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KvConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_versions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_version_after: Option<Ttl>,
}

impl KvConfig {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EngineParams {
    /// Engine type, `kv-v2` for a versioned KV store
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "engine type cannot be empty"))]
    pub engine_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal_wrap: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_entropy_access: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "MountTune::is_empty")]
    pub config: MountTune,

    #[serde(default, skip_serializing_if = "KvConfig::is_empty")]
    pub kv: KvConfig,
}

impl EngineParams {
    pub fn new<T: Into<String>>(engine_type: T) -> Self {
        Self {
            engine_type: engine_type.into(),
            description: None,
            local: None,
            seal_wrap: None,
            external_entropy_access: None,
            options: BTreeMap::new(),
            config: MountTune::default(),
            kv: KvConfig::default(),
        }
    }

    /// Whether the mount is a versioned KV store, by type alias or `version` option
    pub fn is_kv_v2(&self) -> bool {
        self.engine_type == "kv-v2"
            || (self.engine_type == "kv"
                && self.options.get("version").map(String::as_str) == Some("2"))
    }

    /// Whether an existing mount reporting `remote_type` and `remote_options` is this engine.
    ///
    /// Vault reports `kv-v2` mounts as type `kv` with `version = "2"`.
    pub fn matches_type(
        &self,
        remote_type: &str,
        remote_options: &BTreeMap<String, String>,
    ) -> bool {
        if self.engine_type == "kv-v2" {
            return remote_type == "kv"
                && remote_options.get("version").map(String::as_str) == Some("2");
        }
        self.engine_type == remote_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SecretsEngineSpec {
    /// Mount path, without the `sys/mounts/` prefix
    #[validate(length(min = 1, message = "path cannot be empty"))]
    pub path: String,

    #[validate(nested)]
    pub engine: EngineParams,
}

/// A declared secrets engine mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SecretsEngine {
    #[validate(nested)]
    pub spec: SecretsEngineSpec,
}

impl SecretsEngine {
    pub fn new(spec: SecretsEngineSpec) -> Self {
        Self { spec }
    }

    pub fn mount<P: Into<String>, T: Into<String>>(path: P, engine_type: T) -> Self {
        Self::new(SecretsEngineSpec { path: path.into(), engine: EngineParams::new(engine_type) })
    }

    /// Normalized mount path
    pub fn absolute_path(&self) -> String {
        NodeKey::from_path(&self.spec.path).to_string()
    }

    pub fn check(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;

        let path = self.absolute_path();
        let top = path.split('/').next().unwrap_or_default();
        if RESERVED_MOUNTS.contains(&top) {
            return Err(Error::validation(format!(
                "SecretsEngine '{}' cannot be mounted under reserved path '{}/'",
                path, top
            )));
        }
        if !self.spec.engine.kv.is_empty() && !self.spec.engine.is_kv_v2() {
            return Err(Error::validation(format!(
                "SecretsEngine '{}' declares kv settings but is not a kv-v2 engine",
                path
            )));
        }
        Ok(())
    }
}

impl Identified for SecretsEngine {
    fn node_key(&self) -> NodeKey {
        engine_node_key(&self.spec.path)
    }
}
