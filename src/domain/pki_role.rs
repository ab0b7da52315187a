//! PKI role declarations.
//!
//! A role is written to `{secret_engine}/roles/{name}` and can only be written once its
//! mount exists. A role that names an `issuer_ref` also waits for that issuer, which
//! lives in the same mount.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::secrets_engine::engine_node_key;
use super::ttl::Ttl;
use crate::dependency::{Identified, NodeKey};
use crate::errors::{Error, Result};

/// Issuer reference Vault resolves to the mount's current default issuer
pub const DEFAULT_ISSUER: &str = "default";

/// Role settings passed through to Vault; unset fields keep Vault's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Ttl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<Ttl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_localhost: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_bare_domains: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_subdomains: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_glob_domains: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_any_name: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_hostnames: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_ip_sans: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_key_usage: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ou: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_cn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_lease: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PkiRoleSpec {
    /// PKI mount the role is written to
    #[validate(length(min = 1, message = "secret_engine cannot be empty"))]
    pub secret_engine: String,

    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,

    #[serde(default)]
    pub role_params: RoleParams,
}

/// A declared PKI role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PkiRole {
    #[validate(nested)]
    pub spec: PkiRoleSpec,
}

impl PkiRole {
    pub fn new(spec: PkiRoleSpec) -> Self {
        Self { spec }
    }

    /// A role in `secret_engine` issuing from `issuer_ref`.
    pub fn issuing_from<M, N, I>(secret_engine: M, name: N, issuer_ref: I) -> Self
    where
        M: Into<String>,
        N: Into<String>,
        I: Into<String>,
    {
        Self::new(PkiRoleSpec {
            secret_engine: secret_engine.into(),
            name: name.into(),
            role_params: RoleParams {
                issuer_ref: Some(issuer_ref.into()),
                ..RoleParams::default()
            },
        })
    }

    /// `{secret_engine}/roles/{name}`
    pub fn absolute_path(&self) -> String {
        NodeKey::from_segments([self.spec.secret_engine.as_str(), "roles", &self.spec.name])
            .to_string()
    }

    /// Normalized mount path
    pub fn mount(&self) -> String {
        NodeKey::from_path(&self.spec.secret_engine).to_string()
    }

    /// The issuer this role names, unless it defers to the mount's default issuer
    pub fn issuer_name(&self) -> Option<&str> {
        self.spec
            .role_params
            .issuer_ref
            .as_deref()
            .filter(|issuer| *issuer != DEFAULT_ISSUER)
    }

    /// Graph identity of the mount the role is written to
    pub fn engine_key(&self) -> NodeKey {
        engine_node_key(&self.spec.secret_engine)
    }

    /// Graph identity of the named issuer, `None` for the default issuer
    pub fn issuer_key(&self) -> Option<NodeKey> {
        self.issuer_name()
            .map(|issuer| NodeKey::from_segments([self.spec.secret_engine.as_str(), issuer]))
    }

    /// Every resource the role waits for: its mount, then its issuer if it names one
    pub fn root_keys(&self) -> Vec<NodeKey> {
        std::iter::once(self.engine_key()).chain(self.issuer_key()).collect()
    }

    pub fn check(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;

        if self.spec.name.contains('/') {
            return Err(Error::validation(format!(
                "PKIRole name '{}' cannot contain '/'",
                self.spec.name
            )));
        }
        let params = &self.spec.role_params;
        if params.issuer_ref.as_deref() == Some("") {
            return Err(Error::validation(format!(
                "PKIRole '{}' has an empty issuer_ref",
                self.absolute_path()
            )));
        }
        if let (Some(ttl), Some(max_ttl)) = (params.ttl, params.max_ttl) {
            if ttl > max_ttl {
                return Err(Error::validation(format!(
                    "PKIRole '{}' ttl {} exceeds max_ttl {}",
                    self.absolute_path(),
                    ttl,
                    max_ttl
                )));
            }
        }
        Ok(())
    }
}

impl Identified for PkiRole {
    fn node_key(&self) -> NodeKey {
        NodeKey::from_path(&self.absolute_path())
    }
}
