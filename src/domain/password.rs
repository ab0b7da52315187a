//! Generated password declarations stored in a KV v2 secret.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::password_policy::policy_node_key;
use crate::dependency::{Identified, NodeKey};
use crate::errors::{Error, Result};

/// Encoding applied to a generated password before it is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringEncoding {
    #[default]
    Utf8,
    Base64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SecretKeys {
    /// Key inside the KV secret the password is written under
    #[validate(length(min = 1, message = "secret_key cannot be empty"))]
    pub secret_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PasswordSpec {
    /// KV v2 mount
    #[validate(length(min = 1, message = "secret_engine cannot be empty"))]
    pub secret_engine: String,

    /// Secret path inside the mount
    #[validate(length(min = 1, message = "path cannot be empty"))]
    pub path: String,

    #[validate(nested)]
    pub secret_keys: SecretKeys,

    /// Password policy used to generate the value
    #[validate(length(min = 1, message = "policy_path cannot be empty"))]
    pub policy_path: String,

    /// Check-and-set version for the write, unset to write unconditionally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas: Option<u64>,

    #[serde(default)]
    pub encoding: StringEncoding,
}

/// A declared password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Password {
    #[validate(nested)]
    pub spec: PasswordSpec,
}

impl Password {
    pub fn new(spec: PasswordSpec) -> Self {
        Self { spec }
    }

    /// A utf8 password under `secret_key` without a CAS constraint.
    pub fn simple<M, P, K, Y>(secret_engine: M, path: P, secret_key: K, policy_path: Y) -> Self
    where
        M: Into<String>,
        P: Into<String>,
        K: Into<String>,
        Y: Into<String>,
    {
        Self::new(PasswordSpec {
            secret_engine: secret_engine.into(),
            path: path.into(),
            secret_keys: SecretKeys { secret_key: secret_key.into() },
            policy_path: policy_path.into(),
            cas: None,
            encoding: StringEncoding::Utf8,
        })
    }

    /// `{secret_engine}/{path}`
    pub fn absolute_path(&self) -> String {
        format!("{}/{}", self.spec.secret_engine, self.spec.path)
    }

    /// Name of the password policy this password is generated from, slashes trimmed
    pub fn policy_name(&self) -> String {
        NodeKey::from_path(&self.spec.policy_path).to_string()
    }

    /// Graph identity of the password policy this password is generated from
    pub fn policy_key(&self) -> NodeKey {
        policy_node_key(&self.spec.policy_path)
    }

    pub fn check(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)
    }
}

impl Identified for Password {
    fn node_key(&self) -> NodeKey {
        NodeKey::from_path(&self.absolute_path())
    }
}
