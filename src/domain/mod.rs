//! Domain layer
//!
//! Declared resources as they appear in manifests. Each kind knows its own absolute path,
//! the graph identity derived from it, and the identity of whatever it depends on.
//!
//! ## Module Organization
//!
//! - `issuer`: PKI root and intermediate issuers
//! - `password`: generated passwords stored in KV v2
//! - `password_policy`: password policies passwords are generated from
//! - `secrets_engine`: secrets engine mounts
//! - `pki_role`: PKI roles, written once their mount and issuer exist
//! - `ttl`: durations as manifests and Vault spell them

pub mod issuer;
pub mod password;
pub mod password_policy;
pub mod pki_role;
pub mod secrets_engine;
pub mod ttl;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dependency::{Identified, NodeKey};
use crate::errors::Result;

pub use issuer::{
    CsrParams, IssuanceParams, Issuer, IssuerCertType, IssuerRef, IssuerSpec, KeyType,
};
pub use password::{Password, PasswordSpec, SecretKeys, StringEncoding};
pub use password_policy::{
    policy_node_key, CharsetRule, PasswordPolicy, PasswordPolicySpec, PolicyParams,
    PASSWORD_POLICY_MOUNT,
};
pub use pki_role::{PkiRole, PkiRoleSpec, RoleParams, DEFAULT_ISSUER};
pub use secrets_engine::{
    engine_node_key, EngineParams, KvConfig, ListingVisibility, MountTune, SecretsEngine,
    SecretsEngineSpec, SECRETS_ENGINE_MOUNT,
};
pub use ttl::Ttl;

/// Resource kinds a manifest may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Password,
    PasswordPolicy,
    Issuer,
    SecretsEngine,
    #[serde(rename = "PKIRole")]
    PkiRole,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Password,
        ResourceKind::PasswordPolicy,
        ResourceKind::Issuer,
        ResourceKind::SecretsEngine,
        ResourceKind::PkiRole,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "Password",
            Self::PasswordPolicy => "PasswordPolicy",
            Self::Issuer => "Issuer",
            Self::SecretsEngine => "SecretsEngine",
            Self::PkiRole => "PKIRole",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One manifest document, discriminated by its `kind` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    Password(Password),
    PasswordPolicy(PasswordPolicy),
    Issuer(Issuer),
    SecretsEngine(SecretsEngine),
    #[serde(rename = "PKIRole")]
    PkiRole(PkiRole),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Password(_) => ResourceKind::Password,
            Resource::PasswordPolicy(_) => ResourceKind::PasswordPolicy,
            Resource::Issuer(_) => ResourceKind::Issuer,
            Resource::SecretsEngine(_) => ResourceKind::SecretsEngine,
            Resource::PkiRole(_) => ResourceKind::PkiRole,
        }
    }

    pub fn absolute_path(&self) -> String {
        match self {
            Resource::Password(password) => password.absolute_path(),
            Resource::PasswordPolicy(policy) => policy.absolute_path(),
            Resource::Issuer(issuer) => issuer.absolute_path(),
            Resource::SecretsEngine(engine) => engine.absolute_path(),
            Resource::PkiRole(role) => role.absolute_path(),
        }
    }

    /// Validate field rules and cross-field constraints.
    pub fn check(&self) -> Result<()> {
        match self {
            Resource::Password(password) => password.check(),
            Resource::PasswordPolicy(policy) => policy.check(),
            Resource::Issuer(issuer) => issuer.check(),
            Resource::SecretsEngine(engine) => engine.check(),
            Resource::PkiRole(role) => role.check(),
        }
    }
}

impl Identified for Resource {
    fn node_key(&self) -> NodeKey {
        match self {
            Resource::Password(password) => password.node_key(),
            Resource::PasswordPolicy(policy) => policy.node_key(),
            Resource::Issuer(issuer) => issuer.node_key(),
            Resource::SecretsEngine(engine) => engine.node_key(),
            Resource::PkiRole(role) => role.node_key(),
        }
    }
}

/// A resource type a processor handles on its own.
pub trait Declared: Identified + Clone + Into<Resource> + Send + Sync + 'static {
    const KIND: ResourceKind;

    /// The payload of `resource` if it is of this kind
    fn from_resource(resource: Resource) -> Option<Self>;

    /// Final path, as reported to the caller
    fn path(&self) -> String;
}

macro_rules! declared {
    ($ty:ident) => {
        impl From<$ty> for Resource {
            fn from(payload: $ty) -> Self {
                Resource::$ty(payload)
            }
        }

        impl Declared for $ty {
            const KIND: ResourceKind = ResourceKind::$ty;

            fn from_resource(resource: Resource) -> Option<Self> {
                match resource {
                    Resource::$ty(payload) => Some(payload),
                    _ => None,
                }
            }

            fn path(&self) -> String {
                self.absolute_path()
            }
        }
    };
}

declared!(Password);
declared!(PasswordPolicy);
declared!(Issuer);
declared!(SecretsEngine);
declared!(PkiRole);
