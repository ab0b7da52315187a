//! PKI issuer declarations.
//!
//! An issuer without issuance parameters is a self-signed root generated in its own
//! mount. An issuer with issuance parameters is an intermediate whose CSR is signed by
//! the issuer named in `issuance_params.issuer_ref`, which therefore has to exist first.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dependency::{Identified, NodeKey};
use crate::errors::{Error, Result};

/// How Vault should source the issuer's key material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerCertType {
    Internal,
    Exported,
    Existing,
    Kms,
}

impl IssuerCertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Exported => "exported",
            Self::Existing => "existing",
            Self::Kms => "kms",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Rsa,
    Ed25519,
    Ec,
}

/// Certificate signing request parameters shared by root and intermediate issuers.
///
/// Optional fields are passed through to Vault untouched and omitted when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CsrParams {
    #[validate(length(min = 1, message = "common_name cannot be empty"))]
    pub common_name: String,

    #[serde(rename = "type")]
    pub cert_type: IssuerCertType,

    /// Name the issuer is registered under in its mount
    #[validate(length(min = 1, message = "issuer_name cannot be empty"))]
    pub issuer_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_sans: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri_sans: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_sans: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_path_length: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_cn_from_sans: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permitted_dns_domains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ou: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<KeyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_basic_constraints: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_key_id: Option<String>,
}

impl CsrParams {
    /// Minimal parameters for an internally keyed issuer.
    pub fn new<C: Into<String>, N: Into<String>>(common_name: C, issuer_name: N) -> Self {
        Self {
            common_name: common_name.into(),
            cert_type: IssuerCertType::Internal,
            issuer_name: issuer_name.into(),
            alt_names: None,
            ip_sans: None,
            uri_sans: None,
            other_sans: None,
            ttl: None,
            max_path_length: None,
            exclude_cn_from_sans: None,
            permitted_dns_domains: None,
            ou: None,
            organization: None,
            country: None,
            locality: None,
            province: None,
            street_address: None,
            postal_code: None,
            serial_number: None,
            not_before_duration: None,
            not_after: None,
            key_name: None,
            key_ref: None,
            key_type: None,
            key_bits: None,
            add_basic_constraints: None,
            managed_key_name: None,
            managed_key_id: None,
        }
    }
}

/// Reference to the issuer that signs an intermediate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IssuerRef {
    #[validate(length(min = 1, message = "issuer_ref.secret_engine cannot be empty"))]
    pub secret_engine: String,
    #[validate(length(min = 1, message = "issuer_ref.issuer_name cannot be empty"))]
    pub issuer_name: String,
}

impl IssuerRef {
    pub fn absolute_path(&self) -> String {
        format!("{}/{}", self.secret_engine, self.issuer_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IssuanceParams {
    #[validate(nested)]
    pub issuer_ref: IssuerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_bits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_pss: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IssuerSpec {
    /// PKI mount the issuer lives in
    #[validate(length(min = 1, message = "secret_engine cannot be empty"))]
    pub secret_engine: String,

    #[validate(nested)]
    pub csr_params: CsrParams,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub issuance_params: Option<IssuanceParams>,
}

/// A declared PKI issuer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Issuer {
    #[validate(nested)]
    pub spec: IssuerSpec,
}

impl Issuer {
    pub fn new(spec: IssuerSpec) -> Self {
        Self { spec }
    }

    /// A self-signed root issuer with default CSR parameters.
    pub fn root<M: Into<String>, N: Into<String>>(secret_engine: M, issuer_name: N) -> Self {
        let issuer_name = issuer_name.into();
        Self::new(IssuerSpec {
            secret_engine: secret_engine.into(),
            csr_params: CsrParams::new(format!("{}.example.com", issuer_name), issuer_name),
            issuance_params: None,
        })
    }

    /// An intermediate issuer signed by `signer_engine/signer_name`.
    pub fn intermediate<M, N, SM, SN>(
        secret_engine: M,
        issuer_name: N,
        signer_engine: SM,
        signer_name: SN,
    ) -> Self
    where
        M: Into<String>,
        N: Into<String>,
        SM: Into<String>,
        SN: Into<String>,
    {
        let mut issuer = Self::root(secret_engine, issuer_name);
        issuer.spec.issuance_params = Some(IssuanceParams {
            issuer_ref: IssuerRef {
                secret_engine: signer_engine.into(),
                issuer_name: signer_name.into(),
            },
            signature_bits: None,
            skid: None,
            use_pss: None,
        });
        issuer
    }

    /// `{secret_engine}/{issuer_name}`
    pub fn absolute_path(&self) -> String {
        format!("{}/{}", self.spec.secret_engine, self.spec.csr_params.issuer_name)
    }

    /// Path of the signing issuer, `None` for a root
    pub fn issuer_ref_path(&self) -> Option<String> {
        self.spec.issuance_params.as_ref().map(|params| params.issuer_ref.absolute_path())
    }

    /// Graph identity of the signing issuer, `None` for a root
    pub fn root_key(&self) -> Option<NodeKey> {
        self.issuer_ref_path().map(|path| NodeKey::from_path(&path))
    }

    pub fn is_intermediate(&self) -> bool {
        self.spec.issuance_params.is_some()
    }

    /// Field rules plus the checks validator cannot express.
    pub fn check(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;

        if self.root_key().as_ref() == Some(&self.node_key()) {
            return Err(Error::validation(format!(
                "Issuer '{}' cannot be signed by itself",
                self.absolute_path()
            )));
        }
        Ok(())
    }
}

impl Identified for Issuer {
    fn node_key(&self) -> NodeKey {
        NodeKey::from_path(&self.absolute_path())
    }
}
