//! Password policy declarations.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dependency::{Identified, NodeKey};
use crate::errors::{Error, Result};

/// Vault path password policies live under
pub const PASSWORD_POLICY_MOUNT: &str = "sys/policies/password";

/// Graph identity of the password policy called `name`.
///
/// Policies are keyed by their full Vault path so they never share a key with a KV
/// secret that happens to use the same relative path.
pub fn policy_node_key(name: &str) -> NodeKey {
    NodeKey::from_segments([PASSWORD_POLICY_MOUNT, name])
}

/// Characters a generated password draws from, with an optional minimum count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CharsetRule {
    #[validate(length(min = 1, message = "charset cannot be empty"))]
    pub charset: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_chars: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PolicyParams {
    #[validate(range(min = 4, max = 100, message = "length must be between 4 and 100"))]
    pub length: u32,

    #[validate(length(min = 1, message = "at least one rule is required"), nested)]
    pub rules: Vec<CharsetRule>,
}

impl PolicyParams {
    /// Render the policy in Vault's HCL password policy syntax.
    pub fn to_hcl(&self) -> String {
        let mut hcl = format!("length = {}\n", self.length);
        for rule in &self.rules {
            hcl.push_str("\nrule \"charset\" {\n");
            hcl.push_str(&format!("  charset = \"{}\"\n", escape_hcl(&rule.charset)));
            if let Some(min_chars) = rule.min_chars {
                hcl.push_str(&format!("  min-chars = {}\n", min_chars));
            }
            hcl.push_str("}\n");
        }
        hcl
    }
}

fn escape_hcl(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PasswordPolicySpec {
    #[validate(length(min = 1, message = "path cannot be empty"))]
    pub path: String,

    #[validate(nested)]
    pub policy_params: PolicyParams,
}

/// A declared password policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PasswordPolicy {
    #[validate(nested)]
    pub spec: PasswordPolicySpec,
}

impl PasswordPolicy {
    pub fn new(spec: PasswordPolicySpec) -> Self {
        Self { spec }
    }

    /// A policy of `length` characters drawn from a single charset.
    pub fn with_charset<P, C>(path: P, length: u32, charset: C) -> Self
    where
        P: Into<String>,
        C: Into<String>,
    {
        Self::new(PasswordPolicySpec {
            path: path.into(),
            policy_params: PolicyParams {
                length,
                rules: vec![CharsetRule { charset: charset.into(), min_chars: None }],
            },
        })
    }

    pub fn absolute_path(&self) -> String {
        NodeKey::from_path(&self.spec.path).to_string()
    }

    pub fn check(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)
    }
}

impl Identified for PasswordPolicy {
    fn node_key(&self) -> NodeKey {
        policy_node_key(&self.spec.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hcl_rendering() {
        let params = PolicyParams {
            length: 20,
            rules: vec![
                CharsetRule { charset: "abcdefghijklmnopqrstuvwxyz".into(), min_chars: Some(1) },
                CharsetRule { charset: "0123456789\"".into(), min_chars: None },
            ],
        };

        assert_eq!(
            params.to_hcl(),
            "length = 20\n\
             \nrule \"charset\" {\n  charset = \"abcdefghijklmnopqrstuvwxyz\"\n  min-chars = 1\n}\n\
             \nrule \"charset\" {\n  charset = \"0123456789\\\"\"\n}\n"
        );
    }

    #[test]
    fn test_policy_identity_is_vault_qualified() {
        let policy = PasswordPolicy::with_charset("/secret//db/", 12, "ab");

        assert_eq!(policy.absolute_path(), "secret/db");
        assert_eq!(policy.node_key().as_str(), "sys/policies/password/secret/db");
        assert_eq!(policy.node_key(), policy_node_key("secret/db"));
    }

    #[test]
    fn test_length_bounds() {
        assert!(PasswordPolicy::with_charset("p", 4, "ab").check().is_ok());
        assert!(PasswordPolicy::with_charset("p", 100, "ab").check().is_ok());

        let err = PasswordPolicy::with_charset("p", 3, "ab").check().unwrap_err();
        assert!(err.to_string().contains("length must be between 4 and 100"));
        assert!(PasswordPolicy::with_charset("p", 101, "ab").check().is_err());
    }

    #[test]
    fn test_rules_required_and_charset_non_empty() {
        let mut policy = PasswordPolicy::with_charset("p", 10, "ab");
        policy.spec.policy_params.rules.clear();
        assert!(policy.check().unwrap_err().to_string().contains("at least one rule is required"));

        let policy = PasswordPolicy::with_charset("p", 10, "");
        assert!(policy.check().unwrap_err().to_string().contains("charset cannot be empty"));
    }
}
