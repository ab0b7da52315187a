//! Values exchanged with a secrets backend: the redacting wrapper for tokens and
//! generated passwords, and the reported state of mounted engines.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::Ttl;

/// A string whose contents never appear in `Debug`, `Display` or serialized output.
///
/// Used for the Vault token and for every generated password on its way from the
/// policy endpoint to the KV write. The buffer is zeroed on drop. Read the value with
/// [`SecretString::expose_secret`] only at the point it is sent to the backend.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Apply a transformation to the secret, keeping the result wrapped.
    pub fn map<F>(&self, f: F) -> SecretString
    where
        F: FnOnce(&str) -> String,
    {
        SecretString(f(&self.0))
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

/// Lease settings of a mounted engine; zero TTLs mean the system default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(default)]
    pub default_lease_ttl: Ttl,
    #[serde(default)]
    pub max_lease_ttl: Ttl,
    #[serde(default, deserialize_with = "null_as_default")]
    pub listing_visibility: String,
}

/// A mounted secrets engine as the backend reports it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    #[serde(rename = "type")]
    pub engine_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub seal_wrap: bool,
    #[serde(default)]
    pub external_entropy_access: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub config: MountConfig,
}

/// Vault reports absent maps and strings as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_password_never_leaks_through_formatting() {
        let password = SecretString::new("Zq8-generated");
        let report = serde_json::json!({ "path": "secret/db", "value": password });

        assert_eq!(format!("{:?}", password), "SecretString([REDACTED])");
        assert_eq!(password.to_string(), "[REDACTED]");
        assert_eq!(report["value"], "[REDACTED]");
        assert_eq!(password.expose_secret(), "Zq8-generated");
    }

    #[test]
    fn test_token_deserializes_from_config_value() {
        let token: SecretString = toml::from_str::<toml::Value>("token = \"s.token\"")
            .unwrap()
            .get("token")
            .cloned()
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(token.expose_secret(), "s.token");
    }

    #[test]
    fn test_mount_info_tolerates_null_options() {
        let info: MountInfo = serde_json::from_value(serde_json::json!({
            "type": "pki",
            "description": "",
            "options": null,
            "config": { "default_lease_ttl": 0, "max_lease_ttl": 315360000, "force_no_cache": false }
        }))
        .unwrap();

        assert!(info.options.is_empty());
        assert_eq!(info.config.max_lease_ttl, Ttl::from_secs(315_360_000));
        assert_eq!(info.config.listing_visibility, "");
    }

    #[test]
    fn test_map_keeps_value_wrapped() {
        let secret = SecretString::new("abc");
        let upper = secret.map(|value| value.to_uppercase());

        assert_eq!(upper.expose_secret(), "ABC");
        assert_eq!(format!("{:?}", upper), "SecretString([REDACTED])");
    }
}
