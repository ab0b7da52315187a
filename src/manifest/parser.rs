//! YAML manifest documents to typed resources.

use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;

use crate::domain::{Resource, ResourceKind};
use crate::errors::{Error, Result};

/// Parse every document of one manifest file.
///
/// Documents are numbered from 1 in error messages. Empty documents are skipped. Each
/// resource is validated before it is returned.
pub fn parse_documents(file: &Path, content: &str) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();

    for (idx, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let number = idx + 1;
        let value = Value::deserialize(document).map_err(|e| {
            Error::manifest(file, format!("document {}: invalid YAML: {}", number, e))
        })?;

        if let Some(resource) = parse_document(file, number, value)? {
            resources.push(resource);
        }
    }

    tracing::debug!(file = %file.display(), resources = resources.len(), "Parsed manifest");
    Ok(resources)
}

fn parse_document(file: &Path, number: usize, value: Value) -> Result<Option<Resource>> {
    let mapping = match &value {
        Value::Null => return Ok(None),
        Value::Mapping(mapping) if mapping.is_empty() => return Ok(None),
        Value::Mapping(mapping) => mapping,
        _ => return Err(Error::manifest(file, format!("document {}: expected a mapping", number))),
    };

    let kind = match mapping.get("kind") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => {
            let message = format!("document {}: 'kind' must be a string", number);
            return Err(Error::manifest(file, message));
        }
        None => return Err(Error::manifest(file, format!("document {}: missing 'kind'", number))),
    };

    if ResourceKind::parse(&kind).is_none() {
        let supported: Vec<&str> = ResourceKind::ALL.iter().map(ResourceKind::as_str).collect();
        return Err(Error::manifest(
            file,
            format!(
                "document {}: unsupported kind '{}' (expected one of {})",
                number,
                kind,
                supported.join(", ")
            ),
        ));
    }

    let resource: Resource = serde_yaml::from_value(value)
        .map_err(|e| Error::manifest(file, format!("document {} ({}): {}", number, kind, e)))?;

    resource
        .check()
        .map_err(|e| Error::manifest(file, format!("document {} ({}): {}", number, kind, e)))?;
    Ok(Some(resource))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
kind: PasswordPolicy
spec:
  path: strong
  policy_params:
    length: 20
    rules:
      - charset: abcdefghijklmnopqrstuvwxyz
        min_chars: 1
---
kind: Password
spec:
  secret_engine: secret
  path: db/admin
  secret_keys:
    secret_key: password
  policy_path: strong
---
---
kind: Issuer
spec:
  secret_engine: pki_int
  csr_params:
    common_name: int.example.com
    type: internal
    issuer_name: intermediate
  issuance_params:
    issuer_ref:
      secret_engine: pki
      issuer_name: root
"#;

    #[test]
    fn test_parse_multi_document_manifest() {
        let resources = parse_documents(Path::new("all.yaml"), MANIFEST).unwrap();

        let kinds: Vec<ResourceKind> = resources.iter().map(Resource::kind).collect();
        assert_eq!(kinds, vec![ResourceKind::PasswordPolicy, ResourceKind::Password, ResourceKind::Issuer]);
        assert_eq!(resources[2].absolute_path(), "pki_int/intermediate");
    }

    #[test]
    fn test_missing_kind_names_document() {
        let content = "kind: PasswordPolicy\nspec:\n  path: strong\n  policy_params:\n    length: 20\n    rules:\n      - charset: abc\n---\nspec: {}\n";
        let err = parse_documents(Path::new("bad.yaml"), content).unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
        assert!(err.to_string().contains("document 2: missing 'kind'"));

        let err = parse_documents(Path::new("bad.yaml"), "spec:\n  path: x\n").unwrap_err();
        assert_eq!(err.to_string(), "Invalid manifest 'bad.yaml': document 1: missing 'kind'");
    }

    #[test]
    fn test_unsupported_kind() {
        let err = parse_documents(Path::new("bad.yaml"), "kind: SecretEngine\nspec: {}\n").unwrap_err();
        assert!(err.to_string().contains("unsupported kind 'SecretEngine'"));
        assert_eq!(err.exit_code(), 64);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let content = "kind: PasswordPolicy\nspec:\n  path: strong\n  colour: red\n  policy_params:\n    length: 20\n    rules:\n      - charset: abc\n";
        let err = parse_documents(Path::new("bad.yaml"), content).unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_validation_failure_is_manifest_error() {
        let content = "kind: PasswordPolicy\nspec:\n  path: strong\n  policy_params:\n    length: 2\n    rules:\n      - charset: abc\n";
        let err = parse_documents(Path::new("short.yaml"), content).unwrap_err();

        assert!(matches!(err, Error::Manifest { .. }));
        assert!(err.to_string().contains("length must be between 4 and 100"));
    }
}
