//! Manifest discovery on disk and manifest error reporting

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vault_reconcile::config::DispatchConfig;
use vault_reconcile::domain::ResourceKind;
use vault_reconcile::manifest::{self, ManifestSource};
use vault_reconcile::observability::Outcome;
use vault_reconcile::secrets::MemoryBackend;
use vault_reconcile::{Dispatcher, Error};

const POLICY: &str = "kind: PasswordPolicy
spec:
  path: strong
  policy_params:
    length: 20
    rules:
      - charset: abcdefghijklmnopqrstuvwxyz0123456789
";

const PASSWORD: &str = "kind: Password
spec:
  secret_engine: secret
  path: db/admin
  secret_keys:
    secret_key: password
  policy_path: strong
";

const ROOT_AND_INTERMEDIATE: &str = "kind: Issuer
spec:
  secret_engine: pki_int
  csr_params:
    common_name: int.example.com
    type: internal
    issuer_name: int
  issuance_params:
    issuer_ref:
      secret_engine: pki
      issuer_name: root
---
kind: Issuer
spec:
  secret_engine: pki
  csr_params:
    common_name: root.example.com
    type: internal
    issuer_name: root
";

const MOUNTS_AND_ROLE: &str = "kind: PKIRole
spec:
  secret_engine: pki_int
  name: web
  role_params:
    issuer_ref: int
    allowed_domains: [example.com]
    allow_subdomains: true
    max_ttl: 72h
---
kind: SecretsEngine
spec:
  path: pki_int
  engine:
    type: pki
    config:
      max_lease_ttl: 43800h
---
kind: SecretsEngine
spec:
  path: pki
  engine:
    type: pki
    description: offline root
";

fn write(dir: &Path, relative: &str, content: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn manifest_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "10-policy.yaml", POLICY);
    write(dir.path(), "20-password.yml", PASSWORD);
    write(dir.path(), "README.md", "not a manifest");
    write(dir.path(), "pki/issuers.yaml", ROOT_AND_INTERMEDIATE);
    dir
}

#[test]
fn test_directory_without_recursion_reads_top_level_manifests_only() {
    let dir = manifest_tree();

    let sources = manifest::resolve_sources(&[dir.path().to_path_buf()], false).unwrap();

    assert_eq!(
        sources,
        vec![
            ManifestSource::File(dir.path().join("10-policy.yaml")),
            ManifestSource::File(dir.path().join("20-password.yml")),
        ]
    );
}

#[test]
fn test_recursive_directory_includes_nested_manifests() {
    let dir = manifest_tree();

    let resources = manifest::load(&[dir.path().to_path_buf()], true).unwrap();

    let kinds: Vec<ResourceKind> = resources.iter().map(|resource| resource.kind()).collect();
    assert_eq!(
        kinds,
        vec![ResourceKind::PasswordPolicy, ResourceKind::Password, ResourceKind::Issuer, ResourceKind::Issuer]
    );
}

#[test]
fn test_missing_path_is_manifest_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.yaml");

    let err = manifest::load(&[missing.clone()], false).unwrap_err();

    match &err {
        Error::Manifest { file, .. } => assert_eq!(file, &missing),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.exit_code(), 64);
}

#[test]
fn test_directory_without_manifests_is_rejected() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "notes.txt", "nothing here");

    let err = manifest::load(&[dir.path().to_path_buf()], true).unwrap_err();

    assert!(err.to_string().contains("no .yaml or .yml manifests found"));
    assert_eq!(err.exit_code(), 64);
}

#[test]
fn test_invalid_document_names_its_file() {
    let dir = TempDir::new().unwrap();
    let bad = write(dir.path(), "bad.yaml", "kind: Password\nspec:\n  secret_engine: secret\n");

    let err = manifest::load(&[bad.clone()], false).unwrap_err();

    assert!(err.to_string().contains(&bad.display().to_string()));
    assert!(err.to_string().contains("document 1 (Password)"));
    assert_eq!(err.exit_code(), 64);
}

#[test]
fn test_validation_failure_is_reported_as_manifest_error() {
    let dir = TempDir::new().unwrap();
    let short = write(dir.path(), "short.yaml", &POLICY.replace("length: 20", "length: 2"));

    let err = manifest::load(&[short], false).unwrap_err();

    assert!(err.to_string().contains("length must be between 4 and 100"));
    assert_eq!(err.exit_code(), 64);
}

#[tokio::test]
async fn test_manifest_tree_reconciles_end_to_end() {
    let dir = manifest_tree();
    let resources = manifest::load(&[dir.path().to_path_buf()], true).unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, _processors) = Dispatcher::for_backend(backend.clone(), &DispatchConfig::default());

    let report = dispatcher.dispatch(resources).await.unwrap();

    assert_eq!(report.count(Outcome::Created), 4);
    assert_eq!(report.paths(ResourceKind::Password, Outcome::Created), vec!["secret/db/admin".to_string()]);
    assert!(backend.secret("secret", "db/admin", "password").await.is_some());
    assert_eq!(backend.issuer_names("pki_int").await, vec!["int".to_string()]);
}

#[tokio::test]
async fn test_mounts_issuers_and_role_reconcile_from_manifests() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "00-mounts-and-role.yaml", MOUNTS_AND_ROLE);
    write(dir.path(), "pki/issuers.yaml", ROOT_AND_INTERMEDIATE);
    let resources = manifest::load(&[dir.path().to_path_buf()], true).unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, _processors) =
        Dispatcher::for_backend(backend.clone(), &DispatchConfig::default());

    let report = dispatcher.dispatch(resources).await.unwrap();

    let mut engines = report.paths(ResourceKind::SecretsEngine, Outcome::Created);
    engines.sort();
    assert_eq!(engines, vec!["pki".to_string(), "pki_int".to_string()]);
    assert_eq!(
        report.paths(ResourceKind::PkiRole, Outcome::Created),
        vec!["pki_int/roles/web".to_string()]
    );

    let role = backend.role("pki_int", "web").await.unwrap();
    assert_eq!(role["issuer_ref"], "int");
    assert_eq!(role["max_ttl"], 259_200);
    assert_eq!(backend.mount("pki").await.unwrap().description, "offline root");
}
