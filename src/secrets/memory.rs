//! In-memory secrets backend.
//!
//! Keeps mounts, issuers, roles, password policies and KV secrets in process memory and
//! records every call in order, so tests can assert on what the engine asked for and
//! when. Failures can be injected per resource path. The permissive mode backs
//! `apply --dry-run`: it also accepts references to mounts, issuers and policies it has
//! never seen, assuming they already exist outside the manifest.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;

use super::client::SecretsBackend;
use super::error::{BackendError, Result};
use super::types::{MountConfig, MountInfo, SecretString};
use crate::domain::{
    CsrParams, EngineParams, IssuanceParams, IssuerRef, KvConfig, RoleParams, DEFAULT_ISSUER,
    SECRETS_ENGINE_MOUNT,
};

const DEFAULT_PASSWORD_LENGTH: usize = 20;
const DEFAULT_CHARSET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A backend request, as recorded by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    GenerateRootIssuer { mount: String, issuer_name: String },
    GenerateIntermediateCsr { mount: String, issuer_name: String },
    SignIntermediate { signer: String },
    SetSignedIntermediate { mount: String },
    UpdateIssuer { mount: String, issuer_name: String },
    ReadPasswordPolicy { path: String },
    WritePasswordPolicy { path: String },
    GeneratePassword { policy_path: String },
    WriteKvSecret { path: String, key: String, cas: Option<u64> },
    ReadKvSecret { path: String },
    ReadSecretsEngine { path: String },
    EnableSecretsEngine { path: String, engine_type: String },
    TuneSecretsEngine { path: String },
    ReadKvConfig { mount: String },
    ConfigureKv { mount: String },
    ReadPkiRole { mount: String, name: String },
    WritePkiRole { mount: String, name: String },
}

impl BackendCall {
    /// Resource path the call acts on; injected failures are matched against it.
    pub fn path(&self) -> String {
        match self {
            Self::GenerateRootIssuer { mount, issuer_name }
            | Self::GenerateIntermediateCsr { mount, issuer_name }
            | Self::UpdateIssuer { mount, issuer_name } => format!("{}/{}", mount, issuer_name),
            Self::SignIntermediate { signer } => signer.clone(),
            Self::SetSignedIntermediate { mount } => mount.clone(),
            Self::ReadPasswordPolicy { path } | Self::WritePasswordPolicy { path } => path.clone(),
            Self::GeneratePassword { policy_path } => policy_path.clone(),
            Self::WriteKvSecret { path, .. } | Self::ReadKvSecret { path } => path.clone(),
            Self::ReadSecretsEngine { path }
            | Self::EnableSecretsEngine { path, .. }
            | Self::TuneSecretsEngine { path } => format!("{}/{}", SECRETS_ENGINE_MOUNT, path),
            Self::ReadKvConfig { mount } | Self::ConfigureKv { mount } => {
                format!("{}/config", mount)
            }
            Self::ReadPkiRole { mount, name } | Self::WritePkiRole { mount, name } => {
                role_path(mount, name)
            }
        }
    }
}

/// Failure to return for calls on a given path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    NotFound,
    Rejected(String),
    ConnectionFailed(String),
}

impl InjectedFailure {
    fn to_error(&self, path: &str) -> BackendError {
        match self {
            Self::NotFound => BackendError::not_found(path),
            Self::Rejected(message) => BackendError::rejected(400, message.clone()),
            Self::ConnectionFailed(message) => BackendError::connection_failed(message.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredIssuer {
    id: String,
    name: Option<String>,
}

impl StoredIssuer {
    fn named(name: &str) -> Self {
        Self { id: uuid::Uuid::new_v4().to_string(), name: Some(name.to_string()) }
    }
}

#[derive(Debug, Clone)]
struct StoredSecret {
    version: u64,
    data: HashMap<String, SecretString>,
}

fn role_path(mount: &str, name: &str) -> String {
    format!("{}/roles/{}", mount, name)
}

/// The mount Vault would report after enabling `params`; `kv-v2` is a versioned `kv`.
fn mounted(params: &EngineParams) -> MountInfo {
    let mut options = params.options.clone();
    let engine_type = if params.engine_type == "kv-v2" {
        options.insert("version".to_string(), "2".to_string());
        "kv".to_string()
    } else {
        params.engine_type.clone()
    };

    let mut info = MountInfo {
        engine_type,
        description: String::new(),
        local: params.local.unwrap_or(false),
        seal_wrap: params.seal_wrap.unwrap_or(false),
        external_entropy_access: params.external_entropy_access.unwrap_or(false),
        options,
        config: MountConfig::default(),
    };
    tune(&mut info, params);
    info
}

fn tune(info: &mut MountInfo, params: &EngineParams) {
    if let Some(description) = &params.description {
        info.description = description.clone();
    }
    if let Some(ttl) = params.config.default_lease_ttl {
        info.config.default_lease_ttl = ttl;
    }
    if let Some(ttl) = params.config.max_lease_ttl {
        info.config.max_lease_ttl = ttl;
    }
    if let Some(visibility) = params.config.listing_visibility {
        info.config.listing_visibility = visibility.as_str().to_string();
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    mounts: HashMap<String, MountInfo>,
    kv_configs: HashMap<String, KvConfig>,
    roles: HashMap<String, serde_json::Map<String, serde_json::Value>>,
    issuers: HashMap<String, Vec<StoredIssuer>>,
    policies: HashMap<String, String>,
    secrets: HashMap<String, StoredSecret>,
    calls: Vec<BackendCall>,
    failures: HashMap<String, InjectedFailure>,
}

impl MemoryState {
    fn issuer_mut(&mut self, mount: &str, reference: &str) -> Option<&mut StoredIssuer> {
        self.issuers
            .get_mut(mount)?
            .iter_mut()
            .find(|issuer| issuer.id == reference || issuer.name.as_deref() == Some(reference))
    }

    fn issuer_exists(&self, mount: &str, name: &str) -> bool {
        self.issuers
            .get(mount)
            .is_some_and(|issuers| {
                issuers.iter().any(|issuer| issuer.name.as_deref() == Some(name))
            })
    }
}

/// Secrets backend held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    permissive: bool,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that treats unknown signing issuers and policies as pre-existing.
    pub fn permissive() -> Self {
        Self { permissive: true, ..Self::default() }
    }

    /// Delay every call, so concurrent calls overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seed an issuer that exists before reconciliation starts.
    pub fn with_existing_issuer(mut self, mount: &str, issuer_name: &str) -> Self {
        self.state
            .get_mut()
            .issuers
            .entry(mount.to_string())
            .or_default()
            .push(StoredIssuer::named(issuer_name));
        self
    }

    /// Seed a secrets engine mounted before reconciliation starts.
    pub fn with_existing_mount(mut self, path: &str, engine_type: &str) -> Self {
        let info = mounted(&EngineParams::new(engine_type));
        self.state.get_mut().mounts.insert(path.to_string(), info);
        self
    }

    /// Seed a password policy that exists before reconciliation starts.
    pub fn with_existing_policy(mut self, path: &str, policy: &str) -> Self {
        self.state.get_mut().policies.insert(path.to_string(), policy.to_string());
        self
    }

    /// Fail every call whose path is `path`.
    pub async fn fail_path(&self, path: &str, failure: InjectedFailure) {
        self.state.lock().await.failures.insert(path.to_string(), failure);
    }

    pub async fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().await.calls.clone()
    }

    /// Issuers in `mount` that carry a name, in creation order
    pub async fn issuer_names(&self, mount: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .issuers
            .get(mount)
            .map(|issuers| issuers.iter().filter_map(|issuer| issuer.name.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn mount(&self, path: &str) -> Option<MountInfo> {
        self.state.lock().await.mounts.get(path).cloned()
    }

    pub async fn kv_config(&self, mount: &str) -> Option<KvConfig> {
        self.state.lock().await.kv_configs.get(mount).cloned()
    }

    /// Stored fields of the role `name` in `mount`
    pub async fn role(
        &self,
        mount: &str,
        name: &str,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.state.lock().await.roles.get(&role_path(mount, name)).cloned()
    }

    pub async fn policy(&self, path: &str) -> Option<String> {
        self.state.lock().await.policies.get(path).cloned()
    }

    /// Current version and value of `key` in the KV secret `mount/path`
    pub async fn secret(&self, mount: &str, path: &str, key: &str) -> Option<(u64, SecretString)> {
        let state = self.state.lock().await;
        let secret = state.secrets.get(&format!("{}/{}", mount, path))?;
        secret.data.get(key).map(|value| (secret.version, value.clone()))
    }

    /// Highest number of calls observed executing at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Record the call, wait out the configured latency and apply injected failures.
    async fn enter(&self, call: BackendCall) -> Result<()> {
        let path = call.path();
        let failure = {
            let mut state = self.state.lock().await;
            state.calls.push(call);
            state.failures.get(&path).cloned()
        };

        if let Some(latency) = self.latency {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        match failure {
            Some(failure) => Err(failure.to_error(&path)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SecretsBackend for MemoryBackend {
    async fn generate_root_issuer(&self, mount: &str, params: &CsrParams) -> Result<()> {
        self.enter(BackendCall::GenerateRootIssuer {
            mount: mount.to_string(),
            issuer_name: params.issuer_name.clone(),
        })
        .await?;

        let mut state = self.state.lock().await;
        if state.issuer_exists(mount, &params.issuer_name) {
            return Err(BackendError::issuer_name_taken(&params.issuer_name, mount));
        }
        state
            .issuers
            .entry(mount.to_string())
            .or_default()
            .push(StoredIssuer::named(&params.issuer_name));
        Ok(())
    }

    async fn generate_intermediate_csr(&self, mount: &str, params: &CsrParams) -> Result<String> {
        self.enter(BackendCall::GenerateIntermediateCsr {
            mount: mount.to_string(),
            issuer_name: params.issuer_name.clone(),
        })
        .await?;

        Ok(format!(
            "-----BEGIN CERTIFICATE REQUEST-----\n{}\n-----END CERTIFICATE REQUEST-----",
            params.common_name
        ))
    }

    async fn sign_intermediate(
        &self,
        signer: &IssuerRef,
        csr: &str,
        _params: &IssuanceParams,
    ) -> Result<String> {
        self.enter(BackendCall::SignIntermediate { signer: signer.absolute_path() }).await?;

        let state = self.state.lock().await;
        if !self.permissive && !state.issuer_exists(&signer.secret_engine, &signer.issuer_name) {
            return Err(BackendError::not_found(signer.absolute_path()));
        }

        let subject = csr.lines().nth(1).unwrap_or_default();
        Ok(format!(
            "-----BEGIN CERTIFICATE-----\n{} signed by {}\n-----END CERTIFICATE-----",
            subject,
            signer.absolute_path()
        ))
    }

    async fn set_signed_intermediate(
        &self,
        mount: &str,
        _certificate: &str,
    ) -> Result<Vec<String>> {
        self.enter(BackendCall::SetSignedIntermediate { mount: mount.to_string() }).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock().await;
        let issuers = state.issuers.entry(mount.to_string()).or_default();
        issuers.push(StoredIssuer { id: id.clone(), name: None });
        Ok(vec![id])
    }

    async fn update_issuer(&self, mount: &str, issuer_ref: &str, issuer_name: &str) -> Result<()> {
        self.enter(BackendCall::UpdateIssuer {
            mount: mount.to_string(),
            issuer_name: issuer_name.to_string(),
        })
        .await?;

        let mut state = self.state.lock().await;
        if state.issuer_exists(mount, issuer_name) {
            return Err(BackendError::issuer_name_taken(issuer_name, mount));
        }
        let issuer = state
            .issuer_mut(mount, issuer_ref)
            .ok_or_else(|| BackendError::not_found(format!("{}/issuer/{}", mount, issuer_ref)))?;
        issuer.name = Some(issuer_name.to_string());
        Ok(())
    }

    async fn read_password_policy(&self, path: &str) -> Result<Option<String>> {
        self.enter(BackendCall::ReadPasswordPolicy { path: path.to_string() }).await?;
        Ok(self.state.lock().await.policies.get(path).cloned())
    }

    async fn write_password_policy(&self, path: &str, policy: &str) -> Result<()> {
        self.enter(BackendCall::WritePasswordPolicy { path: path.to_string() }).await?;
        self.state.lock().await.policies.insert(path.to_string(), policy.to_string());
        Ok(())
    }

    async fn generate_password(&self, policy_path: &str) -> Result<SecretString> {
        self.enter(BackendCall::GeneratePassword { policy_path: policy_path.to_string() }).await?;

        let policy = self.state.lock().await.policies.get(policy_path).cloned();
        match policy {
            Some(policy) => Ok(generate_from_policy(&policy)),
            None if self.permissive => Ok(generate_from_policy("")),
            None => Err(BackendError::policy_not_found(policy_path)),
        }
    }

    async fn write_kv_secret(
        &self,
        mount: &str,
        path: &str,
        key: &str,
        value: &SecretString,
        cas: Option<u64>,
    ) -> Result<()> {
        let full_path = format!("{}/{}", mount, path);
        self.enter(BackendCall::WriteKvSecret {
            path: full_path.clone(),
            key: key.to_string(),
            cas,
        })
        .await?;

        let mut state = self.state.lock().await;
        let current = state.secrets.get(&full_path).map_or(0, |secret| secret.version);
        if let Some(expected) = cas {
            if expected != current {
                return Err(BackendError::CasMismatch {
                    path: full_path,
                    provided: cas,
                    required: Some(current),
                });
            }
        }

        let data = HashMap::from([(key.to_string(), value.clone())]);
        state.secrets.insert(full_path, StoredSecret { version: current + 1, data });
        Ok(())
    }

    async fn read_kv_secret(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<Option<HashMap<String, SecretString>>> {
        let full_path = format!("{}/{}", mount, path);
        self.enter(BackendCall::ReadKvSecret { path: full_path.clone() }).await?;
        Ok(self.state.lock().await.secrets.get(&full_path).map(|secret| secret.data.clone()))
    }

    async fn read_secrets_engine(&self, path: &str) -> Result<Option<MountInfo>> {
        self.enter(BackendCall::ReadSecretsEngine { path: path.to_string() }).await?;
        Ok(self.state.lock().await.mounts.get(path).cloned())
    }

    async fn enable_secrets_engine(&self, path: &str, params: &EngineParams) -> Result<()> {
        self.enter(BackendCall::EnableSecretsEngine {
            path: path.to_string(),
            engine_type: params.engine_type.clone(),
        })
        .await?;

        let mut state = self.state.lock().await;
        if let Some(existing) = state.mounts.get(path) {
            return Err(BackendError::mount_path_in_use(path, Some(existing.engine_type.clone())));
        }
        state.mounts.insert(path.to_string(), mounted(params));
        Ok(())
    }

    async fn tune_secrets_engine(&self, path: &str, params: &EngineParams) -> Result<()> {
        self.enter(BackendCall::TuneSecretsEngine { path: path.to_string() }).await?;

        let mut state = self.state.lock().await;
        let info = state
            .mounts
            .get_mut(path)
            .ok_or_else(|| BackendError::not_found(format!("{}/{}", SECRETS_ENGINE_MOUNT, path)))?;
        tune(info, params);
        Ok(())
    }

    async fn read_kv_config(&self, mount: &str) -> Result<Option<KvConfig>> {
        self.enter(BackendCall::ReadKvConfig { mount: mount.to_string() }).await?;
        Ok(self.state.lock().await.kv_configs.get(mount).cloned())
    }

    async fn configure_kv(&self, mount: &str, config: &KvConfig) -> Result<()> {
        self.enter(BackendCall::ConfigureKv { mount: mount.to_string() }).await?;

        let mut state = self.state.lock().await;
        if !self.permissive && !state.mounts.contains_key(mount) {
            return Err(BackendError::not_found(format!("{}/config", mount)));
        }
        let stored = state.kv_configs.entry(mount.to_string()).or_default();
        if config.cas_required.is_some() {
            stored.cas_required = config.cas_required;
        }
        if config.max_versions.is_some() {
            stored.max_versions = config.max_versions;
        }
        if config.delete_version_after.is_some() {
            stored.delete_version_after = config.delete_version_after;
        }
        Ok(())
    }

    async fn read_pki_role(
        &self,
        mount: &str,
        name: &str,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
        self.enter(BackendCall::ReadPkiRole { mount: mount.to_string(), name: name.to_string() })
            .await?;
        Ok(self.state.lock().await.roles.get(&role_path(mount, name)).cloned())
    }

    async fn write_pki_role(&self, mount: &str, name: &str, params: &RoleParams) -> Result<()> {
        self.enter(BackendCall::WritePkiRole { mount: mount.to_string(), name: name.to_string() })
            .await?;

        let mut state = self.state.lock().await;
        if !self.permissive {
            if !state.mounts.contains_key(mount) {
                return Err(BackendError::not_found(format!("{}/{}", SECRETS_ENGINE_MOUNT, mount)));
            }
            let issuer = params.issuer_ref.as_deref().filter(|issuer| *issuer != DEFAULT_ISSUER);
            if let Some(issuer) = issuer {
                if !state.issuer_exists(mount, issuer) {
                    return Err(BackendError::not_found(format!("{}/issuer/{}", mount, issuer)));
                }
            }
        }

        let serde_json::Value::Object(fields) = serde_json::to_value(params)? else {
            return Err(BackendError::unexpected("role parameters did not serialize to an object"));
        };
        state.roles.insert(role_path(mount, name), fields);
        Ok(())
    }
}

/// Length and charset rules read back from rendered policy HCL
#[derive(Debug, PartialEq)]
struct PolicyRules {
    length: usize,
    charsets: Vec<(Vec<char>, usize)>,
}

fn parse_policy(hcl: &str) -> PolicyRules {
    let mut length = DEFAULT_PASSWORD_LENGTH;
    let mut charsets: Vec<(Vec<char>, usize)> = Vec::new();

    for line in hcl.lines().map(str::trim) {
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match name.trim() {
            "length" => length = value.parse().unwrap_or(DEFAULT_PASSWORD_LENGTH),
            "charset" => charsets.push((unquote(value).chars().collect(), 0)),
            "min-chars" => {
                if let Some(last) = charsets.last_mut() {
                    last.1 = value.parse().unwrap_or(0);
                }
            }
            _ => {}
        }
    }

    if charsets.is_empty() {
        charsets.push((DEFAULT_CHARSET.chars().collect(), 0));
    }
    PolicyRules { length, charsets }
}

fn unquote(value: &str) -> String {
    let inner = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Generate a password honoring each rule's minimum, filled from the union of charsets.
fn generate_from_policy(hcl: &str) -> SecretString {
    let rules = parse_policy(hcl);
    let mut rng = rand::thread_rng();
    let mut password: Vec<char> = Vec::with_capacity(rules.length);

    for (charset, min_chars) in &rules.charsets {
        for _ in 0..*min_chars {
            if let Some(c) = charset.choose(&mut rng) {
                password.push(*c);
            }
        }
    }

    let pool: Vec<char> =
        rules.charsets.iter().flat_map(|(charset, _)| charset.iter().copied()).collect();
    while password.len() < rules.length {
        match pool.choose(&mut rng) {
            Some(c) => password.push(*c),
            None => break,
        }
    }

    password.shuffle(&mut rng);
    SecretString::new(password.into_iter().collect::<String>())
}
