//! HashiCorp Vault secrets backend implementation.
//!
//! Speaks the Vault HTTP API for mounts, the PKI, password policy and KV v2 engines.
//! Connection settings, the health check and KV reads go through `vaultrs`. Mounts, PKI
//! issuers and roles, and password policies are called directly with `reqwest` so each
//! body carries exactly the declared fields, using the same address, token and namespace.
//!
//! # Configuration
//!
//! - Vault server address (HTTPS recommended)
//! - Authentication token
//! - Optional namespace for multi-tenancy
//! - Per-request timeout
//!
//! # Security
//!
//! - Tokens are never logged
//! - Generated passwords are only exposed when serializing the KV write body

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

use super::client::SecretsBackend;
use super::error::{BackendError, Result};
use super::types::{MountInfo, SecretString};
use crate::domain::{
    CsrParams, EngineParams, IssuanceParams, IssuerRef, KvConfig, RoleParams, Ttl,
    SECRETS_ENGINE_MOUNT,
};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const POLICY_BASE_PATH: &str = "sys/policies/password";

// Error strings Vault reports for conditions callers handle specifically.
const CAS_MISMATCH: &str = "check-and-set parameter did not match the current version";
const ISSUER_NAME_TAKEN: &str = "issuer name already in use";
const ISSUER_NOT_FOUND: &str = "unable to find PKI issuer for reference";
const MOUNT_PATH_IN_USE: &str = "path is already in use";
const NO_MOUNT_AT_PATH: &str = "No secret engine mount at";

/// Configuration for HashiCorp Vault backend.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    #[validate(length(min = 1, message = "Vault address cannot be empty"))]
    pub address: String,

    /// Vault authentication token
    pub token: Option<SecretString>,

    /// Vault namespace (for Enterprise multi-tenancy)
    pub namespace: Option<String>,

    /// Timeout applied to every request, in seconds
    #[validate(range(
        min = 1,
        max = 600,
        message = "Request timeout must be between 1 and 600 seconds"
    ))]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            token: None,
            namespace: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl VaultConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CsrData {
    csr: String,
}

#[derive(Debug, Deserialize)]
struct CertificateData {
    certificate: String,
}

#[derive(Debug, Deserialize)]
struct SetSignedData {
    #[serde(default)]
    imported_issuers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PolicyData {
    policy: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedPassword {
    password: SecretString,
}

#[derive(Debug, Deserialize)]
struct MetadataData {
    current_version: u64,
}

#[derive(Debug, Deserialize)]
struct KvConfigData {
    #[serde(default)]
    cas_required: Option<bool>,
    #[serde(default)]
    max_versions: Option<u32>,
    #[serde(default)]
    delete_version_after: Option<Ttl>,
}

impl From<KvConfigData> for KvConfig {
    fn from(data: KvConfigData) -> Self {
        Self {
            cas_required: data.cas_required,
            max_versions: data.max_versions,
            delete_version_after: data.delete_version_after,
        }
    }
}

/// A non-success response, with the `errors` array Vault attaches to it.
#[derive(Debug)]
struct ApiFailure {
    status: u16,
    errors: Vec<String>,
}

impl ApiFailure {
    async fn read(response: Response) -> Self {
        let status = response.status().as_u16();
        let errors = response.json::<ErrorBody>().await.unwrap_or_default().errors;
        Self { status, errors }
    }

    fn mentions(&self, needle: &str) -> bool {
        self.errors.iter().any(|error| error.contains(needle))
    }

    fn into_error(self, path: &str, context: &str) -> BackendError {
        let message = if self.errors.is_empty() {
            context.to_string()
        } else {
            format!("{}: {}", context, self.errors.join("; "))
        };

        match self.status {
            401 | 403 => BackendError::unauthorized(message),
            404 => BackendError::not_found(path),
            429 => BackendError::RateLimited { message },
            status => BackendError::rejected(status, message),
        }
    }
}

/// HashiCorp Vault secrets backend client.
///
/// # Thread Safety
///
/// This client is `Send + Sync` and can be safely shared across async tasks.
///
/// # Example
///
/// ```rust,ignore
/// let backend = VaultBackend::connect(&VaultConfig::default()).await?;
/// backend.write_password_policy("strong", "length = 20").await?;
/// let password = backend.generate_password("strong").await?;
/// ```
pub struct VaultBackend {
    client: VaultClient,
    http: reqwest::Client,
    address: String,
    token: Option<SecretString>,
    namespace: Option<String>,
}

impl VaultBackend {
    /// Build a client without contacting Vault.
    ///
    /// # Errors
    ///
    /// - [`BackendError::ConfigError`] if the address or settings are invalid
    pub fn new(config: &VaultConfig) -> Result<Self> {
        if config.address.is_empty() {
            return Err(BackendError::config_error("Vault address cannot be empty"));
        }
        let address = url::Url::parse(&config.address).map_err(|e| {
            BackendError::config_error(format!("Invalid Vault address '{}': {}", config.address, e))
        })?;

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(address.as_str());

        if let Some(ref token) = config.token {
            settings_builder.token(token.expose_secret());
        }

        if let Some(ref namespace) = config.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }

        let settings = settings_builder
            .build()
            .map_err(|e| {
                BackendError::config_error(format!("Invalid Vault configuration: {}", e))
            })?;

        let client = VaultClient::new(settings).map_err(|e| {
            BackendError::config_error(format!("Failed to create Vault client: {}", e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                BackendError::config_error(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            http,
            address: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            namespace: config.namespace.clone(),
        })
    }

    /// Build a client and verify Vault is reachable.
    ///
    /// # Errors
    ///
    /// - [`BackendError::ConfigError`] if the configuration is invalid
    /// - [`BackendError::ConnectionFailed`] if the health check fails
    pub async fn connect(config: &VaultConfig) -> Result<Self> {
        let backend = Self::new(config)?;
        backend.health().await?;
        Ok(backend)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));
        let mut builder = self.http.request(method, url);

        if let Some(ref token) = self.token {
            builder = builder.header(TOKEN_HEADER, token.expose_secret());
        }
        if let Some(ref namespace) = self.namespace {
            builder = builder.header(NAMESPACE_HEADER, namespace);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<Response> {
        tracing::debug!(path = %path, "Sending Vault request");
        builder.send().await.map_err(|e| {
            tracing::error!(error = %e, path = %path, "Vault request failed");
            BackendError::connection_failed(format!("Request to '{}' failed: {}", path, e))
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T> {
        let envelope = response.json::<DataEnvelope<T>>().await.map_err(|e| {
            BackendError::unexpected(format!("Malformed response from '{}': {}", path, e))
        })?;
        Ok(envelope.data)
    }

    /// POST `body` to `path`, discarding the response body.
    async fn post(&self, path: &str, body: &Value, context: &str) -> Result<()> {
        let response = self.send(self.request(Method::POST, path).json(body), path).await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(ApiFailure::read(response).await.into_error(path, context))
    }

    async fn post_for<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        context: &str,
    ) -> Result<T> {
        let response = self.send(self.request(Method::POST, path).json(body), path).await?;
        if !response.status().is_success() {
            return Err(ApiFailure::read(response).await.into_error(path, context));
        }
        Self::decode(response, path).await
    }

    /// GET `path`, mapping 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        context: &str,
    ) -> Result<Option<T>> {
        let response = self.send(self.request(Method::GET, path), path).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Self::decode(response, path).await.map(Some),
            _ => Err(ApiFailure::read(response).await.into_error(path, context)),
        }
    }

    async fn current_version(&self, mount: &str, path: &str) -> Option<u64> {
        let metadata_path = format!("{}/metadata/{}", mount, path);
        let request = self.request(Method::GET, &metadata_path);
        let response = match self.send(request, &metadata_path).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    path = %metadata_path,
                    "Failed to read secret metadata"
                );
                return None;
            }
        };

        match response.status() {
            StatusCode::NOT_FOUND => Some(0),
            status if status.is_success() => Self::decode::<MetadataData>(response, &metadata_path)
                .await
                .ok()
                .map(|data| data.current_version),
            _ => None,
        }
    }
}

/// Body of a mount tune request: the declared description and lease settings.
fn tune_body(params: &EngineParams) -> Value {
    let mut body = serde_json::Map::new();
    if let Some(description) = &params.description {
        body.insert("description".into(), json!(description));
    }
    if let Some(ttl) = params.config.default_lease_ttl {
        body.insert("default_lease_ttl".into(), json!(ttl.to_string()));
    }
    if let Some(ttl) = params.config.max_lease_ttl {
        body.insert("max_lease_ttl".into(), json!(ttl.to_string()));
    }
    if let Some(visibility) = params.config.listing_visibility {
        body.insert("listing_visibility".into(), json!(visibility.as_str()));
    }
    Value::Object(body)
}

/// Body of a mount enable request. Lease settings travel in the nested `config`.
fn enable_body(params: &EngineParams) -> Value {
    let mut config = tune_body(params);
    let mut body = json!({ "type": params.engine_type });
    if let Value::Object(ref mut fields) = config {
        if let Some(description) = fields.remove("description") {
            body["description"] = description;
        }
    }
    if config.as_object().is_some_and(|fields| !fields.is_empty()) {
        body["config"] = config;
    }
    if !params.options.is_empty() {
        body["options"] = json!(params.options);
    }
    for (field, value) in [
        ("local", params.local),
        ("seal_wrap", params.seal_wrap),
        ("external_entropy_access", params.external_entropy_access),
    ] {
        if let Some(value) = value {
            body[field] = json!(value);
        }
    }
    body
}

/// Serialize CSR parameters into a Vault request body, dropping the fields that travel
/// in the URL or that the endpoint does not accept.
fn csr_body(params: &CsrParams, exclude: &[&str]) -> Result<Value> {
    let mut body = serde_json::to_value(params)?;
    if let Value::Object(ref mut fields) = body {
        fields.remove("type");
        for field in exclude {
            fields.remove(*field);
        }
    }
    Ok(body)
}

#[async_trait]
impl SecretsBackend for VaultBackend {
    async fn generate_root_issuer(&self, mount: &str, params: &CsrParams) -> Result<()> {
        let path = format!("{}/issuers/generate/root/{}", mount, params.cert_type.as_str());
        let body = csr_body(params, &[])?;

        let response = self.send(self.request(Method::POST, &path).json(&body), &path).await?;
        if response.status().is_success() {
            tracing::info!(
                mount = %mount,
                issuer_name = %params.issuer_name,
                "Generated root issuer"
            );
            return Ok(());
        }

        let failure = ApiFailure::read(response).await;
        if failure.mentions(ISSUER_NAME_TAKEN) {
            return Err(BackendError::issuer_name_taken(&params.issuer_name, mount));
        }
        Err(failure.into_error(&path, "Failed to generate root issuer"))
    }

    async fn generate_intermediate_csr(&self, mount: &str, params: &CsrParams) -> Result<String> {
        let path =
            format!("{}/issuers/generate/intermediate/{}", mount, params.cert_type.as_str());
        let body = csr_body(params, &["issuer_name"])?;

        let data: CsrData =
            self.post_for(&path, &body, "Failed to generate intermediate CSR").await?;
        Ok(data.csr)
    }

    async fn sign_intermediate(
        &self,
        signer: &IssuerRef,
        csr: &str,
        params: &IssuanceParams,
    ) -> Result<String> {
        let path =
            format!("{}/issuer/{}/sign-intermediate", signer.secret_engine, signer.issuer_name);
        let mut body = serde_json::to_value(params)?;
        if let Value::Object(ref mut fields) = body {
            fields.remove("issuer_ref");
            fields.insert("csr".to_string(), Value::String(csr.to_string()));
            fields.insert("use_csr_values".to_string(), Value::Bool(true));
        }

        let response = self.send(self.request(Method::POST, &path).json(&body), &path).await?;
        if !response.status().is_success() {
            let failure = ApiFailure::read(response).await;
            if failure.mentions(ISSUER_NOT_FOUND) {
                return Err(BackendError::not_found(signer.absolute_path()));
            }
            return Err(failure.into_error(&signer.absolute_path(), "Failed to sign intermediate"));
        }

        let data: CertificateData = Self::decode(response, &path).await?;
        Ok(data.certificate)
    }

    async fn set_signed_intermediate(&self, mount: &str, certificate: &str) -> Result<Vec<String>> {
        let path = format!("{}/intermediate/set-signed", mount);
        let body = json!({ "certificate": certificate });

        let data: SetSignedData =
            self.post_for(&path, &body, "Failed to import signed intermediate").await?;
        Ok(data.imported_issuers.unwrap_or_default())
    }

    async fn update_issuer(&self, mount: &str, issuer_ref: &str, issuer_name: &str) -> Result<()> {
        let path = format!("{}/issuer/{}", mount, issuer_ref);
        let body = json!({ "issuer_name": issuer_name });

        self.post(&path, &body, "Failed to update issuer").await
    }

    async fn read_password_policy(&self, path: &str) -> Result<Option<String>> {
        let request_path = format!("{}/{}", POLICY_BASE_PATH, path.trim_matches('/'));
        let data: Option<PolicyData> =
            self.get_optional(&request_path, "Failed to read password policy").await?;
        Ok(data.map(|data| data.policy))
    }

    async fn write_password_policy(&self, path: &str, policy: &str) -> Result<()> {
        let request_path = format!("{}/{}", POLICY_BASE_PATH, path.trim_matches('/'));
        let body = json!({ "policy": policy });
        self.post(&request_path, &body, "Failed to create password policy").await
    }

    async fn generate_password(&self, policy_path: &str) -> Result<SecretString> {
        let request_path =
            format!("{}/{}/generate", POLICY_BASE_PATH, policy_path.trim_matches('/'));
        let response = self.send(self.request(Method::GET, &request_path), &request_path).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(BackendError::policy_not_found(policy_path)),
            status if status.is_success() => {
                let data: GeneratedPassword = Self::decode(response, &request_path).await?;
                Ok(data.password)
            }
            _ => Err(ApiFailure::read(response)
                .await
                .into_error(&request_path, "Failed to generate a password")),
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
        let request_path = format!("{}/data/{}", mount, path.trim_matches('/'));
        let mut body = json!({ "data": { key: value.expose_secret() } });
        if let Some(cas) = cas {
            body["options"] = json!({ "cas": cas });
        }

        let request = self.request(Method::POST, &request_path).json(&body);
        let response = self.send(request, &request_path).await?;
        if response.status().is_success() {
            return Ok(());
        }

        let failure = ApiFailure::read(response).await;
        if failure.mentions(CAS_MISMATCH) {
            let required = self.current_version(mount, path.trim_matches('/')).await;
            return Err(BackendError::CasMismatch {
                path: format!("{}/{}", mount, path),
                provided: cas,
                required,
            });
        }

        tracing::error!(status = failure.status, path = %request_path, "Failed to write secret");
        Err(failure.into_error(&request_path, "Failed to create/update secret"))
    }

    async fn read_kv_secret(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<Option<HashMap<String, SecretString>>> {
        match kv2::read::<HashMap<String, String>>(&self.client, mount, path).await {
            Ok(data) => {
                Ok(Some(data.into_iter().map(|(k, v)| (k, SecretString::new(v))).collect()))
            }
            Err(ClientError::APIError { code: 404, .. }) => Ok(None),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    mount = %mount,
                    path = %path,
                    "Failed to read secret from Vault"
                );
                Err(BackendError::connection_failed(format!(
                    "Failed to read secret '{}/{}': {}",
                    mount, path, e
                )))
            }
        }
    }

    async fn read_secrets_engine(&self, path: &str) -> Result<Option<MountInfo>> {
        let request_path = format!("{}/{}", SECRETS_ENGINE_MOUNT, path.trim_matches('/'));
        let response = self.send(self.request(Method::GET, &request_path), &request_path).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Self::decode(response, &request_path).await.map(Some),
            _ => {
                let failure = ApiFailure::read(response).await;
                if failure.mentions(NO_MOUNT_AT_PATH) {
                    return Ok(None);
                }
                Err(failure.into_error(&request_path, "Failed to read secrets engine"))
            }
        }
    }

    async fn enable_secrets_engine(&self, path: &str, params: &EngineParams) -> Result<()> {
        let request_path = format!("{}/{}", SECRETS_ENGINE_MOUNT, path.trim_matches('/'));
        let body = enable_body(params);

        let request = self.request(Method::POST, &request_path).json(&body);
        let response = self.send(request, &request_path).await?;
        if response.status().is_success() {
            tracing::info!(
                path = %path,
                engine_type = %params.engine_type,
                "Enabled secrets engine"
            );
            return Ok(());
        }

        let failure = ApiFailure::read(response).await;
        if failure.mentions(MOUNT_PATH_IN_USE) {
            return Err(BackendError::mount_path_in_use(path, None));
        }
        Err(failure.into_error(&request_path, "Failed to enable secrets engine"))
    }

    async fn tune_secrets_engine(&self, path: &str, params: &EngineParams) -> Result<()> {
        let request_path = format!("{}/{}/tune", SECRETS_ENGINE_MOUNT, path.trim_matches('/'));
        self.post(&request_path, &tune_body(params), "Failed to tune secrets engine").await
    }

    async fn read_kv_config(&self, mount: &str) -> Result<Option<KvConfig>> {
        let request_path = format!("{}/config", mount.trim_matches('/'));
        let data: Option<KvConfigData> =
            self.get_optional(&request_path, "Failed to read KV configuration").await?;
        Ok(data.map(KvConfig::from))
    }

    async fn configure_kv(&self, mount: &str, config: &KvConfig) -> Result<()> {
        let request_path = format!("{}/config", mount.trim_matches('/'));
        let body = serde_json::to_value(config)?;
        self.post(&request_path, &body, "Failed to configure KV engine").await
    }

    async fn read_pki_role(
        &self,
        mount: &str,
        name: &str,
    ) -> Result<Option<serde_json::Map<String, Value>>> {
        let request_path = format!("{}/roles/{}", mount.trim_matches('/'), name);
        self.get_optional(&request_path, "Failed to read PKI role").await
    }

    async fn write_pki_role(&self, mount: &str, name: &str, params: &RoleParams) -> Result<()> {
        let request_path = format!("{}/roles/{}", mount.trim_matches('/'), name);
        let body = serde_json::to_value(params)?;
        self.post(&request_path, &body, "Failed to write PKI role").await
    }

    async fn health(&self) -> Result<()> {
        match vaultrs::sys::health(&self.client).await {
            Ok(_) => {
                tracing::info!(address = %self.address, "Successfully connected to Vault");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, address = %self.address, "Failed to connect to Vault");
                Err(BackendError::connection_failed(format!("Vault health check failed: {}", e)))
            }
        }
    }
}
