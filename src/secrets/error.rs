//! Error types for secrets backend operations.

use thiserror::Error;

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Coarse classification callers use to decide how to report a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// A path or prerequisite the request relies on does not exist
    MissingPrerequisite,
    /// The backend understood the request and refused it
    Rejected,
    /// The backend could not be reached or answered unintelligibly
    Connectivity,
}

/// Errors returned by a [`SecretsBackend`](super::SecretsBackend).
#[derive(Error, Debug)]
pub enum BackendError {
    /// The requested path, issuer or mount does not exist.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// Password generation referenced an unknown policy.
    #[error("Failed to generate a password, password policy '{path}' not found")]
    PasswordPolicyNotFound { path: String },

    /// Root generation hit an issuer name already registered in the mount.
    #[error(
        "Issuer name '{issuer_name}' (secret_engine: '{mount}') is already in use. \
         Please choose a different name"
    )]
    IssuerNameTaken { issuer_name: String, mount: String },

    /// A secrets engine is already mounted at the path, possibly of another type.
    #[error("Secrets engine path '{path}' is already in use{}", display_existing(.existing))]
    MountPathInUse { path: String, existing: Option<String> },

    /// A KV write's check-and-set version did not match the stored version.
    #[error(
        "Failed to push secret (path: '{path}'): CAS mismatch (expected {}, got {}). \
         Ensure correct CAS value and try again",
        display_version(.required),
        display_version(.provided)
    )]
    CasMismatch { path: String, provided: Option<u64>, required: Option<u64> },

    /// The token is missing, expired or lacks permission.
    #[error("Authentication failed: {message}")]
    Unauthorized { message: String },

    #[error("Rate limited by backend: {message}")]
    RateLimited { message: String },

    /// Any other refusal, with the backend's own error messages.
    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Failed to reach the backend.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The backend answered with a payload the client cannot use.
    #[error("Unexpected backend response: {message}")]
    UnexpectedResponse { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

fn display_existing(existing: &Option<String>) -> String {
    existing.as_ref().map_or_else(String::new, |engine| format!(" by a '{}' engine", engine))
}

fn display_version(version: &Option<u64>) -> String {
    version.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

impl BackendError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn policy_not_found(path: impl Into<String>) -> Self {
        Self::PasswordPolicyNotFound { path: path.into() }
    }

    pub fn issuer_name_taken(issuer_name: impl Into<String>, mount: impl Into<String>) -> Self {
        Self::IssuerNameTaken { issuer_name: issuer_name.into(), mount: mount.into() }
    }

    pub fn mount_path_in_use(path: impl Into<String>, existing: Option<String>) -> Self {
        Self::MountPathInUse { path: path.into(), existing }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected { status, message: message.into() }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse { message: message.into() }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    pub fn kind(&self) -> BackendErrorKind {
        match self {
            Self::NotFound { .. } | Self::PasswordPolicyNotFound { .. } => {
                BackendErrorKind::MissingPrerequisite
            }
            Self::IssuerNameTaken { .. }
            | Self::MountPathInUse { .. }
            | Self::CasMismatch { .. }
            | Self::Unauthorized { .. }
            | Self::RateLimited { .. }
            | Self::Rejected { .. }
            | Self::ConfigError { .. } => BackendErrorKind::Rejected,
            Self::ConnectionFailed { .. }
            | Self::UnexpectedResponse { .. }
            | Self::SerializationError(_) => BackendErrorKind::Connectivity,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::unexpected(error.to_string())
        } else {
            Self::connection_failed(error.to_string())
        }
    }
}
