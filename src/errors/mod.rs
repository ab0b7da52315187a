//! # Error Handling
//!
//! Crate-wide error type for the reconciliation engine. Backend failures keep their
//! [`BackendError`] as the source so callers can still inspect the typed cause, and
//! concurrent batches collapse their failures into a single [`Error::Batch`].

use std::path::PathBuf;

use crate::dependency::GraphError;
use crate::domain::ResourceKind;
use crate::secrets::{BackendError, BackendErrorKind};

/// Custom result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the reconciliation engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Two declarations claim the same resource identity
    #[error("Duplicate {kind} resource '{path}': a resource with this path was already declared")]
    DuplicateResource { kind: ResourceKind, path: String },

    /// A backend call failed while materializing a resource
    #[error("Failed to reconcile {kind} '{path}': {source}")]
    Backend {
        kind: ResourceKind,
        path: String,
        #[source]
        source: BackendError,
    },

    /// A post-process attempt for a resource whose dependency never materialized failed
    #[error("Forced attempt for '{path}' failed (its dependency was never materialized): {source}")]
    Forced {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// Dependency graph invariant violation
    #[error("Dependency graph error: {0}")]
    Graph(#[from] GraphError),

    /// Manifest could not be read or parsed
    #[error("Invalid manifest '{}': {message}", file.display())]
    Manifest { file: PathBuf, message: String },

    /// Payload or configuration failed validation
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Several sibling operations failed
    #[error("{} resources failed to reconcile; first failure: {}", .0.len(), first_message(.0))]
    Batch(Vec<Error>),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn first_message(errors: &[Error]) -> String {
    errors.first().map(ToString::to_string).unwrap_or_default()
}

impl Error {
    /// Create a duplicate resource error
    pub fn duplicate<P: Into<String>>(kind: ResourceKind, path: P) -> Self {
        Self::DuplicateResource { kind, path: path.into() }
    }

    /// Wrap a backend failure with the resource it was reconciling
    pub fn backend<P: Into<String>>(kind: ResourceKind, path: P, source: BackendError) -> Self {
        Self::Backend { kind, path: path.into(), source }
    }

    /// Mark an error as the outcome of a dependency-forced attempt
    pub fn forced<P: Into<String>>(path: P, source: Error) -> Self {
        Self::Forced { path: path.into(), source: Box::new(source) }
    }

    /// Create a manifest error
    pub fn manifest<F: Into<PathBuf>, M: Into<String>>(file: F, message: M) -> Self {
        Self::Manifest { file: file.into(), message: message.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Collapse the failures of a concurrent batch.
    ///
    /// No failures yields `Ok`, a single failure is returned unchanged, several become
    /// [`Error::Batch`]. Nested batches are flattened.
    pub fn aggregate(errors: Vec<Error>) -> Result<()> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                Error::Batch(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(Error::Batch(flat)),
        }
    }

    /// The backend error at the root of this failure, if any
    pub fn backend_source(&self) -> Option<&BackendError> {
        match self {
            Error::Backend { source, .. } => Some(source),
            Error::Forced { source, .. } => source.backend_source(),
            _ => None,
        }
    }

    /// Whether this failure came from a post-process forced attempt
    pub fn is_forced(&self) -> bool {
        matches!(self, Error::Forced { .. })
    }

    /// Every leaf failure, with batches expanded
    pub fn failures(&self) -> Vec<&Error> {
        match self {
            Error::Batch(inner) => inner.iter().flat_map(Error::failures).collect(),
            other => vec![other],
        }
    }

    /// Process exit code for this failure.
    ///
    /// Manifest and validation problems exit with 64, failures the operator can fix in
    /// the manifest or the backend exit with 1, anything else with 128.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Manifest { .. } | Error::Validation { .. } => 64,
            Error::DuplicateResource { .. } => 64,
            Error::Batch(inner) => inner.first().map_or(128, Error::exit_code),
            Error::Forced { source, .. } => source.exit_code(),
            Error::Backend { source, .. } => match source.kind() {
                BackendErrorKind::MissingPrerequisite
                | BackendErrorKind::Rejected
                | BackendErrorKind::Connectivity => 1,
            },
            Error::Config(_) => 1,
            Error::Graph(_) | Error::Io(_) | Error::Internal(_) => 128,
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_validation_messages("", &errors, &mut messages);
        Self::validation(format!("Validation failed: {}", messages.join("; ")))
    }
}

/// Flatten nested validator errors into `path.to.field: message` entries.
fn collect_validation_messages(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in fields {
        let path =
            if prefix.is_empty() { field.to_string() } else { format!("{}.{}", prefix, field) };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                out.push(format!("{}: {}", path, error_messages.join(", ")));
            }
            ValidationErrorsKind::Struct(nested) => collect_validation_messages(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (idx, nested) in items {
                    collect_validation_messages(&format!("{}[{}]", path, idx), nested, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = Error::config("Test configuration error");
        assert!(matches!(error, Error::Config(_)));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_duplicate_error_message() {
        let error = Error::duplicate(ResourceKind::Issuer, "pki/root");
        assert_eq!(
            error.to_string(),
            "Duplicate Issuer resource 'pki/root': a resource with this path was already declared"
        );
        assert_eq!(error.exit_code(), 64);
    }

    #[test]
    fn test_aggregate_empty_and_single() {
        assert!(Error::aggregate(vec![]).is_ok());

        let single = Error::aggregate(vec![Error::internal("boom")]).unwrap_err();
        assert!(matches!(single, Error::Internal(_)));
    }

    #[test]
    fn test_aggregate_flattens_batches() {
        let nested = Error::Batch(vec![Error::internal("a"), Error::internal("b")]);
        let error = Error::aggregate(vec![nested, Error::internal("c")]).unwrap_err();

        match &error {
            Error::Batch(inner) => assert_eq!(inner.len(), 3),
            other => panic!("expected batch, got {other:?}"),
        }
        assert!(error.to_string().starts_with("3 resources failed to reconcile"));
        assert_eq!(error.failures().len(), 3);
    }

    #[test]
    fn test_forced_error_keeps_backend_source() {
        let inner = Error::backend(
            ResourceKind::Issuer,
            "pki_int/intermediate",
            BackendError::not_found("/v1/pki/issuer/root/sign-intermediate"),
        );
        let forced = Error::forced("pki_int/intermediate", inner);

        assert!(forced.is_forced());
        assert!(forced.to_string().contains("dependency was never materialized"));
        assert!(matches!(forced.backend_source(), Some(BackendError::NotFound { .. })));
        assert_eq!(forced.exit_code(), 1);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::manifest("a.yaml", "bad").exit_code(), 64);
        assert_eq!(Error::validation("bad").exit_code(), 64);
        assert_eq!(Error::internal("bad").exit_code(), 128);
        assert_eq!(Error::Graph(GraphError::NodeNotFound { key: "x".into() }).exit_code(), 128);
    }
}
