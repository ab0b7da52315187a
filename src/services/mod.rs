//! Backend-facing services
//!
//! Each service turns one declared resource into the sequence of backend calls that
//! materializes it, and tags backend failures with the resource they belong to.

pub mod issuer_service;
pub mod password_policy_service;
pub mod password_service;
pub mod pki_role_service;
pub mod secrets_engine_service;

pub use issuer_service::IssuerService;
pub use password_policy_service::PasswordPolicyService;
pub use password_service::PasswordService;
pub use pki_role_service::PkiRoleService;
pub use secrets_engine_service::SecretsEngineService;
