//! # Resource Processors
//!
//! One processor per resource kind subscribes to that kind's discoveries on the
//! [`EventBus`]. Issuers, passwords and PKI roles can depend on other resources and
//! share the [`cascade::Cascade`] engine; password policies and secrets engines are
//! reconciled directly.

pub mod cascade;
pub mod direct;
pub mod issuer;
pub mod password;
pub mod pki_role;

use std::sync::Arc;

pub use cascade::{Cascade, Materialize};
pub use direct::DirectProcessor;
pub use issuer::IssuerProcessor;
pub use password::PasswordProcessor;
pub use pki_role::PkiRoleProcessor;

use crate::domain::{PasswordPolicy, SecretsEngine};
use crate::events::EventBus;
use crate::secrets::SecretsBackend;
use crate::services::{
    IssuerService, PasswordPolicyService, PasswordService, PkiRoleService, SecretsEngineService,
};
use crate::utils::ConcurrencyLimiter;

pub type PasswordPolicyProcessor = DirectProcessor<PasswordPolicy, PasswordPolicyService>;
pub type SecretsEngineProcessor = DirectProcessor<SecretsEngine, SecretsEngineService>;

/// Every processor, registered on one bus
#[derive(Clone)]
pub struct Processors {
    pub issuers: IssuerProcessor,
    pub passwords: PasswordProcessor,
    pub password_policies: PasswordPolicyProcessor,
    pub secrets_engines: SecretsEngineProcessor,
    pub pki_roles: PkiRoleProcessor,
}

impl Processors {
    /// Build the processors over `backend` and subscribe them to `bus`.
    ///
    /// All processors share `limiter` for their backend calls. PKI roles register last:
    /// their post-process handler waits for the issuers' to finish.
    pub fn install(
        bus: &EventBus,
        backend: Arc<dyn SecretsBackend>,
        limiter: ConcurrencyLimiter,
    ) -> Self {
        let issuers = IssuerProcessor::new(IssuerService::new(backend.clone()), limiter.clone());
        let pki_roles = PkiRoleProcessor::new(
            PkiRoleService::new(backend.clone()),
            limiter.clone(),
            issuers.settled(),
        );
        let processors = Self {
            issuers,
            passwords: PasswordProcessor::new(
                PasswordService::new(backend.clone()),
                limiter.clone(),
            ),
            password_policies: DirectProcessor::new(
                PasswordPolicyService::new(backend.clone()),
                limiter.clone(),
            ),
            secrets_engines: DirectProcessor::new(SecretsEngineService::new(backend), limiter),
            pki_roles,
        };

        processors.issuers.register(bus);
        processors.passwords.register(bus);
        processors.password_policies.register(bus);
        processors.secrets_engines.register(bus);
        processors.pki_roles.register(bus);
        processors
    }
}
