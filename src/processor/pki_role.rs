//! PKI role processor.
//!
//! A role waits for the secrets engine it is written to and, when it names one, for its
//! issuer. Roots that were never declared are assumed to exist: at post-process the
//! remaining roles are forced, but only once the issuer processor has forced its own
//! chains, so a role on a forced intermediate still sees that intermediate first.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::cascade::{Cascade, Materialize, SharedCascade};
use crate::dependency::{Identified, SharedGraph};
use crate::domain::{PkiRole, Resource, ResourceKind};
use crate::errors::{Error, Result};
use crate::events::{Event, EventBus, EventKind, ReconcileOutcome};
use crate::services::PkiRoleService;
use crate::utils::ConcurrencyLimiter;

#[async_trait]
impl Materialize<PkiRole> for PkiRoleService {
    async fn materialize(&self, role: &PkiRole) -> Result<ReconcileOutcome> {
        self.reconcile(role).await
    }
}

#[derive(Clone)]
pub struct PkiRoleProcessor {
    cascade: SharedCascade<PkiRole, PkiRoleService>,
    issuers_settled: watch::Receiver<bool>,
}

impl PkiRoleProcessor {
    /// `issuers_settled` flips once the issuer processor has finished forcing.
    pub fn new(
        service: PkiRoleService,
        limiter: ConcurrencyLimiter,
        issuers_settled: watch::Receiver<bool>,
    ) -> Self {
        Self { cascade: Arc::new(Cascade::new(service, limiter)), issuers_settled }
    }

    /// Subscribe to role discoveries, engine and issuer outcomes, and post-process.
    ///
    /// Must be registered after the issuer processor.
    pub fn register(&self, bus: &EventBus) {
        let processor = self.clone();
        bus.register([EventKind::Discovered(ResourceKind::PkiRole)], move |event, bus| {
            let processor = processor.clone();
            async move {
                match event {
                    Event::Discovered(Resource::PkiRole(role)) => {
                        let roots = role.root_keys();
                        processor.cascade.discover_dependent_on(role, roots, &bus).await
                    }
                    other => Err(unexpected(other.kind())),
                }
            }
        });

        let processor = self.clone();
        let roots = EventKind::outcomes(ResourceKind::SecretsEngine)
            .into_iter()
            .chain(EventKind::outcomes(ResourceKind::Issuer));
        bus.register(roots, move |event, bus| {
            let processor = processor.clone();
            async move {
                let key = match event.resource() {
                    Some(Resource::SecretsEngine(engine)) => engine.node_key(),
                    Some(Resource::Issuer(issuer)) => issuer.node_key(),
                    _ => return Err(unexpected(event.kind())),
                };
                processor.cascade.root_materialized(key, &bus).await
            }
        });

        let processor = self.clone();
        bus.register([EventKind::PostProcessRequested], move |_, bus| {
            let processor = processor.clone();
            async move {
                let mut settled = processor.issuers_settled.clone();
                // A dropped issuer processor has nothing left to force.
                let _ = settled.wait_for(|settled| *settled).await;
                processor.cascade.force(&bus).await
            }
        });
    }

    pub fn graph(&self) -> SharedGraph<PkiRole> {
        self.cascade.graph()
    }
}

fn unexpected(kind: EventKind) -> Error {
    Error::internal(format!("PKI role processor received {}", kind))
}
