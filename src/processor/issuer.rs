//! Issuer processor.
//!
//! A root issuer is created as soon as it is discovered. An intermediate waits in the
//! graph until the issuer it is signed by has been created, then follows it down the
//! chain. Intermediates whose root never appears are forced at post-process, assuming
//! the root already exists in Vault.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::cascade::{Cascade, Materialize, SharedCascade};
use crate::dependency::SharedGraph;
use crate::domain::{Issuer, Resource, ResourceKind};
use crate::errors::{Error, Result};
use crate::events::{Event, EventBus, EventKind, ReconcileOutcome};
use crate::services::IssuerService;
use crate::utils::ConcurrencyLimiter;

#[async_trait]
impl Materialize<Issuer> for IssuerService {
    async fn materialize(&self, issuer: &Issuer) -> Result<ReconcileOutcome> {
        self.push(issuer).await.map(|_| ReconcileOutcome::Created)
    }
}

#[derive(Clone)]
pub struct IssuerProcessor {
    cascade: SharedCascade<Issuer, IssuerService>,
}

impl IssuerProcessor {
    pub fn new(service: IssuerService, limiter: ConcurrencyLimiter) -> Self {
        Self { cascade: Arc::new(Cascade::new(service, limiter)) }
    }

    /// Subscribe to issuer discoveries and the post-process request.
    pub fn register(&self, bus: &EventBus) {
        let processor = self.clone();
        bus.register([EventKind::Discovered(ResourceKind::Issuer)], move |event, bus| {
            let processor = processor.clone();
            async move {
                match event {
                    Event::Discovered(Resource::Issuer(issuer)) => {
                        processor.on_discovered(issuer, &bus).await
                    }
                    other => Err(Error::internal(format!(
                        "issuer processor received {}",
                        other.kind()
                    ))),
                }
            }
        });

        let processor = self.clone();
        bus.register([EventKind::PostProcessRequested], move |_, bus| {
            let processor = processor.clone();
            async move { processor.cascade.force(&bus).await }
        });
    }

    pub async fn on_discovered(&self, issuer: Issuer, bus: &EventBus) -> Result<()> {
        match issuer.root_key() {
            None => self.cascade.discover_independent(issuer, bus).await,
            Some(root) => self.cascade.discover_dependent(issuer, root, bus).await,
        }
    }

    pub fn graph(&self) -> SharedGraph<Issuer> {
        self.cascade.graph()
    }

    /// Flips to `true` once post-process forcing has finished
    pub fn settled(&self) -> watch::Receiver<bool> {
        self.cascade.settled()
    }
}
