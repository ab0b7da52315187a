//! Password processor.
//!
//! Passwords depend on the policy they are generated from. A password is written once
//! its policy has been reported created, updated or unchanged; passwords whose policy was
//! never declared are forced at post-process, assuming the policy already exists.

use std::sync::Arc;

use async_trait::async_trait;

use super::cascade::{Cascade, Materialize, SharedCascade};
use crate::dependency::{Identified, SharedGraph};
use crate::domain::{Password, Resource, ResourceKind};
use crate::errors::{Error, Result};
use crate::events::{Event, EventBus, EventKind, ReconcileOutcome};
use crate::services::PasswordService;
use crate::utils::ConcurrencyLimiter;

#[async_trait]
impl Materialize<Password> for PasswordService {
    async fn materialize(&self, password: &Password) -> Result<ReconcileOutcome> {
        self.create(password).await.map(|_| ReconcileOutcome::Created)
    }
}

#[derive(Clone)]
pub struct PasswordProcessor {
    cascade: SharedCascade<Password, PasswordService>,
}

impl PasswordProcessor {
    pub fn new(service: PasswordService, limiter: ConcurrencyLimiter) -> Self {
        Self { cascade: Arc::new(Cascade::new(service, limiter)) }
    }

    /// Subscribe to password discoveries, policy outcomes and the post-process request.
    pub fn register(&self, bus: &EventBus) {
        let processor = self.clone();
        bus.register([EventKind::Discovered(ResourceKind::Password)], move |event, bus| {
            let processor = processor.clone();
            async move {
                match event {
                    Event::Discovered(Resource::Password(password)) => {
                        let policy = password.policy_key();
                        processor.cascade.discover_dependent(password, policy, &bus).await
                    }
                    other => Err(unexpected(other.kind())),
                }
            }
        });

        let processor = self.clone();
        bus.register(EventKind::outcomes(ResourceKind::PasswordPolicy), move |event, bus| {
            let processor = processor.clone();
            async move {
                match event.resource() {
                    Some(Resource::PasswordPolicy(policy)) => {
                        processor.cascade.root_materialized(policy.node_key(), &bus).await
                    }
                    _ => Err(unexpected(event.kind())),
                }
            }
        });

        let processor = self.clone();
        bus.register([EventKind::PostProcessRequested], move |_, bus| {
            let processor = processor.clone();
            async move { processor.cascade.force(&bus).await }
        });
    }

    pub fn graph(&self) -> SharedGraph<Password> {
        self.cascade.graph()
    }
}

fn unexpected(kind: EventKind) -> Error {
    Error::internal(format!("password processor received {}", kind))
}
