//! Processor for kinds that depend on nothing.
//!
//! Password policies and secrets engines are reconciled as soon as they are discovered,
//! and their outcome is published for the processors whose resources wait on them.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use tracing::Instrument;

use super::cascade::Materialize;
use crate::dependency::{Identified, NodeKey};
use crate::domain::{Declared, PasswordPolicy, SecretsEngine};
use crate::errors::{Error, Result};
use crate::events::{Event, EventBus, EventKind, ReconcileOutcome};
use crate::observability::{MetricsRecorder, Outcome};
use crate::resource_span;
use crate::services::{PasswordPolicyService, SecretsEngineService};
use crate::utils::ConcurrencyLimiter;

#[async_trait]
impl Materialize<PasswordPolicy> for PasswordPolicyService {
    async fn materialize(&self, policy: &PasswordPolicy) -> Result<ReconcileOutcome> {
        self.reconcile(policy).await
    }
}

#[async_trait]
impl Materialize<SecretsEngine> for SecretsEngineService {
    async fn materialize(&self, engine: &SecretsEngine) -> Result<ReconcileOutcome> {
        self.reconcile(engine).await
    }
}

pub struct DirectProcessor<P, M> {
    service: Arc<M>,
    limiter: ConcurrencyLimiter,
    seen: Arc<DashSet<NodeKey>>,
    metrics: MetricsRecorder,
    _kind: PhantomData<fn(P)>,
}

impl<P, M> Clone for DirectProcessor<P, M> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            limiter: self.limiter.clone(),
            seen: self.seen.clone(),
            metrics: self.metrics.clone(),
            _kind: PhantomData,
        }
    }
}

impl<P, M> DirectProcessor<P, M>
where
    P: Declared,
    M: Materialize<P> + 'static,
{
    pub fn new(service: M, limiter: ConcurrencyLimiter) -> Self {
        Self {
            service: Arc::new(service),
            limiter,
            seen: Arc::new(DashSet::new()),
            metrics: MetricsRecorder::new(),
            _kind: PhantomData,
        }
    }

    pub fn register(&self, bus: &EventBus) {
        let processor = self.clone();
        bus.register([EventKind::Discovered(P::KIND)], move |event, bus| {
            let processor = processor.clone();
            async move {
                let kind = event.kind();
                let payload = match event {
                    Event::Discovered(resource) => P::from_resource(resource),
                    _ => None,
                };
                match payload {
                    Some(payload) => processor.on_discovered(payload, &bus).await,
                    None => {
                        Err(Error::internal(format!("{} processor received {}", P::KIND, kind)))
                    }
                }
            }
        });
    }

    /// Reconcile `payload` against the backend and publish the outcome.
    pub async fn on_discovered(&self, payload: P, bus: &EventBus) -> Result<()> {
        if !self.seen.insert(payload.node_key()) {
            return Err(Error::duplicate(P::KIND, payload.path()));
        }

        let span = resource_span!(P::KIND, payload.path());
        let reconcile = self.limiter.run(self.service.materialize(&payload));
        let outcome = match reconcile.instrument(span).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_outcome(P::KIND, Outcome::Failed);
                return Err(e);
            }
        };

        bus.publish(Event::reconciled(outcome, payload)).await
    }
}
