//! Dependency-gated materialization shared by the processors of dependent-capable kinds.
//!
//! A [`Cascade`] owns one dependency graph. Discovery inserts nodes and edges, a root
//! becoming materialized releases its dependents through [`Cascade::fulfill`], and
//! [`Cascade::force`] resolves what is still waiting once discovery is over. A dependent
//! may wait on several roots and is only released once all of them are materialized.
//!
//! The graph lock is only held for check-and-mutate sequences. Backend calls run outside
//! it, bounded by the processor's limiter; lifecycle events are published after the
//! limiter permit is released.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use crate::dependency::{
    DependencyGraph, EdgeStatus, Identified, Node, NodeKey, NodeState, SharedGraph,
};
use crate::domain::Declared;
use crate::errors::{Error, Result};
use crate::events::{Event, EventBus, ReconcileOutcome};
use crate::observability::{MetricsRecorder, Outcome};
use crate::resource_span;
use crate::utils::ConcurrencyLimiter;

/// Brings one resource of kind `P` in line with its declaration on the backend.
#[async_trait]
pub trait Materialize<P>: Send + Sync {
    async fn materialize(&self, payload: &P) -> Result<ReconcileOutcome>;
}

/// One dependent picked for materialization, with the root it was released or forced by
struct Job<P> {
    root: NodeKey,
    key: NodeKey,
    payload: P,
}

pub struct Cascade<P, M> {
    graph: SharedGraph<P>,
    materializer: M,
    limiter: ConcurrencyLimiter,
    metrics: MetricsRecorder,
    settled: watch::Sender<bool>,
}

impl<P, M> Cascade<P, M>
where
    P: Declared,
    M: Materialize<P>,
{
    pub fn new(materializer: M, limiter: ConcurrencyLimiter) -> Self {
        Self {
            graph: DependencyGraph::shared(),
            materializer,
            limiter,
            metrics: MetricsRecorder::new(),
            settled: watch::channel(false).0,
        }
    }

    /// The graph this cascade mutates
    pub fn graph(&self) -> SharedGraph<P> {
        self.graph.clone()
    }

    /// Flips to `true` once [`Self::force`] has resolved everything still waiting.
    pub fn settled(&self) -> watch::Receiver<bool> {
        self.settled.subscribe()
    }

    /// Materialize a resource that depends on nothing, then release its dependents.
    pub async fn discover_independent(&self, payload: P, bus: &EventBus) -> Result<()> {
        let key = payload.node_key();
        {
            let mut graph = self.graph.lock().await;
            if let Some(node) = graph.get_node(&key) {
                if node.is_full() || graph.node_state(&key) != Some(NodeState::Referenced) {
                    return Err(Error::duplicate(P::KIND, payload.path()));
                }
            }
            graph.add_node(Node::placeholder(key.clone()))?;
            graph.set_node_state(&key, NodeState::Declared)?;
        }

        let span = resource_span!(P::KIND, key);
        let result = self
            .limiter
            .run(self.materializer.materialize(&payload))
            .instrument(span)
            .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.graph.lock().await.set_node_state(&key, NodeState::Failed)?;
                self.metrics.record_outcome(P::KIND, Outcome::Failed);
                return Err(e);
            }
        };

        self.graph.lock().await.set_node_state(&key, NodeState::Materialized)?;

        let mut failures = Vec::new();
        if let Err(e) = bus.publish(Event::reconciled(outcome, payload)).await {
            failures.push(e);
        }
        if let Err(e) = self.fulfill(vec![key], bus).await {
            failures.push(e);
        }
        Error::aggregate(failures)
    }

    /// Record a resource that waits on `root`, materializing it if `root` is already there.
    pub async fn discover_dependent(
        &self,
        payload: P,
        root: NodeKey,
        bus: &EventBus,
    ) -> Result<()> {
        self.discover_dependent_on(payload, vec![root], bus).await
    }

    /// Record a resource that waits on every key in `roots`.
    ///
    /// The resource is materialized right away when all of them already are.
    pub async fn discover_dependent_on(
        &self,
        payload: P,
        roots: Vec<NodeKey>,
        bus: &EventBus,
    ) -> Result<()> {
        let key = payload.node_key();
        let path = payload.path();
        let ready = {
            let mut graph = self.graph.lock().await;
            for root in &roots {
                graph.add_node(Node::placeholder(root.clone()))?;
            }

            let referenced_only = graph.get_node(&key).is_some_and(Node::is_placeholder)
                && graph.node_state(&key) == Some(NodeState::Referenced);
            if referenced_only {
                graph.relabel_nodes([(key.clone(), Node::full(payload))])?;
            } else if graph.contains(&key) {
                return Err(Error::duplicate(P::KIND, path));
            } else {
                graph.add_node(Node::full(payload))?;
            }
            graph.set_node_state(&key, NodeState::Declared)?;
            for root in &roots {
                graph.add_edge(root, &key, EdgeStatus::Unsatisfied)?;
            }

            graph.are_roots_materialized(&key)
        };

        let Some(root) = roots.into_iter().next() else {
            return Err(Error::internal(format!("{} '{}' declared no roots", P::KIND, path)));
        };
        if !ready {
            debug!(kind = %P::KIND, dependent = %key, "Waiting for roots to be materialized");
            return Ok(());
        }
        self.fulfill(vec![root], bus).await
    }

    /// Record that `key` exists on the backend and release its dependents.
    pub async fn root_materialized(&self, key: NodeKey, bus: &EventBus) -> Result<()> {
        {
            let mut graph = self.graph.lock().await;
            graph.add_node(Node::placeholder(key.clone()))?;
            graph.set_node_state(&key, NodeState::Materialized)?;
        }
        self.fulfill(vec![key], bus).await
    }

    /// Materialize every unblocked dependent of `roots` and cascade down the chains.
    ///
    /// Roots are processed from a FIFO worklist; each materialized dependent is queued as
    /// a root in turn. A dependent with other roots still outstanding stays blocked.
    /// Failures stay with their resource and are returned together once the worklist is
    /// drained.
    pub async fn fulfill(&self, roots: Vec<NodeKey>, bus: &EventBus) -> Result<()> {
        let mut queue: VecDeque<NodeKey> = roots.into();
        let mut failures = Vec::new();

        while let Some(root) = queue.pop_front() {
            let jobs = {
                let mut graph = self.graph.lock().await;
                let mut jobs = Vec::new();
                for node in graph.find_unsatisfied_nodes(&root) {
                    let key = node.key();
                    let Node::Full(payload) = node else {
                        warn!(
                            kind = %P::KIND,
                            root = %root,
                            dependent = %key,
                            "Dependent has no payload, leaving it blocked"
                        );
                        continue;
                    };
                    if graph.node_state(&key) == Some(NodeState::Failed) {
                        continue;
                    }
                    if !graph.are_roots_materialized(&key) {
                        debug!(
                            kind = %P::KIND,
                            root = %root,
                            dependent = %key,
                            "Dependent still waits on another root"
                        );
                        continue;
                    }
                    graph.set_inbound_status(&key, EdgeStatus::InProcess);
                    jobs.push(Job { root: root.clone(), key, payload });
                }
                jobs
            };

            if jobs.is_empty() {
                continue;
            }
            debug!(
                kind = %P::KIND,
                root = %root,
                dependents = jobs.len(),
                "Fulfilling dependents"
            );

            let (done, errors) = self.run_batch(jobs, &self.limiter, bus, false).await?;
            failures.extend(errors);

            {
                let mut graph = self.graph.lock().await;
                let declared = graph.get_node(&root).is_some_and(Node::is_full);
                if declared && graph.is_materialized(&root) {
                    graph.relabel_nodes([(root.clone(), Node::placeholder(root.clone()))])?;
                }
            }
            queue.extend(done);
        }

        Error::aggregate(failures)
    }

    /// Resolve every dependent still blocked after discovery, then mark the cascade settled.
    ///
    /// Dependents of failed roots are failed in turn. Chain heads, whose outstanding roots
    /// are not waiting on anything themselves, are materialized on the assumption that
    /// those roots exist outside the declared resources; chains behind them follow through
    /// [`Self::fulfill`].
    pub async fn force(&self, bus: &EventBus) -> Result<()> {
        let result = self.force_blocked(bus).await;
        self.settled.send_replace(true);
        result
    }

    async fn force_blocked(&self, bus: &EventBus) -> Result<()> {
        let unbounded = ConcurrencyLimiter::unbounded();
        let mut skipped: HashSet<(NodeKey, NodeKey)> = HashSet::new();
        let mut failures = Vec::new();

        loop {
            let jobs = {
                let mut graph = self.graph.lock().await;
                self.propagate_failures(&mut graph)?;

                let mut seen = HashSet::new();
                let mut candidates = Vec::new();
                for (root, dependent) in graph.find_all_unsatisfied_edges() {
                    if graph.node_state(&dependent) == Some(NodeState::Failed) {
                        continue;
                    }
                    match graph.get_node(&dependent) {
                        Some(Node::Full(payload)) => {
                            if graph.is_materialized(&root) || !seen.insert(dependent.clone()) {
                                continue;
                            }
                            let payload = payload.clone();
                            candidates.push(Job { root, key: dependent, payload });
                        }
                        _ => {
                            if skipped.insert((root.clone(), dependent.clone())) {
                                warn!(
                                    kind = %P::KIND,
                                    root = %root,
                                    dependent = %dependent,
                                    "Dependent payload was already released, cannot force it"
                                );
                                self.metrics.record_outcome(P::KIND, Outcome::Skipped);
                            }
                        }
                    }
                }

                let (heads, waiting): (Vec<_>, Vec<_>) =
                    candidates.into_iter().partition(|job| is_chain_head(&graph, &job.key));
                let jobs = if heads.is_empty() && !waiting.is_empty() {
                    warn!(
                        kind = %P::KIND,
                        dependents = waiting.len(),
                        "Dependency cycle detected, forcing every member"
                    );
                    waiting
                } else {
                    heads
                };

                for job in &jobs {
                    graph.set_inbound_status(&job.key, EdgeStatus::InProcess);
                }
                jobs
            };

            if jobs.is_empty() {
                break;
            }

            for job in &jobs {
                info!(
                    kind = %P::KIND,
                    root = %job.root,
                    dependent = %job.key,
                    "Root was never materialized, forcing dependent"
                );
                self.metrics.record_forced_attempt(P::KIND);
            }

            let (done, errors) = self.run_batch(jobs, &unbounded, bus, true).await?;
            failures.extend(errors);
            if let Err(e) = self.fulfill(done, bus).await {
                failures.push(e);
            }
        }

        Error::aggregate(failures)
    }

    /// Mark every not-yet-satisfied dependent of a failed node failed, transitively.
    fn propagate_failures(&self, graph: &mut DependencyGraph<P>) -> Result<()> {
        loop {
            let doomed: Vec<(NodeKey, NodeKey)> = graph
                .edges()
                .iter()
                .filter(|edge| edge.status != EdgeStatus::Satisfied)
                .filter(|edge| graph.node_state(&edge.root) == Some(NodeState::Failed))
                .filter(|edge| graph.node_state(&edge.dependent) != Some(NodeState::Failed))
                .map(|edge| (edge.root.clone(), edge.dependent.clone()))
                .collect();

            if doomed.is_empty() {
                return Ok(());
            }
            for (root, dependent) in doomed {
                if graph.node_state(&dependent) == Some(NodeState::Failed) {
                    continue;
                }
                warn!(
                    kind = %P::KIND,
                    root = %root,
                    dependent = %dependent,
                    "Root failed to materialize, skipping dependent"
                );
                graph.set_node_state(&dependent, NodeState::Failed)?;
                self.metrics.record_outcome(P::KIND, Outcome::Skipped);
            }
        }
    }

    /// Materialize `jobs` concurrently, then settle the graph and announce the successes.
    ///
    /// Returns the keys that materialized and the failures, wrapped as forced failures when
    /// `forced` is set.
    async fn run_batch(
        &self,
        jobs: Vec<Job<P>>,
        limiter: &ConcurrencyLimiter,
        bus: &EventBus,
        forced: bool,
    ) -> Result<(Vec<NodeKey>, Vec<Error>)> {
        let results = join_all(jobs.iter().map(|job| {
            let span = resource_span!(P::KIND, job.key, root = %job.root, forced = forced);
            limiter.run(self.materializer.materialize(&job.payload)).instrument(span)
        }))
        .await;

        let mut done = Vec::new();
        let mut announcements = Vec::new();
        let mut failures = Vec::new();
        {
            let mut graph = self.graph.lock().await;
            for (job, result) in jobs.into_iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        graph.set_inbound_status(&job.key, EdgeStatus::Satisfied);
                        graph.set_node_state(&job.key, NodeState::Materialized)?;
                        let demoted = Node::placeholder(job.key.clone());
                        graph.relabel_nodes([(job.key.clone(), demoted)])?;
                        done.push(job.key);
                        announcements.push(Event::reconciled(outcome, job.payload));
                    }
                    Err(e) => {
                        warn!(
                            kind = %P::KIND,
                            root = %job.root,
                            dependent = %job.key,
                            error = %e,
                            "Failed to materialize dependent"
                        );
                        graph.set_node_state(&job.key, NodeState::Failed)?;
                        if forced {
                            self.metrics.record_outcome(P::KIND, Outcome::ForcedFailed);
                            failures.push(Error::forced(job.payload.path(), e));
                        } else {
                            self.metrics.record_outcome(P::KIND, Outcome::Failed);
                            failures.push(e);
                        }
                    }
                }
            }
        }

        let published = join_all(announcements.into_iter().map(|event| bus.publish(event))).await;
        failures.extend(published.into_iter().filter_map(|result| result.err()));

        Ok((done, failures))
    }
}

/// Whether none of the roots `dependent` still waits on is itself waiting on anything.
fn is_chain_head<P: Declared>(graph: &DependencyGraph<P>, dependent: &NodeKey) -> bool {
    graph
        .roots_of(dependent)
        .iter()
        .filter(|root| !graph.is_materialized(root))
        .all(|root| !graph.has_pending_inbound(root))
}

/// Shared handle processors keep in their event handlers
pub type SharedCascade<P, M> = Arc<Cascade<P, M>>;
