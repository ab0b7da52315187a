//! Publishes parsed resources onto the event bus and collects what happened to them.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::DispatchConfig;
use crate::domain::{Resource, ResourceKind};
use crate::errors::{Error, Result};
use crate::events::{Event, EventBus, EventKind};
use crate::observability::{MetricsRecorder, Outcome};
use crate::processor::Processors;
use crate::secrets::SecretsBackend;
use crate::utils::ConcurrencyLimiter;

/// One resource's reported outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub kind: ResourceKind,
    pub path: String,
    pub outcome: Outcome,
}

/// Lifecycle events observed during one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ApplyReport {
    entries: Vec<ReportEntry>,
}

impl ApplyReport {
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Paths of `kind` resources that reached `outcome`, in completion order
    pub fn paths(&self, kind: ResourceKind, outcome: Outcome) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == kind && entry.outcome == outcome)
            .map(|entry| entry.path.clone())
            .collect()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|entry| entry.outcome == outcome).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn outcome_of(kind: EventKind) -> Option<Outcome> {
    match kind {
        EventKind::Created(_) => Some(Outcome::Created),
        EventKind::Updated(_) => Some(Outcome::Updated),
        EventKind::Unchanged(_) => Some(Outcome::Unchanged),
        EventKind::Discovered(_) | EventKind::PostProcessRequested => None,
    }
}

/// Drives one reconciliation run over a bus with processors installed.
pub struct Dispatcher {
    bus: EventBus,
    max_dispatch: usize,
    report: Arc<Mutex<ApplyReport>>,
    metrics: MetricsRecorder,
}

impl Dispatcher {
    /// Create a dispatcher and subscribe its report collector to every lifecycle event.
    ///
    /// `max_dispatch` bounds how many discoveries are in flight at once; `0` is unbounded.
    pub fn new(bus: EventBus, max_dispatch: usize) -> Self {
        let report = Arc::new(Mutex::new(ApplyReport::default()));
        let metrics = MetricsRecorder::new();

        let collector = report.clone();
        let recorder = metrics.clone();
        bus.register(EventKind::all_outcomes(), move |event, _| {
            let collector = collector.clone();
            let recorder = recorder.clone();
            async move {
                let outcome = outcome_of(event.kind());
                let (Some(outcome), Some(resource)) = (outcome, event.resource()) else {
                    return Ok(());
                };
                recorder.record_outcome(resource.kind(), outcome);
                collector.lock().await.entries.push(ReportEntry {
                    kind: resource.kind(),
                    path: resource.absolute_path(),
                    outcome,
                });
                Ok(())
            }
        });

        Self { bus, max_dispatch, report, metrics }
    }

    /// A bus with every processor installed over `backend`, and a dispatcher for it.
    ///
    /// Discovery and the processors' backend calls are bounded separately, each by
    /// `max_dispatch`.
    pub fn for_backend(
        backend: Arc<dyn SecretsBackend>,
        config: &DispatchConfig,
    ) -> (Self, Processors) {
        let bus = EventBus::with_fanout_limit(config.fanout_limit);
        let limiter = ConcurrencyLimiter::bounded(config.max_dispatch);
        let processors = Processors::install(&bus, backend, limiter);
        (Self::new(bus, config.max_dispatch), processors)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish one `Discovered` per resource, then the post-process request.
    ///
    /// Post-processing runs even when discovery failed, so every resource gets its
    /// attempt. All failures are returned together.
    pub async fn dispatch(&self, resources: Vec<Resource>) -> Result<ApplyReport> {
        let started = Instant::now();
        let total = resources.len();
        let limiter = ConcurrencyLimiter::bounded(self.max_dispatch);

        info!(
            resources = total,
            max_dispatch = self.max_dispatch,
            "Dispatching discovered resources"
        );

        let discoveries = resources
            .into_iter()
            .map(|resource| limiter.run(self.bus.publish(Event::Discovered(resource))));
        let results = join_all(discoveries).await;
        let mut failures: Vec<Error> =
            results.into_iter().filter_map(|result| result.err()).collect();

        if let Err(e) = self.bus.publish(Event::PostProcessRequested).await {
            failures.push(e);
        }

        let outcome = Error::aggregate(failures);
        self.metrics.record_run(total, started.elapsed().as_secs_f64(), outcome.is_ok());

        let report = self.report().await;
        info!(
            created = report.count(Outcome::Created),
            updated = report.count(Outcome::Updated),
            unchanged = report.count(Outcome::Unchanged),
            success = outcome.is_ok(),
            "Dispatch finished"
        );
        outcome.map(|()| report)
    }

    /// Everything reported so far, including from a dispatch that failed
    pub async fn report(&self) -> ApplyReport {
        self.report.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PasswordPolicy;

    #[tokio::test]
    async fn test_dispatch_collects_outcomes_and_post_processes() {
        let bus = EventBus::new();
        let post_processed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        bus.register([EventKind::Discovered(ResourceKind::PasswordPolicy)], |event, bus| async move {
            let resource = event.resource().cloned().ok_or_else(|| Error::internal("missing payload"))?;
            bus.publish(Event::Unchanged(resource)).await
        });
        let flag = post_processed.clone();
        bus.register([EventKind::PostProcessRequested], move |_, _| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        });

        let dispatcher = Dispatcher::new(bus, 1);
        let report = dispatcher
            .dispatch(vec![
                PasswordPolicy::with_charset("a", 10, "x").into(),
                PasswordPolicy::with_charset("b", 10, "x").into(),
            ])
            .await
            .unwrap();

        assert!(post_processed.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(report.count(Outcome::Unchanged), 2);
        let mut paths = report.paths(ResourceKind::PasswordPolicy, Outcome::Unchanged);
        paths.sort();
        assert_eq!(paths, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_post_process_runs_after_failed_discovery() {
        let bus = EventBus::new();
        let post_processed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        bus.register([EventKind::Discovered(ResourceKind::PasswordPolicy)], |_, _| async {
            Err(Error::internal("boom"))
        });
        let flag = post_processed.clone();
        bus.register([EventKind::PostProcessRequested], move |_, _| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        });

        let dispatcher = Dispatcher::new(bus, 0);
        let err = dispatcher.dispatch(vec![PasswordPolicy::with_charset("a", 10, "x").into()]).await.unwrap_err();

        assert!(matches!(err, Error::Internal(_)));
        assert!(post_processed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
