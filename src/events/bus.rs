//! Typed publish/subscribe dispatch.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt};

use super::event::{Event, EventKind};
use crate::errors::{Error, Result};
use crate::utils::ConcurrencyLimiter;

/// Future returned by an event handler
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// An event handler. It receives the bus so it can publish follow-up events.
pub type Handler = Arc<dyn Fn(Event, EventBus) -> HandlerFuture + Send + Sync>;

struct BusInner {
    handlers: DashMap<EventKind, Vec<Handler>>,
    fanout_limit: Option<usize>,
}

/// Event registry and dispatcher.
///
/// Cloning is cheap and every clone shares the same registry. [`EventBus::publish`]
/// runs every handler registered for the event's kind concurrently and returns once all
/// of them have finished. A failing handler never cancels its siblings; the failures are
/// collected and returned together.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// A bus with unbounded handler fan-out.
    pub fn new() -> Self {
        Self::with_fanout_limit(None)
    }

    /// A bus running at most `limit` handlers of one publish call at once.
    ///
    /// `None` and `Some(0)` are unbounded. The limit applies per publish call, so a
    /// handler that publishes while holding a slot never waits on its own caller.
    pub fn with_fanout_limit(limit: Option<usize>) -> Self {
        Self { inner: Arc::new(BusInner { handlers: DashMap::new(), fanout_limit: limit }) }
    }

    /// Register `handler` for each of `kinds`.
    pub fn register<I, F, Fut>(&self, kinds: I, handler: F)
    where
        I: IntoIterator<Item = EventKind>,
        F: Fn(Event, EventBus) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event, bus| handler(event, bus).boxed());
        for kind in kinds {
            tracing::trace!(kind = %kind, "Registering event handler");
            self.inner.handlers.entry(kind).or_default().push(handler.clone());
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner.handlers.get(&kind).map_or(0, |handlers| handlers.len())
    }

    /// Deliver `event` to every matching handler and wait for all of them.
    ///
    /// # Errors
    ///
    /// A single handler failure is returned unchanged; several come back as
    /// [`Error::Batch`].
    pub async fn publish(&self, event: Event) -> Result<()> {
        let kind = event.kind();
        // Copy the handler list out so no registry guard is held across an await.
        let handlers: Vec<Handler> =
            self.inner.handlers.get(&kind).map(|entry| entry.clone()).unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(kind = %kind, "No handlers registered for event");
            return Ok(());
        }

        tracing::debug!(
            kind = %kind,
            handlers = handlers.len(),
            path = ?event.path(),
            "Publishing event"
        );

        let limiter = ConcurrencyLimiter::from_limit(self.inner.fanout_limit);
        let runs = handlers.iter().map(|handler| limiter.run(handler(event.clone(), self.clone())));
        let results = join_all(runs).await;

        Error::aggregate(results.into_iter().filter_map(|result| result.err()).collect())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.inner.handlers.len())
            .field("fanout_limit", &self.inner.fanout_limit)
            .finish()
    }
}
