//! Bounded fan-out for concurrent work.
//!
//! A [`ConcurrencyLimiter`] caps how many futures submitted through it run at once. The
//! unbounded variant admits everything and exists so callers can share one code path
//! whether or not a limit was configured.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Caps the number of in-flight futures submitted through [`ConcurrencyLimiter::run`].
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    permits: Option<Arc<Semaphore>>,
    limit: Option<usize>,
}

impl ConcurrencyLimiter {
    /// A limiter admitting at most `limit` concurrent futures.
    ///
    /// A limit of `0` means unbounded.
    pub fn bounded(limit: usize) -> Self {
        if limit == 0 {
            return Self::unbounded();
        }
        Self { permits: Some(Arc::new(Semaphore::new(limit))), limit: Some(limit) }
    }

    /// A limiter that never blocks.
    pub fn unbounded() -> Self {
        Self { permits: None, limit: None }
    }

    /// Build from an optional configured limit, `None` and `Some(0)` being unbounded.
    pub fn from_limit(limit: Option<usize>) -> Self {
        limit.map_or_else(Self::unbounded, Self::bounded)
    }

    /// The configured limit, `None` when unbounded
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn is_bounded(&self) -> bool {
        self.permits.is_some()
    }

    /// Run `fut` once a permit is available, releasing the permit when it completes.
    pub async fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        // The semaphore is owned here and never closed, so acquisition only waits.
        let _permit = match &self.permits {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };
        fut.await
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::unbounded()
    }
}
