//! In-flight task accounting for the shutdown drain.
//!
//! Every dispatched task holds a [`WorkerGuard`]; the registry count is the number
//! of live guards. [`WorkerRegistry::wait_until_zero`] is what the lifecycle
//! controller blocks on while draining.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    active: AtomicUsize,
    drained: Notify,
}

/// Shared counter of in-flight workers. Cloning shares the same counter.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    inner: Arc<Inner>,
}

/// Registration of one in-flight worker. Deregisters on drop, including when the
/// owning task panics or is aborted.
#[derive(Debug)]
#[must_use = "the worker is deregistered as soon as the guard is dropped"]
pub struct WorkerGuard {
    inner: Arc<Inner>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker and returns the guard that deregisters it.
    pub fn register(&self) -> WorkerGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        WorkerGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of workers currently registered.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Completes once no workers are registered.
    ///
    /// Workers registered after the call also have to finish before it returns.
    pub async fn wait_until_zero(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            // Register interest before reading the count so a concurrent final
            // deregistration cannot slip between the check and the await.
            notified.as_mut().enable();

            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let previous = self.inner.active.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}
