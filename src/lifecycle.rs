//! Process-wide lifecycle: serve events, then drain within the grace period.
//!
//! Three tokens drive the shutdown:
//!
//! ```text
//! notify ─┐  cancelled by a termination signal (or root cancellation)
//!         └─ work  = notify + work grace     handlers should stop working
//!               └─ reply = work + cleanup    handlers should stop replying
//! ```
//!
//! The controller walks [`Phase`] in order and never sleeps on its own; every
//! transition is driven by one of these tokens or by the worker registry.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{EventDispatcher, EventHandler};
use crate::grace::GracePlan;
use crate::health::HealthEndpoint;
use crate::receiver;
use crate::registry::WorkerRegistry;
use crate::sync::BackgroundSync;
use crate::then_timeout::then_with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Accepting and dispatching events.
    Running,
    /// The notify token fired; the receiver no longer accepts events.
    SignalReceived,
    /// Waiting for in-flight handlers while the work grace period runs.
    Draining,
    /// Work grace over or drain complete; replies may still be sent.
    CleaningUp,
    /// All chained timeouts released; nothing of the core is left running.
    Terminated,
}

/// Background task type for [`Lifecycle::run`], which starts none.
#[derive(Debug, Clone, Copy)]
pub struct NoSync;

impl BackgroundSync for NoSync {
    async fn run(self, _notify: CancellationToken, _work: CancellationToken) {}
}

pub struct Lifecycle {
    plan: GracePlan,
    path: String,
    root: CancellationToken,
    registry: WorkerRegistry,
    phase: watch::Sender<Phase>,
    health: Option<HealthEndpoint>,
}

impl Lifecycle {
    pub fn new(plan: GracePlan) -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            plan,
            path: "/".to_string(),
            root: CancellationToken::new(),
            registry: WorkerRegistry::new(),
            phase,
            health: None,
        }
    }

    /// Path the receiver accepts events on.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Liveness endpoint to stop once the core has terminated.
    pub fn with_health(mut self, health: HealthEndpoint) -> Self {
        self.health = Some(health);
        self
    }

    /// Root of all tokens built by [`Lifecycle::run`]. Cancelling it ends every
    /// phase at once, skipping the grace periods.
    pub fn root(&self) -> &CancellationToken {
        &self.root
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn plan(&self) -> GracePlan {
        self.plan
    }

    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: Phase) {
        info!(?phase, in_flight = self.registry.active(), "Lifecycle phase changed");
        self.phase.send_replace(phase);
    }

    /// Serves events from `listener` until `notify` is cancelled, then drains.
    pub async fn run<H: EventHandler>(
        self,
        listener: TcpListener,
        handler: H,
        notify: CancellationToken,
    ) -> ExitCode {
        self.run_with_sync(listener, handler, notify, None::<NoSync>)
            .await
    }

    /// Like [`Lifecycle::run`], additionally running `sync` as a registered worker.
    pub async fn run_with_sync<H, S>(
        self,
        listener: TcpListener,
        handler: H,
        notify: CancellationToken,
        sync: Option<S>,
    ) -> ExitCode
    where
        H: EventHandler,
        S: BackgroundSync,
    {
        info!(
            work_grace = ?self.plan.work_grace(),
            cleanup = ?self.plan.cleanup(),
            "Starting event core"
        );

        // work is done after the grace period once notify is done
        let (work, stop_work) =
            then_with_timeout(&self.root, notify.clone(), self.plan.work_grace(), "work");
        // reply is done after the cleanup period once work is done
        let (reply, stop_reply) =
            then_with_timeout(&self.root, work.clone(), self.plan.cleanup(), "reply");

        if let Some(sync) = sync {
            let guard = self.registry.register();
            let (sync_notify, sync_work) = (notify.clone(), work.clone());
            tokio::spawn(async move {
                let _guard = guard;
                sync.run(sync_notify, sync_work).await;
            });
        }

        let dispatcher = Arc::new(EventDispatcher::new(
            handler,
            self.registry.clone(),
            work.clone(),
            reply.clone(),
        ));

        match listener.local_addr() {
            Ok(addr) => info!(%addr, path = %self.path, "Starting receiver"),
            Err(_) => info!(path = %self.path, "Starting receiver"),
        }
        let path = self.path.clone();
        let serve_notify = notify.clone();
        let mut receiver = Some(tokio::spawn(async move {
            receiver::serve(listener, &path, dispatcher, serve_notify).await
        }));

        tokio::select! {
            biased;
            _ = notify.cancelled() => {}
            // axum only watches notify; a root cancellation has to end Running as well
            _ = self.root.cancelled() => {}
            joined = Self::join_receiver(&mut receiver) => {
                if let Some(joined) = joined {
                    log_receiver_exit(joined);
                }
            }
        }

        // No new events from here on, whatever ended Running.
        notify.cancel();
        self.enter(Phase::SignalReceived);

        self.enter(Phase::Draining);
        info!("Waiting for existing processing to finish");
        let drained = tokio::select! {
            biased;
            _ = self.settle(&mut receiver) => true,
            _ = work.cancelled() => false,
        };

        self.enter(Phase::CleaningUp);
        if !drained {
            tokio::select! {
                biased;
                _ = self.settle(&mut receiver) => {}
                _ = reply.cancelled() => {
                    warn!(
                        abandoned = self.registry.active(),
                        "Cleanup period expired, abandoning remaining handlers"
                    );
                }
            }
        }
        if let Some(task) = receiver.take() {
            warn!("Closing receiver connections still open after the cleanup period");
            task.abort();
        }

        stop_work.cancel().await;
        stop_reply.cancel().await;

        if let Some(health) = &self.health {
            health.stop().await;
        }

        self.enter(Phase::Terminated);
        info!("Shutdown complete");
        ExitCode::SUCCESS
    }

    /// Waits for open receiver connections to finish, then for the registry to
    /// reach zero. Requests still being read may dispatch events, so the
    /// receiver goes first.
    async fn settle(&self, receiver: &mut Option<JoinHandle<io::Result<()>>>) {
        if let Some(joined) = Self::join_receiver(receiver).await {
            log_receiver_exit(joined);
        }
        self.registry.wait_until_zero().await;
    }

    /// Resolves once the receiver task has ended, leaving `None` behind.
    /// Cancel safe: the handle stays in place until the task is joined.
    async fn join_receiver(
        receiver: &mut Option<JoinHandle<io::Result<()>>>,
    ) -> Option<Result<io::Result<()>, JoinError>> {
        let task = receiver.as_mut()?;
        let joined = task.await;
        *receiver = None;
        Some(joined)
    }
}

fn log_receiver_exit(joined: Result<io::Result<()>, JoinError>) {
    match joined {
        Ok(Ok(())) => debug!("Receiver stopped"),
        Ok(Err(e)) => error!(error = %e, "Receiver finished with error"),
        Err(e) => error!(error = %e, "Receiver task failed"),
    }
}
