use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Turns the first SIGTERM, SIGINT or SIGQUIT into a cancelled token.
///
/// The token is a child of the root passed to [`SigDown::try_new`], so cancelling
/// the root has the same effect as a signal.
#[derive(Debug)]
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers and spawns the listener task.
    ///
    /// Returns an error if signal registration fails.
    pub fn try_new(root: &CancellationToken) -> Result<Self, std::io::Error> {
        let token = root.child_token();
        let inner = token.clone();
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigquit = signal(SignalKind::quit())?;

            task_tracker.spawn(async move {
                tokio::select! {
                    _ = inner.cancelled() => return,
                    _ = sigterm.recv() => info!(signal = "SIGTERM", "Received termination signal"),
                    _ = sigint.recv() => info!(signal = "SIGINT", "Received termination signal"),
                    _ = sigquit.recv() => info!(signal = "SIGQUIT", "Received termination signal"),
                }
                inner.cancel();
            });
        }

        #[cfg(not(unix))]
        {
            task_tracker.spawn(async move {
                tokio::select! {
                    _ = inner.cancelled() => return,
                    result = tokio::signal::ctrl_c() => match result {
                        Ok(()) => info!(signal = "ctrl-c", "Received termination signal"),
                        Err(err) => {
                            tracing::error!(error = %err, "Unable to listen for shutdown signal");
                            return;
                        }
                    },
                }
                inner.cancel();
            });
        }

        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: token,
        })
    }

    /// Returns a clone of the cancellation token for distributing to subsystems.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits for a shutdown signal and ensures the signal handler task completes.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }

    /// Stops listening for signals and waits for the listener task to exit.
    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        self.task_tracker.wait().await;
    }
}
