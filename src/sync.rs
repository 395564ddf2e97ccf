//! Optional periodic background synchronization.
//!
//! Runs alongside the event receiver and is registered as a worker, so the drain
//! also waits for an in-progress synchronization round. A new round is never
//! started once the notify token is cancelled, and a running one is abandoned
//! when the work token is.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// A long-running task started with the event core.
pub trait BackgroundSync: Send + 'static {
    /// Runs until `notify` is cancelled; in-progress work may continue until
    /// `work` is cancelled.
    fn run(
        self,
        notify: CancellationToken,
        work: CancellationToken,
    ) -> impl Future<Output = ()> + Send;
}

/// One synchronization round.
pub trait SyncJob: Send + Sync + 'static {
    type Error: Display + Send;

    fn synchronize(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Runs a [`SyncJob`] on a fixed interval.
#[derive(Debug, Clone)]
pub struct PeriodicSync<J> {
    job: J,
    interval: Duration,
}

impl<J: SyncJob> PeriodicSync<J> {
    pub fn new(job: J, interval: Duration) -> Self {
        Self { job, interval }
    }
}

impl<J: SyncJob> BackgroundSync for PeriodicSync<J> {
    async fn run(self, notify: CancellationToken, work: CancellationToken) {
        info!(interval = ?self.interval, "Starting background synchronization");
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = notify.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = work.cancelled() => {
                    warn!("Synchronization round abandoned, work period expired");
                    break;
                }
                result = self.job.synchronize() => match result {
                    Ok(()) => debug!("Synchronization round completed"),
                    Err(e) => warn!(error = %e, "Synchronization round failed"),
                },
            }
        }

        info!("Background synchronization stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TargetProbeError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: Url, status: u16 },
}

/// Checks that the forwarding target is reachable.
#[derive(Debug, Clone)]
pub struct TargetProbe {
    client: Client,
    url: Url,
}

impl TargetProbe {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

impl SyncJob for TargetProbe {
    type Error = TargetProbeError;

    async fn synchronize(&self) -> Result<(), TargetProbeError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|source| TargetProbeError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        // Anything but a server error means the target is up.
        if status.is_server_error() {
            return Err(TargetProbeError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        debug!(url = %self.url, status = status.as_u16(), "Forward target reachable");
        Ok(())
    }
}
