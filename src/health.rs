//! Side-channel liveness server.
//!
//! Runs on its own port with its own lifecycle: started before the event core and
//! stopped after it, so probes keep answering through the whole drain.
//!
//! Endpoints:
//! - `GET /health` – Liveness
//! - `GET /ready` – Readiness

use std::net::SocketAddr;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument};

/// `GET /health`: Returns a static liveness payload.
#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy"
    }))
}

pub fn routes() -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/ready", get(get_health))
}

/// A running liveness server.
#[derive(Debug)]
pub struct HealthEndpoint {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl HealthEndpoint {
    /// Binds `addr` and starts serving in the background.
    pub async fn start(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let graceful = shutdown.clone().cancelled_owned();
        tracker.spawn(async move {
            if let Err(e) = axum::serve(listener, routes())
                .with_graceful_shutdown(graceful)
                .await
            {
                error!(error = %e, "Health endpoint terminated with error");
            }
        });
        tracker.close();

        info!(addr = %local_addr, "Health endpoint started");
        Ok(Self {
            local_addr,
            shutdown,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the server and waits until it has shut down.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.wait().await;
        info!(addr = %self.local_addr, "Health endpoint stopped");
    }
}
