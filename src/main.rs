//! event-ingest HTTP entrypoint.
//!
//! This binary accepts CloudEvents over HTTP and hands each one to the
//! forwarding handler on its own task. On SIGTERM/SIGINT/SIGQUIT it stops
//! accepting and drains in-flight handlers within `GRACE_PERIOD_SECONDS`.
//!
//! Endpoints:
//! - `POST {RCV_PATH}` on `RCV_PORT` – Accept a CloudEvent
//! - `GET {RCV_PATH}` on `RCV_PORT` – Liveness
//! - `GET /health`, `GET /ready` on `HEALTH_PORT` – Liveness and readiness
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `RCV_PORT`, `RCV_PATH`, `HEALTH_PORT` control binding
//! - `GRACE_PERIOD_SECONDS` is the total shutdown budget
//! - `FORWARD_URL`, `REPLY_URL` configure the forwarding handler
//! - `SYNCHRONIZE_SERVICES` enables the periodic forward target probe
//! - `LOG_LEVEL` / `RUST_LOG` and `OTEL_*` control logging and trace export

use std::process::ExitCode;

use dotenvy::dotenv;
use reqwest::Client;
use tokio::net::TcpListener;

use event_ingest::forwarder::ForwardingHandler;
use event_ingest::from_env::Config;
use event_ingest::grace::GracePlan;
use event_ingest::health::HealthEndpoint;
use event_ingest::lifecycle::Lifecycle;
use event_ingest::sig_down::SigDown;
use event_ingest::sync::{PeriodicSync, TargetProbe};
use event_ingest::telemetry::Telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env variables
    dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to process env var: {e}");
            return ExitCode::FAILURE;
        }
    };

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_level(config.log_level.clone())
        .register();

    let code = serve(config).await;
    telemetry.shutdown();
    code
}

async fn serve(config: Config) -> ExitCode {
    let health = match HealthEndpoint::start(config.health_addr()).await {
        Ok(health) => health,
        Err(e) => {
            tracing::error!("Failed to start health endpoint on {}: {}", config.health_addr(), e);
            return ExitCode::FAILURE;
        }
    };

    let addr = config.receiver_addr();
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            health.stop().await;
            return ExitCode::FAILURE;
        }
    };

    let plan = GracePlan::from_total(config.grace_period_seconds);
    tracing::info!(
        grace_period_seconds = config.grace_period_seconds,
        work_grace_seconds = plan.work_grace_seconds(),
        cleanup_seconds = plan.cleanup_seconds(),
        "Computed shutdown plan"
    );

    let lifecycle = Lifecycle::new(plan).with_path(config.path.clone());

    let sig_down = match SigDown::try_new(lifecycle.root()) {
        Ok(sig_down) => sig_down,
        Err(e) => {
            tracing::error!("Failed to register signal handlers: {}", e);
            health.stop().await;
            return ExitCode::FAILURE;
        }
    };
    let lifecycle = lifecycle.with_health(health);
    let notify = sig_down.cancellation_token();

    let client = Client::new();
    let handler = ForwardingHandler::new(
        client.clone(),
        config.forward_url.clone(),
        config.reply_url.clone(),
    );

    let sync = match (&config.forward_url, config.synchronize_services) {
        (Some(url), true) => Some(PeriodicSync::new(
            TargetProbe::new(client, url.clone()),
            config.synchronize_interval,
        )),
        (None, true) => {
            tracing::warn!(
                "SYNCHRONIZE_SERVICES is set but FORWARD_URL is not, nothing to synchronize"
            );
            None
        }
        _ => None,
    };

    let code = lifecycle.run_with_sync(listener, handler, notify, sync).await;
    sig_down.stop().await;
    code
}
