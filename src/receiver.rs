//! HTTP listener accepting CloudEvents.
//!
//! Endpoints (mounted at the configured path, `/` by default):
//! - `POST {path}` – Accept a structured or binary CloudEvent; `202` once dispatched
//! - `GET {path}` – Liveness payload, so probes can target the receiver port too
//!
//! The request is acknowledged as soon as the event is handed to the
//! [`EventDispatcher`]; handler completion is never awaited here.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::dispatcher::{EventDispatcher, EventHandler};
use crate::event::Event;
use crate::health;

pub fn routes<H: EventHandler>(path: &str) -> Router<Arc<EventDispatcher<H>>> {
    Router::new().route(path, get(health::get_health).post(post_event::<H>))
}

/// `POST {path}`: Decode the event and dispatch it.
#[instrument(skip_all)]
pub async fn post_event<H: EventHandler>(
    State(dispatcher): State<Arc<EventDispatcher<H>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match Event::from_http(&headers, &body) {
        Ok(event) => {
            debug!(event_id = %event.id, event_type = %event.event_type, "Received event");
            dispatcher.dispatch(event);
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            warn!(error = %e, body_len = body.len(), "Rejected inbound event");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Serves events on `listener` until `notify` is cancelled.
///
/// Returns once the accept loop has stopped and open connections have finished
/// their current request.
pub async fn serve<H: EventHandler>(
    listener: TcpListener,
    path: &str,
    dispatcher: Arc<EventDispatcher<H>>,
    notify: CancellationToken,
) -> std::io::Result<()> {
    let app = routes::<H>(path)
        .with_state(dispatcher)
        .layer(crate::telemetry::http_tracing());

    axum::serve(listener, app)
        .with_graceful_shutdown(notify.cancelled_owned())
        .await
}
