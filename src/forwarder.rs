//! Reference [`EventHandler`] relaying events to a downstream HTTP endpoint.
//!
//! Each event goes through two phases:
//! 1. **work**: the event is POSTed as a structured CloudEvent to the forward
//!    target; this phase is abandoned once the work token is cancelled.
//! 2. **reply**: a short status report is POSTed to the reply target, if one is
//!    configured; this phase may run until the reply token is cancelled.
//!
//! A failed or expired work phase is still reported in the reply phase, so the
//! downstream side learns about every accepted event.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::dispatcher::{EventContext, EventHandler};
use crate::event::Event;

const CLOUDEVENTS_JSON: &str = "application/cloudevents+json";

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Work period expired before event {0} was forwarded")]
    WorkExpired(String),

    #[error("Reply period expired before the report for event {0} was sent")]
    ReplyExpired(String),

    #[error("{url} answered with status {status}")]
    Status { url: Url, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Succeeded,
    Failed,
}

/// Report sent in the reply phase.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyReport<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ForwardingHandler {
    client: Client,
    forward_url: Option<Url>,
    reply_url: Option<Url>,
}

impl ForwardingHandler {
    pub fn new(client: Client, forward_url: Option<Url>, reply_url: Option<Url>) -> Self {
        Self {
            client,
            forward_url,
            reply_url,
        }
    }

    async fn forward(&self, url: &Url, event: &Event) -> Result<(), ForwardError> {
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, CLOUDEVENTS_JSON)
            .body(serde_json::to_vec(event)?)
            .send()
            .await?;
        check_status(url, response.status())
    }

    async fn reply(&self, url: &Url, report: &ReplyReport<'_>) -> Result<(), ForwardError> {
        let response = self.client.post(url.clone()).json(report).send().await?;
        check_status(url, response.status())
    }
}

fn check_status(url: &Url, status: reqwest::StatusCode) -> Result<(), ForwardError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ForwardError::Status {
            url: url.clone(),
            status: status.as_u16(),
        })
    }
}

impl EventHandler for ForwardingHandler {
    type Error = ForwardError;

    async fn handle(&self, ctx: EventContext, event: Event) -> Result<(), ForwardError> {
        let Some(forward_url) = &self.forward_url else {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                source = %event.source,
                "Received event, no forward target configured"
            );
            return Ok(());
        };

        let outcome = tokio::select! {
            biased;
            _ = ctx.work.cancelled() => Err(ForwardError::WorkExpired(event.id.clone())),
            result = self.forward(forward_url, &event) => result,
        };
        debug!(url = %forward_url, ok = outcome.is_ok(), "Forward attempt finished");

        let Some(reply_url) = &self.reply_url else {
            return outcome;
        };

        let report = ReplyReport {
            id: &event.id,
            event_type: &event.event_type,
            status: if outcome.is_ok() {
                ReplyStatus::Succeeded
            } else {
                ReplyStatus::Failed
            },
            message: outcome.as_ref().err().map(ToString::to_string),
        };

        let replied = tokio::select! {
            biased;
            _ = ctx.reply.cancelled() => Err(ForwardError::ReplyExpired(event.id.clone())),
            result = self.reply(reply_url, &report) => result,
        };

        // The work outcome is the more interesting error to surface.
        outcome.and(replied)
    }
}
