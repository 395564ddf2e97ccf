//! Fan-out of accepted events into independently scheduled handler tasks.
//!
//! [`EventDispatcher::dispatch`] never waits on the handler: the transport can
//! acknowledge the request right away while the work continues in its own task,
//! bounded only by the work and reply tokens it is given.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

use crate::event::Event;
use crate::registry::WorkerRegistry;

/// Cancellation handles passed to each handler invocation.
///
/// - `work` is cancelled when the work grace period after a shutdown signal expires.
/// - `reply` is cancelled when the cleanup period after that expires.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub work: CancellationToken,
    pub reply: CancellationToken,
}

/// Business logic invoked for every accepted event.
pub trait EventHandler: Send + Sync + 'static {
    /// The error type returned by this handler. Only ever logged.
    type Error: Display + Send;

    /// Handles one event.
    ///
    /// Work that must stop when the grace period runs out should watch
    /// `ctx.work`; final replies should still be sent while `ctx.reply` is live.
    fn handle(
        &self,
        ctx: EventContext,
        event: Event,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<T: EventHandler> EventHandler for Arc<T> {
    type Error = T::Error;

    fn handle(
        &self,
        ctx: EventContext,
        event: Event,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.as_ref().handle(ctx, event)
    }
}

/// Spawns one task per event and keeps the worker registry in step.
pub struct EventDispatcher<H> {
    handler: Arc<H>,
    registry: WorkerRegistry,
    work: CancellationToken,
    reply: CancellationToken,
}

impl<H: EventHandler> EventDispatcher<H> {
    pub fn new(
        handler: H,
        registry: WorkerRegistry,
        work: CancellationToken,
        reply: CancellationToken,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            registry,
            work,
            reply,
        }
    }

    /// Hands `event` to the handler on a new task and returns without waiting.
    ///
    /// The task is registered before this returns and deregistered when it ends,
    /// whatever the outcome.
    pub fn dispatch(&self, event: Event) {
        let guard = self.registry.register();
        let handler = Arc::clone(&self.handler);
        let ctx = EventContext {
            work: self.work.child_token(),
            reply: self.reply.child_token(),
        };
        let span = info_span!(
            "event",
            event_id = %event.id,
            event_type = %event.event_type,
        );

        tokio::spawn(
            async move {
                let _guard = guard;
                debug!("Handling event");
                match handler.handle(ctx, event).await {
                    Ok(()) => debug!("Event handled"),
                    Err(e) => error!(error = %e, "Event handler returned an error"),
                }
            }
            .instrument(span),
        );
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }
}
