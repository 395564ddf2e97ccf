//! CloudEvents ingestion with a bounded, phase-chained graceful shutdown.
//!
//! Events arriving on the HTTP [`receiver`] are acknowledged immediately and
//! handled on their own tasks by an [`dispatcher::EventHandler`]. On a termination
//! signal the [`lifecycle::Lifecycle`] stops accepting, lets in-flight handlers
//! finish within a work grace period, gives them a further cleanup period to send
//! replies, and then exits.
//!
//! The timing comes from [`grace::GracePlan`], and the phase deadlines from
//! chained [`then_timeout::then_with_timeout`] tokens.

pub mod dispatcher;
pub mod event;
pub mod forwarder;
pub mod from_env;
pub mod grace;
pub mod health;
pub mod lifecycle;
pub mod receiver;
pub mod registry;
pub mod sig_down;
pub mod sync;
pub mod telemetry;
pub mod then_timeout;
