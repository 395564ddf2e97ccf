//! Cancellation tokens whose timeout starts only after another token fires.
//!
//! [`then_with_timeout`] derives a child of `parent` that is cancelled when:
//! - `parent` is cancelled, or
//! - [`ThenTimeout::cancel`] is called, or
//! - `wait` is cancelled and `timeout` then elapses.
//!
//! Chaining two of these (the second waiting on the first) gives a two-phase
//! deadline where skipping the first phase also skips its remaining window:
//!
//! ```text
//! notify ──fires──> [work grace] ──> work ──fires──> [cleanup] ──> reply
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Owning handle for the monitor task behind a token produced by [`then_with_timeout`].
///
/// Dropping the handle does not cancel the token; the monitor then runs until the
/// parent is cancelled or the timeout expires.
#[derive(Debug)]
pub struct ThenTimeout {
    name: String,
    token: CancellationToken,
    tracker: TaskTracker,
}

/// Creates a token that is cancelled `timeout` after `wait` is cancelled, or as soon
/// as `parent` is cancelled.
///
/// Returns the token together with the handle that cancels it.
///
/// # Panics
///
/// Panics if called outside a tokio runtime, since the monitor task is spawned
/// immediately.
pub fn then_with_timeout(
    parent: &CancellationToken,
    wait: CancellationToken,
    timeout: Duration,
    name: impl Into<String>,
) -> (CancellationToken, ThenTimeout) {
    let name = name.into();
    debug!(name = %name, ?timeout, "Creating then-with-timeout token");

    let token = parent.child_token();
    let tracker = TaskTracker::new();

    let monitor = token.clone();
    let monitor_name = name.clone();
    tracker.spawn(async move {
        // Whatever ends the monitor, the token ends with it.
        let _cancel_on_exit = monitor.clone().drop_guard();

        tokio::select! {
            biased;
            _ = monitor.cancelled() => return,
            _ = wait.cancelled() => {}
        }

        debug!(name = %monitor_name, "Timeout of then-with-timeout token triggered");

        if !timeout.is_zero() {
            tokio::select! {
                biased;
                _ = monitor.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }
        }

        debug!(name = %monitor_name, "Then-with-timeout token expired");
    });
    tracker.close();

    let handle = ThenTimeout {
        name,
        token: token.clone(),
        tracker,
    };
    (token, handle)
}

impl ThenTimeout {
    /// Cancels the token and waits until the monitor task has exited.
    ///
    /// Safe to call more than once.
    pub async fn cancel(&self) {
        debug!(name = %self.name, "Cancelling then-with-timeout token");
        self.token.cancel();
        self.tracker.wait().await;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the monitor task has exited.
    pub fn is_finished(&self) -> bool {
        self.tracker.is_empty()
    }
}
