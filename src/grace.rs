//! Splitting the operator's grace period into work and cleanup extensions.

use std::time::Duration;

/// Seconds kept back from the grace period for process teardown.
pub const SLACK_SECONDS: u64 = 5;

/// Upper bound for the cleanup (reply) extension.
pub const DESIRED_CLEANUP_SECONDS: u64 = 5;

/// How long in-flight work may continue after a shutdown signal, and how long
/// replies may still be sent after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePlan {
    work_grace: Duration,
    cleanup: Duration,
}

impl GracePlan {
    /// Builds a plan from exact durations.
    pub fn new(work_grace: Duration, cleanup: Duration) -> Self {
        Self {
            work_grace,
            cleanup,
        }
    }

    /// Splits `total_seconds` into a cleanup extension of at most
    /// `desired_cleanup_seconds` and a work extension taking what is left after
    /// `slack_seconds`.
    ///
    /// Never fails; a grace period too short for the slack yields zero for both.
    pub fn compute(total_seconds: u64, slack_seconds: u64, desired_cleanup_seconds: u64) -> Self {
        let cleanup = total_seconds
            .saturating_sub(slack_seconds)
            .min(desired_cleanup_seconds);
        let work_grace = total_seconds
            .saturating_sub(cleanup)
            .saturating_sub(slack_seconds);

        Self::new(Duration::from_secs(work_grace), Duration::from_secs(cleanup))
    }

    /// [`GracePlan::compute`] with [`SLACK_SECONDS`] and [`DESIRED_CLEANUP_SECONDS`].
    pub fn from_total(total_seconds: u64) -> Self {
        Self::compute(total_seconds, SLACK_SECONDS, DESIRED_CLEANUP_SECONDS)
    }

    pub fn work_grace(&self) -> Duration {
        self.work_grace
    }

    pub fn cleanup(&self) -> Duration {
        self.cleanup
    }

    pub fn work_grace_seconds(&self) -> u64 {
        self.work_grace.as_secs()
    }

    pub fn cleanup_seconds(&self) -> u64 {
        self.cleanup.as_secs()
    }
}
