//! Generic bounded polling for resources converging on a target status.
//!
//! A [`StatusProbe`] describes one resource kind: how to read its current
//! status and which statuses count as success or failure.
//! [`wait_for_status`] drives any probe with a fixed-delay retry loop, so
//! the loop is written once and shared between resource kinds (instance
//! readiness, lock-table readiness).

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;

/// Future returned by probe status reads.
pub type ProbeFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Status source for one resource instance.
///
/// Implementations must not branch on other resource kinds; everything the
/// polling loop needs is expressed through these methods.
pub trait StatusProbe {
    /// Error raised while reading the status.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reads the resource's current status string.
    fn current_status(&self) -> ProbeFuture<'_, String, Self::Error>;

    /// Returns true when `status` is the status being waited for.
    fn is_target(&self, status: &str) -> bool;

    /// Returns true when `status` means the resource can no longer reach
    /// the target.
    fn is_error(&self, status: &str) -> bool;

    /// Identifier of the resource being polled, for diagnostics.
    fn resource_id(&self) -> &str;

    /// Human-readable resource kind, for diagnostics.
    fn resource_kind(&self) -> &'static str;
}

/// Retry budget and cadence for a polling loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Maximum number of status reads before giving up.
    pub max_attempts: u32,
    /// Delay between consecutive status reads.
    pub delay: Duration,
    /// Minimum interval between progress log lines.
    pub progress_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 300,
            delay: Duration::from_secs(1),
            progress_interval: Duration::from_secs(5),
        }
    }
}

impl PollPolicy {
    /// Returns a policy with millisecond-scale delays for tests.
    #[must_use]
    pub const fn fast(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_millis(1),
            progress_interval: Duration::from_secs(5),
        }
    }
}

/// Terminal outcomes of a polling loop that did not reach the target.
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when a status read itself fails.
    #[error("failed to read status of {kind} {id}: {source}")]
    Probe {
        /// Resource kind being polled.
        kind: &'static str,
        /// Resource identifier.
        id: String,
        /// Underlying probe error.
        #[source]
        source: E,
    },
    /// Raised when the resource reports a status it cannot recover from.
    #[error("{kind} {id} entered error state {status} after {waited_secs}s")]
    ErrorState {
        /// Resource kind being polled.
        kind: &'static str,
        /// Resource identifier.
        id: String,
        /// Status that ended the wait.
        status: String,
        /// Seconds spent waiting before the error status appeared.
        waited_secs: u64,
    },
    /// Raised when the retry budget is exhausted.
    #[error("timeout waiting for {kind} {id} to reach target status ({waited_secs}s)")]
    Timeout {
        /// Resource kind being polled.
        kind: &'static str,
        /// Resource identifier.
        id: String,
        /// Seconds spent waiting.
        waited_secs: u64,
    },
}

/// Polls `probe` until its target status is observed.
///
/// Returns as soon as [`StatusProbe::is_target`] holds. Progress is logged
/// at the policy's cadence so long waits remain observable.
///
/// # Errors
///
/// Returns [`PollError::Probe`] when a status read fails,
/// [`PollError::ErrorState`] the first time [`StatusProbe::is_error`]
/// holds, and [`PollError::Timeout`] when the attempt budget runs out.
pub async fn wait_for_status<P>(probe: &P, policy: &PollPolicy) -> Result<(), PollError<P::Error>>
where
    P: StatusProbe,
{
    let started = Instant::now();
    let mut last_progress = Instant::now();

    tracing::debug!(
        kind = probe.resource_kind(),
        id = probe.resource_id(),
        "waiting for target status"
    );

    for _ in 0..policy.max_attempts {
        let status = probe
            .current_status()
            .await
            .map_err(|source| PollError::Probe {
                kind: probe.resource_kind(),
                id: probe.resource_id().to_owned(),
                source,
            })?;

        if probe.is_target(&status) {
            tracing::debug!(
                kind = probe.resource_kind(),
                id = probe.resource_id(),
                waited_secs = started.elapsed().as_secs(),
                "target status reached"
            );
            return Ok(());
        }

        if probe.is_error(&status) {
            return Err(PollError::ErrorState {
                kind: probe.resource_kind(),
                id: probe.resource_id().to_owned(),
                status,
                waited_secs: started.elapsed().as_secs(),
            });
        }

        if last_progress.elapsed() >= policy.progress_interval {
            tracing::info!(
                kind = probe.resource_kind(),
                id = probe.resource_id(),
                status = status.as_str(),
                waited_secs = started.elapsed().as_secs(),
                "still waiting"
            );
            last_progress = Instant::now();
        }

        sleep(policy.delay).await;
    }

    Err(PollError::Timeout {
        kind: probe.resource_kind(),
        id: probe.resource_id().to_owned(),
        waited_secs: started.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests;
