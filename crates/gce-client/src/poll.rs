//! Bounded, cancellable exponential-backoff polling
//!
//! `poll_until` repeatedly runs a check until it reports completion, the time
//! budget runs out, or the cancellation token fires. The check distinguishes
//! "not done yet" from "could not look the resource up", and the configured
//! `LookupErrorPolicy` decides what a failed lookup means.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a single check
#[derive(Debug)]
pub enum CheckOutcome<T, E> {
    /// The awaited condition holds
    Done(T),
    /// The resource exists but has not reached the awaited condition
    Pending,
    /// The resource could not be looked up; handled per `LookupErrorPolicy`
    LookupFailed(E),
    /// The lookup failed in a way retrying cannot fix (e.g. bad credentials)
    Fatal(E),
}

/// What a `CheckOutcome::LookupFailed` means to the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupErrorPolicy {
    /// Treat it as "not done yet" and keep polling
    #[default]
    Retry,
    /// Stop polling and return the error
    Abort,
}

/// Shortest sleep between two checks, whatever the configuration says
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Backoff schedule and time budget for `poll_until`
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the second check
    pub initial_interval: Duration,
    /// Growth factor applied to the interval after every check
    pub multiplier: f64,
    /// Upper bound on the interval
    pub max_interval: Duration,
    /// Each sleep is drawn uniformly from `interval * (1 ± randomization_factor)`
    pub randomization_factor: f64,
    /// Total time budget
    pub max_elapsed: Duration,
    /// How failed lookups are treated
    pub lookup_errors: LookupErrorPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            randomization_factor: 0.5,
            max_elapsed: Duration::from_secs(5 * 60),
            lookup_errors: LookupErrorPolicy::Retry,
        }
    }
}

impl PollConfig {
    /// Replaces the total time budget
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Replaces the lookup error policy
    pub fn with_lookup_errors(mut self, policy: LookupErrorPolicy) -> Self {
        self.lookup_errors = policy;
        self
    }

    /// Interval following `current`, capped at `max_interval` and never below `MIN_INTERVAL`
    pub fn next_interval(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(
            (current.as_secs_f64() * self.multiplier).min(self.max_interval.as_secs_f64()),
        )
        .max(MIN_INTERVAL)
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The time budget ran out before the condition held
    #[error("deadline exceeded after {elapsed:?} ({attempts} checks)")]
    DeadlineExceeded {
        /// Time spent polling
        elapsed: Duration,
        /// Number of checks performed
        attempts: u32,
    },

    /// The cancellation token fired
    #[error("polling cancelled")]
    Cancelled,

    /// A lookup failed and the policy (or the error itself) ended polling
    #[error("lookup failed: {0}")]
    Lookup(E),
}

/// Polls `check` until it returns `Done`.
///
/// Elapsed time never exceeds `max_elapsed` by more than the duration of one
/// check: every sleep is clipped to the remaining budget. Outside that clip no
/// sleep is shorter than `MIN_INTERVAL`.
pub async fn poll_until<T, E, F, Fut>(
    config: &PollConfig,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CheckOutcome<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut interval = config.initial_interval.max(MIN_INTERVAL);
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        attempts += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            outcome = check() => outcome,
        };

        match outcome {
            CheckOutcome::Done(value) => {
                debug!(attempts, elapsed_ms = start.elapsed().as_millis() as u64, "Poll condition met");
                return Ok(value);
            }
            CheckOutcome::Pending => {}
            CheckOutcome::LookupFailed(e) => match config.lookup_errors {
                LookupErrorPolicy::Retry => warn!(attempts, error = %e, "Lookup failed while polling, retrying"),
                LookupErrorPolicy::Abort => return Err(PollError::Lookup(e)),
            },
            CheckOutcome::Fatal(e) => return Err(PollError::Lookup(e)),
        }

        let elapsed = start.elapsed();
        if elapsed >= config.max_elapsed {
            return Err(PollError::DeadlineExceeded { elapsed, attempts });
        }

        let delay = jittered(interval, config.randomization_factor)
            .max(MIN_INTERVAL)
            .min(config.max_elapsed - elapsed);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        interval = config.next_interval(interval);
    }
}

fn jittered(interval: Duration, randomization_factor: f64) -> Duration {
    if randomization_factor <= 0.0 {
        return interval;
    }
    let factor = rand::thread_rng().gen_range((1.0 - randomization_factor)..=(1.0 + randomization_factor));
    Duration::from_secs_f64(interval.as_secs_f64() * factor.max(0.0))
}
