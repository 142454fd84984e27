//! Drives a submitted prediction to a terminal status.
//!
//! The loop asks the service for the prediction's state once per interval
//! until it either succeeds or fails. Out of the box there is no timeout and
//! no limit on the number of status checks, and a single failed check ends
//! the loop. [`PollConfig`] can bound the loop, add exponential backoff and
//! tolerate a few transient failures, all of which are off by default.
//!
//! Requests never overlap: the next check is only scheduled once the previous
//! one has been handled.

use std::time::Duration;

use log::{debug, warn};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{PollLimit, Result},
    image_model::PredictionService,
    job::{JobDescriptor, JobResult},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Pause before each status check
    pub interval: Duration,
    /// Give up after this many status checks
    pub max_attempts: Option<u32>,
    /// Give up once this much time passed since polling started
    pub timeout: Option<Duration>,
    /// Grow the interval after every non-terminal check
    pub backoff: Option<Backoff>,
    /// How many failed status checks in a row are retried before giving up.
    /// Only transient failures (transport errors, 5xx) are retried.
    pub status_check_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
            timeout: None,
            backoff: None,
            status_check_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            max_interval: Duration::from_secs(30),
        }
    }
}

/// Interval to wait before the next check, clamped to the backoff's maximum.
/// Backoff never shortens the interval.
pub fn next_interval(current: Duration, config: &PollConfig) -> Duration {
    match config.backoff {
        None => current,
        Some(backoff) => {
            let next_ms = (current.as_millis() as f64 * backoff.multiplier) as u64;
            Duration::from_millis(next_ms)
                .min(backoff.max_interval)
                .max(current)
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Succeeded(JobResult),
    /// The token was cancelled before a terminal status arrived
    Cancelled,
}

/// Polls `descriptor` until it reaches a terminal status.
///
/// `on_update` sees every non-terminal state of the job, it is never called
/// after `cancel` has fired. A failed prediction is returned as
/// [`Error::GenerationFailed`](crate::Error::GenerationFailed).
pub async fn poll_until_terminal<S>(
    service: &S,
    descriptor: JobDescriptor,
    config: &PollConfig,
    cancel: &CancellationToken,
    mut on_update: impl FnMut(&JobDescriptor),
) -> Result<PollOutcome>
where
    S: PredictionService + ?Sized,
{
    let deadline = config.timeout.map(|timeout| (Instant::now() + timeout, timeout));
    let mut current = descriptor;
    let mut interval = config.interval;
    let mut attempts = 0u32;
    let mut failures = 0u32;

    loop {
        if let Some(max) = config.max_attempts {
            if attempts >= max {
                return Err(PollLimit::MaxAttempts(max).into());
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            timeout = expired(deadline) => return Err(PollLimit::Timeout(timeout).into()),
            _ = sleep(interval) => {}
        }

        attempts += 1;
        let checked = tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            timeout = expired(deadline) => return Err(PollLimit::Timeout(timeout).into()),
            res = service.check_status(&current.urls.get) => res,
        };
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        let polled = match checked {
            Ok(polled) => {
                failures = 0;
                polled
            }
            Err(e) if e.is_transient() && failures < config.status_check_retries => {
                failures += 1;
                warn!(
                    "Status check {attempts} for {} failed ({failures}/{}): {e}",
                    current.id, config.status_check_retries
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        current = current.advance(polled)?;
        debug!("Prediction {} is {}", current.id, current.status);

        if let Some(result) = current.terminal_result() {
            return result.map(PollOutcome::Succeeded);
        }

        on_update(&current);
        interval = next_interval(interval, config);
    }
}

/// Resolves with the configured timeout once the deadline has passed, never
/// resolves without one.
async fn expired(deadline: Option<(Instant, Duration)>) -> Duration {
    match deadline {
        Some((at, timeout)) => {
            sleep_until(at).await;
            timeout
        }
        None => std::future::pending().await,
    }
}
