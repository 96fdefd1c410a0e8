//! Bounded readiness polling shared by every wait-for-it loop.
//!
//! Instance activation and shell reachability are both latency-heavy,
//! partially observable processes. Rather than scatter sleep loops, both
//! waits go through [`poll`], parameterised by a readiness probe, a fixed
//! interval, and a budget expressed either as a deadline or as an attempt
//! count.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;

/// Bound on how long a poll may keep probing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Budget {
    /// Probe until the duration has elapsed.
    Deadline(Duration),
    /// Probe at most this many times.
    Attempts(u32),
}

/// Errors raised when a poll gives up or the probe fails fatally.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PollError<E> {
    /// The budget ran out before the probe reported readiness.
    #[error("gave up after {attempts} attempts")]
    Exhausted {
        /// Number of probe invocations performed.
        attempts: u32,
    },
    /// The probe reported an unrecoverable failure.
    #[error(transparent)]
    Probe(E),
}

/// Polls `probe` until it yields a value, the budget is exhausted, or the
/// probe fails fatally.
///
/// The probe returns `Ok(Some(value))` when ready, `Ok(None)` to request
/// another attempt after `interval`, and `Err` to abort immediately.
///
/// # Errors
///
/// Returns [`PollError::Exhausted`] with the attempt count when the budget
/// runs out, or [`PollError::Probe`] when the probe fails.
pub async fn poll<T, E, F, Fut>(
    budget: Budget,
    interval: Duration,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = match budget {
        Budget::Deadline(window) => Some(Instant::now() + window),
        Budget::Attempts(_) => None,
    };
    let max_attempts = match budget {
        Budget::Attempts(count) => Some(count),
        Budget::Deadline(_) => None,
    };

    let mut attempts: u32 = 0;
    loop {
        if max_attempts.is_some_and(|max| attempts >= max) {
            return Err(PollError::Exhausted { attempts });
        }

        attempts = attempts.saturating_add(1);
        if let Some(value) = probe().await.map_err(PollError::Probe)? {
            return Ok(value);
        }

        if max_attempts.is_some_and(|max| attempts >= max) {
            return Err(PollError::Exhausted { attempts });
        }
        if deadline.is_some_and(|limit| Instant::now() >= limit) {
            return Err(PollError::Exhausted { attempts });
        }

        sleep(interval).await;
    }
}
