//! Retry-until-condition polling with backoff.
//!
//! A [`Poller`] repeatedly runs an async probe until it reports
//! [`Probe::Done`], reports [`Probe::Fatal`], or its [`PollLimit`] runs out.
//! Both the build wait loop and the artifact existence check run on it.
//!
//! Deadlines are checked before every attempt and before every delay, and a
//! delay is clipped so the poller wakes exactly at the deadline. A probe that
//! is already in flight is never interrupted.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

/// How long to wait before the retry that follows attempt `n` (0-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayStrategy {
    /// `min(base * (n + 1) * factor, max)`
    Linear {
        base: Duration,
        factor: u32,
        max: Duration,
    },
    /// `min(base * 2^(n + 1), max)`
    Exponential { base: Duration, max: Duration },
}

impl DelayStrategy {
    /// Used while waiting for a build to finish.
    pub const BUILD_WAIT: Self = DelayStrategy::Linear {
        base: Duration::from_secs(5),
        factor: 2,
        max: Duration::from_secs(20),
    };

    /// Used while waiting for a finished build's artifacts to show up.
    pub const ARTIFACT_CHECK: Self = DelayStrategy::Exponential {
        base: Duration::from_secs(1),
        max: Duration::from_secs(20),
    };

    pub fn delay(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_add(1);
        match *self {
            DelayStrategy::Linear { base, factor, max } => base
                .checked_mul(step.saturating_mul(factor))
                .map_or(max, |d| d.min(max)),
            DelayStrategy::Exponential { base, max } => 2u32
                .checked_pow(step)
                .and_then(|mult| base.checked_mul(mult))
                .map_or(max, |d| d.min(max)),
        }
    }

    pub fn max(&self) -> Duration {
        match *self {
            DelayStrategy::Linear { max, .. } | DelayStrategy::Exponential { max, .. } => max,
        }
    }
}

/// When a poller gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLimit {
    /// Stop once this much time has passed since polling started.
    Deadline(Duration),
    /// Stop after this many probe calls. At least one call is always made.
    Attempts(u32),
}

/// What a single probe observed.
#[derive(Debug)]
pub enum Probe<T, E> {
    /// The condition holds; stop with this value.
    Done(T),
    /// Not there yet. `last` is kept as the last observed value.
    Retry { last: Option<T>, reason: String },
    /// Stop immediately.
    Fatal(E),
}

/// Why a poll did not reach [`Probe::Done`].
#[derive(Debug)]
pub enum PollError<T, E> {
    Fatal(E),
    TimedOut {
        last: Option<T>,
        waited: Duration,
        attempts: u32,
    },
    Exhausted {
        last: Option<T>,
        attempts: u32,
    },
}

impl<T, E: fmt::Display> fmt::Display for PollError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Fatal(e) => write!(f, "{e}"),
            PollError::TimedOut {
                waited, attempts, ..
            } => write!(
                f,
                "deadline reached after {}s ({attempts} attempts)",
                waited.as_secs()
            ),
            PollError::Exhausted { attempts, .. } => {
                write!(f, "gave up after {attempts} attempts")
            }
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug + fmt::Display> std::error::Error for PollError<T, E> {}

/// A delay strategy paired with a limit.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub strategy: DelayStrategy,
    pub limit: PollLimit,
}

impl Poller {
    pub fn new(strategy: DelayStrategy, limit: PollLimit) -> Self {
        Self { strategy, limit }
    }

    /// Run `probe` until it is done, fatal, or the limit is reached.
    ///
    /// `probe` receives the 0-indexed attempt number.
    pub async fn poll<T, E, F, Fut>(&self, mut probe: F) -> Result<T, PollError<T, E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Probe<T, E>>,
    {
        let started = Instant::now();
        let deadline = match self.limit {
            PollLimit::Deadline(d) => Some(started + d),
            PollLimit::Attempts(_) => None,
        };
        let mut last = None;
        let mut attempts = 0u32;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(PollError::TimedOut {
                    last,
                    waited: started.elapsed(),
                    attempts,
                });
            }

            match probe(attempts).await {
                Probe::Done(value) => return Ok(value),
                Probe::Fatal(e) => return Err(PollError::Fatal(e)),
                Probe::Retry { last: seen, reason } => {
                    if seen.is_some() {
                        last = seen;
                    }
                    debug!(attempt = attempts, reason = %reason, "poll condition not met");
                }
            }
            attempts += 1;

            if let PollLimit::Attempts(max) = self.limit {
                if attempts >= max {
                    return Err(PollError::Exhausted { last, attempts });
                }
            }

            let mut delay = self.strategy.delay(attempts - 1);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(PollError::TimedOut {
                        last,
                        waited: started.elapsed(),
                        attempts,
                    });
                }
                delay = delay.min(deadline - now);
            }
            sleep(delay).await;
        }
    }
}
