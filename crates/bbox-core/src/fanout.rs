//! Bounded-concurrency fan-out with run-to-completion semantics.
//!
//! A [`FanOut`] owns a semaphore shared by every clone, so all fan-outs of
//! one invocation draw from the same pool of permits. Units are dispatched in
//! input order; a permit is taken *before* a unit is spawned, so excess units
//! wait in the input queue rather than as parked tasks.
//!
//! Every unit produces exactly one output. A worker that panics is mapped
//! through the caller's `recover` function, and no unit's failure cancels or
//! skips its siblings.
//!
//! Fan-outs must not be nested on the same pool: an outer unit holding a
//! permit while it awaits inner units can starve the pool.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::domain::{BboxError, Result};

/// Default number of units in flight at once.
pub const DEFAULT_WIDTH: usize = 50;

/// Shared, bounded worker pool.
#[derive(Debug, Clone)]
pub struct FanOut {
    permits: Arc<Semaphore>,
    width: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(DEFAULT_WIDTH)),
            width: DEFAULT_WIDTH,
        }
    }
}

impl FanOut {
    /// Create a pool allowing `width` concurrent units. Zero is rejected.
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(BboxError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Dispatch `units` and stream one output per unit as each completes.
    ///
    /// The receiver yields outputs in completion order and closes once the
    /// last unit has reported.
    pub fn stream<U, R, W, Fut, C>(&self, units: Vec<U>, worker: W, recover: C) -> mpsc::Receiver<R>
    where
        U: Clone + Send + 'static,
        R: Send + 'static,
        W: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        C: Fn(U, String) -> R + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(self.width);
        let permits = Arc::clone(&self.permits);
        let worker = Arc::new(worker);
        let recover = Arc::new(recover);
        let total = units.len();

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            for unit in units {
                let permit = match Arc::clone(&permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("worker pool closed, reporting unit as aborted");
                        let _ = tx
                            .send(recover(unit, "worker pool closed".to_string()))
                            .await;
                        continue;
                    }
                };

                let worker = Arc::clone(&worker);
                let recover = Arc::clone(&recover);
                let tx = tx.clone();
                tasks.spawn(async move {
                    let output = match AssertUnwindSafe(worker(unit.clone())).catch_unwind().await {
                        Ok(output) => output,
                        Err(panic) => {
                            let detail = panic_message(panic.as_ref());
                            error!(panic_msg = %detail, "fan-out worker panicked");
                            recover(unit, detail)
                        }
                    };
                    // Release before sending so a slow consumer never holds the pool.
                    drop(permit);
                    let _ = tx.send(output).await;
                });
            }

            // Join barrier: the channel closes once every task has sent and
            // this dispatcher's sender is dropped.
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "fan-out task did not complete");
                }
            }
            debug!(units = total, "fan-out complete");
        });

        rx
    }

    /// Dispatch `units` and collect every output, in completion order.
    pub async fn run<U, R, W, Fut, C>(&self, units: Vec<U>, worker: W, recover: C) -> Vec<R>
    where
        U: Clone + Send + 'static,
        R: Send + 'static,
        W: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        C: Fn(U, String) -> R + Send + Sync + 'static,
    {
        let expected = units.len();
        let mut rx = self.stream(units, worker, recover);
        let mut outputs = Vec::with_capacity(expected);
        while let Some(output) = rx.recv().await {
            outputs.push(output);
        }
        outputs
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
