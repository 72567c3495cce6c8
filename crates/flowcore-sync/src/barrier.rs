//! Arrival-counting barrier.
//!
//! Independent paths call `arrive(result)`; any number of waiters block in
//! `wait()` until the expected count is reached or the deadline passes. The
//! deadline is fixed when the barrier is built, so a `wait()` issued after
//! it has elapsed fails immediately.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{BarrierError, BarrierTimeout};

/// Lifecycle of a barrier. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Pending,
    Satisfied,
    TimedOut,
}

impl fmt::Display for BarrierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierState::Pending => write!(f, "pending"),
            BarrierState::Satisfied => write!(f, "satisfied"),
            BarrierState::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub arrived: usize,
    pub expected: usize,
    /// 0.0 to 100.0
    pub percentage: f64,
}

impl Progress {
    fn new(arrived: usize, expected: usize) -> Self {
        let percentage = if expected == 0 {
            100.0
        } else {
            arrived as f64 / expected as f64 * 100.0
        };
        Self {
            arrived,
            expected,
            percentage,
        }
    }
}

type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

pub struct Barrier<T> {
    expected: usize,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    on_progress: Option<ProgressCallback>,
    arrivals: Mutex<Vec<T>>,
    state: watch::Sender<BarrierState>,
}

impl<T> Barrier<T> {
    /// A barrier releasing after `expected` arrivals. Zero is satisfied
    /// immediately.
    pub fn new(expected: usize) -> Self {
        let initial = if expected == 0 {
            BarrierState::Satisfied
        } else {
            BarrierState::Pending
        };
        let (state, _) = watch::channel(initial);
        Self {
            expected,
            timeout: None,
            deadline: None,
            on_progress: None,
            arrivals: Mutex::new(Vec::with_capacity(expected)),
            state,
        }
    }

    /// Give up `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Called after every accepted arrival, once the arrival lock has been
    /// released, so the callback may read the barrier. Each call carries the
    /// count of its own arrival; concurrent arrivals may report out of order.
    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.arrivals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, flipping to `TimedOut` if the deadline has passed.
    /// Must be called with the arrival lock held.
    fn current_state(&self, arrivals: &[T]) -> BarrierState {
        let state = *self.state.borrow();
        if state != BarrierState::Pending {
            return state;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                tracing::warn!(
                    "⏱️ Barrier timed out with {}/{} arrivals",
                    arrivals.len(),
                    self.expected
                );
                self.state.send_replace(BarrierState::TimedOut);
                BarrierState::TimedOut
            }
            _ => BarrierState::Pending,
        }
    }

    /// Record one result.
    ///
    /// Fails with `BarrierError::Closed` once the barrier is satisfied or
    /// timed out; the rejected value is dropped and the resolved set is left
    /// untouched.
    pub fn arrive(&self, result: T) -> Result<Progress, BarrierError> {
        let progress = {
            let mut arrivals = self.lock();
            let state = self.current_state(&arrivals);
            if state != BarrierState::Pending {
                tracing::debug!("Barrier rejected a late arrival ({})", state);
                return Err(BarrierError::Closed(state));
            }

            arrivals.push(result);
            if arrivals.len() >= self.expected {
                tracing::debug!("Barrier satisfied with {} arrivals", arrivals.len());
                self.state.send_replace(BarrierState::Satisfied);
            }
            Progress::new(arrivals.len(), self.expected)
        };

        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
        Ok(progress)
    }

    pub fn state(&self) -> BarrierState {
        let arrivals = self.lock();
        self.current_state(&arrivals)
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.lock().len(), self.expected)
    }
}

impl<T: Clone> Barrier<T> {
    /// Results received so far, in arrival order.
    pub fn arrived(&self) -> Vec<T> {
        self.lock().clone()
    }

    /// Wait for all expected arrivals.
    ///
    /// Every waiter receives a copy of the full result set. On timeout the
    /// error carries whatever had arrived.
    pub async fn wait(&self) -> Result<Vec<T>, BarrierTimeout<T>> {
        let mut rx = self.state.subscribe();
        loop {
            {
                let arrivals = self.lock();
                match self.current_state(&arrivals) {
                    BarrierState::Satisfied => return Ok(arrivals.clone()),
                    BarrierState::TimedOut => {
                        return Err(BarrierTimeout {
                            timeout: self.timeout.unwrap_or_default(),
                            expected: self.expected,
                            arrived: arrivals.clone(),
                        });
                    }
                    BarrierState::Pending => {}
                }
            }

            let resolved = rx.wait_for(|state| *state != BarrierState::Pending);
            match self.deadline {
                // Either outcome is re-examined under the lock above.
                Some(deadline) => {
                    let _ = tokio::time::timeout_at(deadline, resolved).await;
                }
                None => {
                    let _ = resolved.await;
                }
            }
        }
    }
}
