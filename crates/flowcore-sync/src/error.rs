//! Error types for the coordination primitives.
//!
//! These are generic over the task result type so that a timeout or a
//! failure still hands back whatever had already completed.

use std::time::Duration;

use crate::barrier::BarrierState;

/// Why a single task did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    #[error("{0}")]
    Failed(E),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was cancelled")]
    Cancelled,
}

impl<E> TaskError<E> {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskError::Failed(_))
    }

    /// The task's own error, if it returned one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            let payload = err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskError::Panicked(message)
        } else {
            TaskError::Cancelled
        }
    }
}

/// The failing task of a fail-fast batch.
#[derive(Debug, thiserror::Error)]
#[error("task {index} failed: {error}")]
pub struct TaskFailure<E> {
    pub index: usize,
    pub error: TaskError<E>,
}

/// Failure of `wait_for_all` / `wait_for_any`.
#[derive(Debug, thiserror::Error)]
pub enum WaitError<T, E> {
    #[error("task {index} failed: {error}")]
    Failed {
        index: usize,
        error: TaskError<E>,
        /// `(index, value)` pairs that finished before the failure.
        completed: Vec<(usize, T)>,
    },

    #[error("timed out after {timeout:?}: {} of {total} tasks completed", .completed.len())]
    TimedOut {
        timeout: Duration,
        total: usize,
        completed: Vec<(usize, T)>,
        /// Indices of tasks that were still running (now abandoned).
        pending: Vec<usize>,
    },

    #[error("needed {needed} successes, but {} tasks failed and only {} succeeded", .failures.len(), .completed.len())]
    Unsatisfiable {
        needed: usize,
        completed: Vec<(usize, T)>,
        failures: Vec<(usize, TaskError<E>)>,
    },

    #[error("invalid wait count: n = {n} for {len} tasks (need 0 < n <= len)")]
    InvalidCount { n: usize, len: usize },
}

impl<T, E> WaitError<T, E> {
    /// Results obtained before the wait gave up.
    pub fn completed(&self) -> &[(usize, T)] {
        match self {
            WaitError::Failed { completed, .. }
            | WaitError::TimedOut { completed, .. }
            | WaitError::Unsatisfiable { completed, .. } => completed,
            WaitError::InvalidCount { .. } => &[],
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::TimedOut { .. })
    }
}

/// `Barrier::wait` gave up before the expected number of arrivals.
#[derive(Debug, thiserror::Error)]
#[error("barrier timed out after {timeout:?} with {} of {expected} arrivals", .arrived.len())]
pub struct BarrierTimeout<T> {
    pub timeout: Duration,
    pub expected: usize,
    /// Results that did arrive, in arrival order.
    pub arrived: Vec<T>,
}

/// Rejected arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BarrierError {
    #[error("barrier already {0}")]
    Closed(BarrierState),
}
