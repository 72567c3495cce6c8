//! Join coordinators: wait for every task, or for the first N successes.

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;

use crate::error::{TaskError, WaitError};
use crate::task::{PendingTask, Tracked};

/// Outcome of `wait_for_any`.
#[derive(Debug)]
pub struct AnyOutcome<T, E> {
    /// Successful results as `(index, value)`, in completion order.
    pub completed: Vec<(usize, T)>,
    /// Tasks that failed before the target was reached.
    pub failed: Vec<(usize, TaskError<E>)>,
    /// Tasks still running when the target was reached.
    pub pending: Vec<PendingTask<T, E>>,
}

impl<T, E> AnyOutcome<T, E> {
    pub fn values(self) -> Vec<T> {
        self.completed.into_iter().map(|(_, v)| v).collect()
    }

    /// Cancel every straggler.
    pub fn abort_pending(&self) {
        for task in &self.pending {
            task.abort();
        }
    }
}

fn spawn_all<T, E, F>(tasks: Vec<F>) -> FuturesUnordered<Tracked<T, E>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| Tracked::spawn(index, task))
        .collect()
}

/// Next completion, or `Err(())` once the deadline passes.
async fn next_before<T, E>(
    running: &mut FuturesUnordered<Tracked<T, E>>,
    deadline: Option<Instant>,
) -> Result<Option<(usize, Result<T, TaskError<E>>)>, ()> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, running.next())
            .await
            .map_err(|_| ()),
        None => Ok(running.next().await),
    }
}

fn pending_indices<T, E>(running: &FuturesUnordered<Tracked<T, E>>) -> Vec<usize> {
    let mut pending: Vec<usize> = running.iter().map(Tracked::index).collect();
    pending.sort_unstable();
    pending
}

/// Run every task and return the results index-aligned with `tasks`.
///
/// Fails on the first task failure, or when `timeout` elapses first. Either
/// error carries the results that had completed. Tasks still running at that
/// point are abandoned.
pub async fn wait_for_all<T, E, F>(
    tasks: Vec<F>,
    timeout: Option<Duration>,
) -> Result<Vec<T>, WaitError<T, E>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let total = tasks.len();
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut running = spawn_all(tasks);
    let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();

    loop {
        let next = match next_before(&mut running, deadline).await {
            Ok(next) => next,
            Err(()) => {
                let pending = pending_indices(&running);
                tracing::warn!(
                    "⏱️ wait_for_all timed out: {}/{} tasks completed",
                    total - pending.len(),
                    total
                );
                return Err(WaitError::TimedOut {
                    timeout: timeout.unwrap_or_default(),
                    total,
                    completed: take_completed(&mut slots),
                    pending,
                });
            }
        };
        let Some((index, outcome)) = next else {
            break;
        };
        match outcome {
            Ok(value) => slots[index] = Some(value),
            Err(error) => {
                tracing::debug!("wait_for_all: task {} failed, abandoning the rest", index);
                return Err(WaitError::Failed {
                    index,
                    error,
                    completed: take_completed(&mut slots),
                });
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

fn take_completed<T>(slots: &mut [Option<T>]) -> Vec<(usize, T)> {
    slots
        .iter_mut()
        .enumerate()
        .filter_map(|(i, slot)| slot.take().map(|v| (i, v)))
        .collect()
}

/// Resolve as soon as `n` tasks have succeeded.
///
/// Returns the successes plus handles to the tasks that are still running.
/// Fails with `Unsatisfiable` once too many tasks have failed for `n`
/// successes to remain possible, and with `TimedOut` if `timeout` elapses.
/// `n` must satisfy `0 < n <= tasks.len()`.
pub async fn wait_for_any<T, E, F>(
    n: usize,
    tasks: Vec<F>,
    timeout: Option<Duration>,
) -> Result<AnyOutcome<T, E>, WaitError<T, E>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let total = tasks.len();
    if n == 0 || n > total {
        return Err(WaitError::InvalidCount { n, len: total });
    }

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut running = spawn_all(tasks);
    let mut completed = Vec::with_capacity(n);
    let mut failed = Vec::new();

    while completed.len() < n {
        let next = match next_before(&mut running, deadline).await {
            Ok(next) => next,
            Err(()) => {
                let pending = pending_indices(&running);
                tracing::warn!(
                    "⏱️ wait_for_any timed out: {}/{} successes",
                    completed.len(),
                    n
                );
                return Err(WaitError::TimedOut {
                    timeout: timeout.unwrap_or_default(),
                    total,
                    completed,
                    pending,
                });
            }
        };
        let Some((index, outcome)) = next else {
            break;
        };
        match outcome {
            Ok(value) => completed.push((index, value)),
            Err(error) => failed.push((index, error)),
        }
        if completed.len() + running.len() < n {
            return Err(WaitError::Unsatisfiable {
                needed: n,
                completed,
                failures: failed,
            });
        }
    }

    let pending: Vec<PendingTask<T, E>> = running.into_iter().map(Tracked::into_pending).collect();
    tracing::debug!(
        "wait_for_any: {} of {} succeeded, {} still pending",
        completed.len(),
        total,
        pending.len()
    );
    Ok(AnyOutcome {
        completed,
        failed,
        pending,
    })
}
