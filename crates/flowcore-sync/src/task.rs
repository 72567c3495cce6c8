//! Spawned-task bookkeeping shared by the coordinators.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::error::TaskError;

/// A spawned task remembered together with its input position.
///
/// Polls to `(index, outcome)`. Dropping it detaches the task: the work keeps
/// running, its result is discarded.
pub(crate) struct Tracked<T, E> {
    index: usize,
    handle: JoinHandle<Result<T, E>>,
}

impl<T, E> Tracked<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn spawn<F>(index: usize, task: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            index,
            handle: tokio::spawn(task),
        }
    }
}

impl<T, E> Tracked<T, E> {
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn into_pending(self) -> PendingTask<T, E> {
        PendingTask {
            index: self.index,
            handle: self.handle,
        }
    }
}

impl<T, E> Future for Tracked<T, E> {
    type Output = (usize, Result<T, TaskError<E>>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.handle)
            .poll(cx)
            .map(|joined| (this.index, settle(joined)))
    }
}

pub(crate) fn settle<T, E>(
    joined: Result<Result<T, E>, tokio::task::JoinError>,
) -> Result<T, TaskError<E>> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskError::Failed(e)),
        Err(join_err) => Err(TaskError::from_join(join_err)),
    }
}

/// A task left running when a wait resolved early.
///
/// The caller decides: `abort()` it, `join()` it later, or drop it to let it
/// finish in the background.
#[derive(Debug)]
pub struct PendingTask<T, E> {
    index: usize,
    handle: JoinHandle<Result<T, E>>,
}

impl<T, E> PendingTask<T, E> {
    /// Position of the task in the original input.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task at its next suspension point.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the task's own outcome.
    pub async fn join(self) -> Result<T, TaskError<E>> {
        settle(self.handle.await)
    }
}
