//! Bounded concurrency: at most `limit` tasks in flight, results index-aligned.

use std::convert::Infallible;
use std::future::Future;
use std::ops::ControlFlow;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::{TaskError, TaskFailure};
use crate::task::Tracked;

/// Shared driver. `settle` sees each outcome as it completes; a `Break`
/// stops new starts and is returned, abandoning tasks still in flight.
async fn run_bounded<T, E, F, B>(
    tasks: Vec<F>,
    limit: usize,
    mut settle: impl FnMut(usize, Result<T, TaskError<E>>) -> ControlFlow<B>,
) -> ControlFlow<B>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let limit = if limit == 0 {
        tracing::warn!("⚠️ Concurrency limit of 0 requested, running one at a time");
        1
    } else {
        limit
    };
    let mut queued = tasks.into_iter().enumerate();
    let mut running = FuturesUnordered::new();

    for (index, task) in queued.by_ref().take(limit) {
        running.push(Tracked::spawn(index, task));
    }

    while let Some((index, outcome)) = running.next().await {
        if let ControlFlow::Break(stop) = settle(index, outcome) {
            tracing::warn!(
                "❌ Task {} failed, not starting {} queued task(s)",
                index,
                queued.len()
            );
            return ControlFlow::Break(stop);
        }
        if let Some((next, task)) = queued.next() {
            running.push(Tracked::spawn(next, task));
        }
    }
    ControlFlow::Continue(())
}

fn empty_slots<R>(len: usize) -> Vec<Option<R>> {
    (0..len).map(|_| None).collect()
}

/// Run `tasks` with at most `limit` in flight. The first failure rejects the
/// whole batch and no further tasks are started.
pub async fn with_concurrency_limit<T, E, F>(
    tasks: Vec<F>,
    limit: usize,
) -> Result<Vec<T>, TaskFailure<E>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut slots = empty_slots(tasks.len());
    let run = run_bounded(tasks, limit, |index, outcome| match outcome {
        Ok(value) => {
            slots[index] = Some(value);
            ControlFlow::Continue(())
        }
        Err(error) => ControlFlow::Break(TaskFailure { index, error }),
    })
    .await;
    if let ControlFlow::Break(failure) = run {
        return Err(failure);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or(TaskFailure {
                index,
                error: TaskError::Cancelled,
            })
        })
        .collect()
}

/// Like [`with_concurrency_limit`] but every task runs to completion and the
/// per-task outcomes are returned, index-aligned with `tasks`.
pub async fn with_concurrency_limit_collect<T, E, F>(
    tasks: Vec<F>,
    limit: usize,
) -> Vec<Result<T, TaskError<E>>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut slots = empty_slots(tasks.len());
    let run = run_bounded(tasks, limit, |index, outcome| {
        slots[index] = Some(outcome);
        ControlFlow::<Infallible>::Continue(())
    })
    .await;
    match run {
        ControlFlow::Continue(()) => {}
        ControlFlow::Break(never) => match never {},
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Err(TaskError::Cancelled)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    type Task = Pin<Box<dyn Future<Output = Result<usize, String>> + Send>>;

    struct Tracker {
        started: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Tracker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn task(self: &Arc<Self>, index: usize, ms: u64, fail: bool) -> Task {
            let tracker = self.clone();
            Box::pin(async move {
                tracker.started.fetch_add(1, Ordering::SeqCst);
                let now = tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
                if fail {
                    Err(format!("task {index} failed"))
                } else {
                    Ok(index * 10)
                }
            })
        }
    }

    fn five_tasks(tracker: &Arc<Tracker>) -> Vec<Task> {
        vec![
            tracker.task(0, 10, false),
            tracker.task(1, 20, false),
            tracker.task(2, 5, true),
            tracker.task(3, 10, false),
            tracker.task(4, 10, false),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_aligned_and_limit_respected() {
        let tracker = Tracker::new();
        let tasks = vec![
            tracker.task(0, 50, false),
            tracker.task(1, 10, false),
            tracker.task(2, 30, false),
            tracker.task(3, 5, false),
        ];
        let results = with_concurrency_limit(tasks, 2).await.unwrap();
        assert_eq!(results, vec![0, 10, 20, 30]);
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_stops_new_starts() {
        let tracker = Tracker::new();
        let failure = with_concurrency_limit(five_tasks(&tracker), 2)
            .await
            .unwrap_err();
        assert_eq!(failure.index, 2);
        assert_eq!(failure.error.into_inner().as_deref(), Some("task 2 failed"));
        // 0 and 1 start, 0 finishes, 2 starts and fails: 3 and 4 never run.
        assert_eq!(tracker.started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_runs_everything() {
        let tracker = Tracker::new();
        let results = with_concurrency_limit_collect(five_tasks(&tracker), 2).await;
        assert_eq!(results.len(), 5);
        assert_eq!(tracker.started.load(Ordering::SeqCst), 5);

        let errors: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_err())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(errors, vec![2]);
        assert_eq!(results[4].as_ref().ok(), Some(&40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_keeps_every_slot_when_several_fail() {
        let tracker = Tracker::new();
        let tasks = vec![
            tracker.task(0, 30, true),
            tracker.task(1, 5, false),
            tracker.task(2, 10, true),
            tracker.task(3, 1, false),
            tracker.task(4, 20, true),
        ];
        let results = with_concurrency_limit_collect(tasks, 3).await;
        assert_eq!(results.len(), 5);

        let shape: Vec<Option<usize>> = results.iter().map(|r| r.as_ref().ok().copied()).collect();
        assert_eq!(shape, vec![None, Some(10), None, Some(30), None]);
        assert!(matches!(&results[4], Err(TaskError::Failed(msg)) if msg == "task 4 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_runs_serially() {
        let tracker = Tracker::new();
        let tasks = vec![tracker.task(0, 5, false), tracker.task(1, 5, false)];
        let results = with_concurrency_limit(tasks, 0).await.unwrap();
        assert_eq!(results, vec![0, 10]);
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let tasks: Vec<Task> = Vec::new();
        assert!(with_concurrency_limit(tasks, 3).await.unwrap().is_empty());
    }
}
