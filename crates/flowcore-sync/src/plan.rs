//! Level-by-level execution of a dependency graph.

use std::future::Future;

use flowcore_core::config::ExecutorSettings;
use flowcore_core::FlowError;
use flowcore_graph::DependencyGraph;

use crate::error::TaskError;
use crate::limit::{with_concurrency_limit, with_concurrency_limit_collect};

/// How each level of a plan is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// Nodes in flight at once within a level.
    pub limit: usize,
    /// Let the rest of a failing level finish before stopping.
    pub collect_errors: bool,
}

impl PlanOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            collect_errors: false,
        }
    }

    pub fn collect_errors(mut self, collect: bool) -> Self {
        self.collect_errors = collect;
        self
    }
}

impl From<&ExecutorSettings> for PlanOptions {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            limit: settings.max_concurrency,
            collect_errors: settings.collect_errors,
        }
    }
}

/// Results of a finished plan.
#[derive(Debug)]
pub struct PlanReport<T> {
    /// The levels as they were executed.
    pub levels: Vec<Vec<String>>,
    /// `(node, value)` in level order.
    pub results: Vec<(String, T)>,
}

impl<T> PlanReport<T> {
    pub fn get(&self, node: &str) -> Option<&T> {
        self.results
            .iter()
            .find(|(id, _)| id == node)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError<T, E> {
    /// The graph could not be ordered.
    #[error(transparent)]
    Graph(#[from] FlowError),

    #[error("node '{node}' failed in level {level}: {error}")]
    NodeFailed {
        node: String,
        level: usize,
        error: TaskError<E>,
        /// Nodes that finished before the plan stopped.
        completed: Vec<(String, T)>,
    },
}

impl<T, E> PlanError<T, E> {
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            PlanError::NodeFailed { node, .. } => Some(node),
            PlanError::Graph(_) => None,
        }
    }
}

/// Run every node of `graph`, one execution level at a time, with at most
/// `limit` nodes of a level in flight.
///
/// A level starts only after every node of the previous level succeeded.
/// `run_node` receives the node id and a clone of its payload. The first
/// failing node stops the plan.
pub async fn execute_plan<P, T, E, F, Fut>(
    graph: &DependencyGraph<P>,
    limit: usize,
    run_node: F,
) -> Result<PlanReport<T>, PlanError<T, E>>
where
    P: Clone,
    F: Fn(String, P) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    execute_plan_with(graph, PlanOptions::new(limit), run_node).await
}

/// [`execute_plan`] with explicit options. With `collect_errors` the siblings
/// of a failing node are allowed to finish first, and their successes are
/// reported in `completed`.
pub async fn execute_plan_with<P, T, E, F, Fut>(
    graph: &DependencyGraph<P>,
    options: PlanOptions,
    run_node: F,
) -> Result<PlanReport<T>, PlanError<T, E>>
where
    P: Clone,
    F: Fn(String, P) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let levels = graph.execution_levels()?;
    tracing::info!(
        "🗺️ Executing plan: {} node(s) in {} level(s)",
        graph.len(),
        levels.len()
    );

    let mut results: Vec<(String, T)> = Vec::with_capacity(graph.len());
    for (level, ids) in levels.iter().enumerate() {
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            let payload = graph
                .payload(id)
                .ok_or_else(|| FlowError::NodeNotFound(id.clone()))?;
            tasks.push(run_node(id.clone(), payload));
        }
        tracing::debug!("Plan level {}: {:?}", level, ids);

        if options.collect_errors {
            let mut first_failure = None;
            for (id, outcome) in ids.iter().zip(with_concurrency_limit_collect(tasks, options.limit).await) {
                match outcome {
                    Ok(value) => results.push((id.clone(), value)),
                    Err(error) => {
                        tracing::warn!("❌ Plan node '{}' failed: {}", id, describe(&error));
                        if first_failure.is_none() {
                            first_failure = Some((id.clone(), error));
                        }
                    }
                }
            }
            if let Some((node, error)) = first_failure {
                return Err(PlanError::NodeFailed {
                    node,
                    level,
                    error,
                    completed: results,
                });
            }
        } else {
            match with_concurrency_limit(tasks, options.limit).await {
                Ok(values) => results.extend(ids.iter().cloned().zip(values)),
                Err(failure) => {
                    let node = ids[failure.index].clone();
                    tracing::warn!("❌ Plan node '{}' failed: {}", node, describe(&failure.error));
                    return Err(PlanError::NodeFailed {
                        node,
                        level,
                        error: failure.error,
                        completed: results,
                    });
                }
            }
        }
    }

    tracing::info!("✅ Plan finished: {} node(s)", results.len());
    Ok(PlanReport { levels, results })
}

fn describe<E>(error: &TaskError<E>) -> &'static str {
    match error {
        TaskError::Failed(_) => "returned an error",
        TaskError::Panicked(_) => "panicked",
        TaskError::Cancelled => "was cancelled",
    }
}
