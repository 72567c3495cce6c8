//! FlowCore error types.

/// Errors raised by graph construction, ordering, scheduling and configuration.
///
/// Timeout errors that carry partial results live next to the primitives
/// that produce them (`flowcore-sync`, `flowcore-cascade`) because they are
/// generic over the result type.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("duplicate node: '{0}'")]
    DuplicateNode(String),

    #[error("node '{node}' depends on missing node '{dependency}'")]
    MissingDependency { node: String, dependency: String },

    #[error("node not found: '{0}'")]
    NodeNotFound(String),

    #[error("sort input: node '{node}' references '{dependency}', which is not in the node list")]
    MissingNode { node: String, dependency: String },

    #[error("circular dependency: {}", format_path(path))]
    CircularDependency { path: Vec<String> },

    #[error("cycle detected: {}", format_path(path))]
    CycleDetected { path: Vec<String> },

    #[error("unknown schedule pattern: '{0}'")]
    UnknownSchedulePattern(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// The offending path for either cycle variant.
    pub fn cycle_path(&self) -> Option<&[String]> {
        match self {
            FlowError::CircularDependency { path } | FlowError::CycleDetected { path } => {
                Some(path)
            }
            _ => None,
        }
    }
}

/// Render a node path as `a -> b -> a`.
pub fn format_path(path: &[String]) -> String {
    path.join(" -> ")
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_is_readable() {
        let err = FlowError::CycleDetected {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cycle detected: a -> b -> a");
        assert_eq!(err.cycle_path().unwrap().len(), 3);
    }

    #[test]
    fn test_missing_dependency_names_the_id() {
        let err = FlowError::MissingDependency {
            node: "deploy".into(),
            dependency: "build".into(),
        };
        assert!(err.to_string().contains("'build'"));
        assert!(err.cycle_path().is_none());
    }
}
