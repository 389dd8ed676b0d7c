//! Shared error type for the `pixelgraph` workspace.
//!
//! Every crate in the workspace returns [`GraphError`] from its fallible
//! public functions. [`ErrorKind`] gives callers a stable discriminant to
//! match on (mirrors the original implementation's `GraphErrc` enum) without
//! parsing error strings.

use thiserror::Error;

/// Coarse-grained error taxonomy, independent of the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidParameter,
    Cycle,
    MissingDependency,
    NoOperation,
    InvalidYaml,
    Io,
    ComputeError,
    Unknown,
}

/// The error type returned by all `pixelgraph` crates.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("cycle detected: {0}")]
    Cycle(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("no operation satisfies the requested intent: {0}")]
    NoOperation(String),

    #[error("invalid yaml: {0}")]
    InvalidYaml(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("compute error in node {node_id} ({node_name}): {message}")]
    ComputeError {
        node_id: i64,
        node_name: String,
        message: String,
    },

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl GraphError {
    /// The coarse-grained kind, for callers that want to branch on error
    /// category rather than match the full enum or parse the message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::NotFound(_) => ErrorKind::NotFound,
            GraphError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            GraphError::Cycle(_) => ErrorKind::Cycle,
            GraphError::MissingDependency(_) => ErrorKind::MissingDependency,
            GraphError::NoOperation(_) => ErrorKind::NoOperation,
            GraphError::InvalidYaml(_) => ErrorKind::InvalidYaml,
            GraphError::Io(_) => ErrorKind::Io,
            GraphError::ComputeError { .. } => ErrorKind::ComputeError,
            GraphError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Wraps an operator failure with the node that produced it, per the
    /// sequential engine's annotation contract (spec.md §7).
    pub fn compute(node_id: i64, node_name: impl Into<String>, message: impl Into<String>) -> Self {
        GraphError::ComputeError {
            node_id,
            node_name: node_name.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for GraphError {
    fn from(e: std::io::Error) -> Self {
        GraphError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for GraphError {
    fn from(e: serde_yaml::Error) -> Self {
        GraphError::InvalidYaml(e.to_string())
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
