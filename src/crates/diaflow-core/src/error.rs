//! Error types for diagram construction and execution
//!
//! All fallible operations in the engine return [`Result`], an alias over
//! [`EngineError`]. The variants mirror the failure taxonomy of the engine:
//! graph-build failures are fatal before any event is emitted, per-node
//! failures surface as `node_error` events, and scheduler-level failures
//! (deadlock, timeout, cancellation) end the run with `execution_failed`.
//!
//! # Error Hierarchy
//!
//! ```text
//! EngineError
//! ├── InvalidGraph      - Diagram cannot be turned into a runnable graph
//! ├── Validation        - Handler property validation failed for a node
//! ├── HandlerFailure    - A node handler returned an error
//! ├── Deadlock          - No node is ready and nothing is running
//! ├── Timeout           - Node or execution time limit exceeded
//! ├── Cancelled         - Run cancelled by the caller
//! ├── Serialization     - JSON encode/decode errors
//! ├── Yaml              - YAML diagram parse errors
//! ├── Io                - File and subprocess I/O errors
//! └── Configuration     - Invalid engine configuration
//! ```

use thiserror::Error;

/// Convenience result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error type covering diagram validation, scheduling, and node execution.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The diagram cannot be compiled into a runnable graph.
    ///
    /// Raised at build time, before any event is emitted. Common causes:
    /// no start node, an arrow referencing a missing node, or a node whose
    /// required properties are absent.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Handler property validation failed for a specific node.
    #[error("node '{node}' failed validation: {error}")]
    Validation {
        /// Node that failed validation
        node: String,
        /// Description of the invalid property
        error: String,
    },

    /// A node handler returned an error during execution.
    #[error("node '{node}' execution failed: {error}")]
    HandlerFailure {
        /// Node whose handler failed
        node: String,
        /// Error message from the handler
        error: String,
    },

    /// No pending node is ready and no node is running.
    ///
    /// `remaining` lists the nodes whose dependencies can never be satisfied.
    #[error("no nodes ready to execute; remaining: {remaining:?}")]
    Deadlock {
        /// Pending nodes that could not be scheduled
        remaining: Vec<String>,
    },

    /// A node or the whole execution exceeded its time limit.
    #[error("operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out
        operation: String,
        /// Limit that was exceeded, in milliseconds
        duration_ms: u64,
    },

    /// The run was cancelled by the caller.
    #[error("execution cancelled")]
    Cancelled,

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML diagram parsing failed.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O operation failed (file access, subprocess spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine or handler configuration is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Create a [`EngineError::HandlerFailure`] with node context.
    pub fn handler(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::HandlerFailure {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a [`EngineError::Validation`] with node context.
    pub fn validation(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Validation {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Node id attached to this error, if the error is node-scoped.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::Validation { node, .. } | Self::HandlerFailure { node, .. } => Some(node),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_carries_node_context() {
        let err = EngineError::handler("llm_call", "API timeout");
        assert_eq!(
            err.to_string(),
            "node 'llm_call' execution failed: API timeout"
        );
        assert_eq!(err.node_id(), Some("llm_call"));
    }

    #[test]
    fn deadlock_lists_remaining_nodes() {
        let err = EngineError::Deadlock {
            remaining: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("a"));
        assert!(err.node_id().is_none());
    }
}
