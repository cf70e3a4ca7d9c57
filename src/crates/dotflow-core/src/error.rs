//! Error types for pipeline parsing, validation, and execution
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.
//!
//! # Error Hierarchy
//!
//! ```text
//! PipelineError
//! ├── Parse          - malformed DOT or checkpoint input
//! ├── Validation     - structural defects found by the validator
//! ├── Routing        - no outgoing edge matched at a node
//! ├── CycleLimit     - a node exceeded the visit bound
//! ├── Handler        - a node handler failed
//! ├── Cancelled      - the cancel token fired
//! ├── Checkpoint     - checkpoint save/load failed
//! ├── Condition      - a guard expression failed to parse
//! ├── Template       - template rendering failed
//! ├── Serialization  - JSON errors
//! └── Io             - filesystem errors
//! ```

use thiserror::Error;

/// Convenience result type using [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A single defect reported by the graph validator.
///
/// The validator collects every defect it finds rather than stopping at the
/// first, so lint output can show the full picture in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintError {
    /// Node the defect is attached to, when one applies.
    pub node_id: Option<String>,
    /// Human-readable description of the defect.
    pub message: String,
}

impl LintError {
    /// Create a lint error attached to a node.
    pub fn node(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(id.into()),
            message: message.into(),
        }
    }

    /// Create a lint error about the graph as a whole.
    pub fn graph(message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "{}: {}", id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Errors surfaced while parsing, validating, or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed DOT source or checkpoint content.
    #[error("Parse error: {0}")]
    Parse(String),

    /// One or more structural defects found by the validator.
    ///
    /// Carries the full defect list so callers can print every lint,
    /// not just the first.
    #[error("Graph validation failed: {}", format_lints(.0))]
    Validation(Vec<LintError>),

    /// No outgoing edge matched at a node with outgoing edges.
    #[error("No matching outgoing edge at node '{node}'{}", detail.as_ref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Routing {
        /// Node where routing failed.
        node: String,
        /// Extra context, e.g. the unmatched switch value.
        detail: Option<String>,
    },

    /// A node was visited more often than the configured bound.
    #[error("Node '{node}' exceeded the cycle limit of {limit} visits")]
    CycleLimit {
        /// Node that exceeded the bound.
        node: String,
        /// The configured visit bound.
        limit: usize,
    },

    /// A node handler failed; the node id is attached by the engine.
    #[error("Node '{node}' failed: {message}")]
    Handler {
        /// Node whose handler failed.
        node: String,
        /// Error message from the handler.
        message: String,
    },

    /// The cancel token fired during the walk.
    #[error("Execution cancelled at node '{node}'")]
    Cancelled {
        /// Node current when cancellation was observed.
        node: String,
    },

    /// Checkpoint save or load failed. Save failures abort the run,
    /// otherwise resumability would silently break.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// A guard expression failed to parse.
    #[error("Condition '{expr}' failed to parse: {reason}")]
    Condition {
        /// The original expression text.
        expr: String,
        /// What went wrong.
        reason: String,
    },

    /// Template rendering failed.
    #[error("Template error: {0}")]
    Template(String),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Create a handler error with node context.
    pub fn handler(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a routing error without extra detail.
    pub fn routing(node: impl Into<String>) -> Self {
        Self::Routing {
            node: node.into(),
            detail: None,
        }
    }

    /// True if this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

fn format_lints(lints: &[LintError]) -> String {
    lints
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
