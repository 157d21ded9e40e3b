//! Error types for dmcheck.
//!
//! All errors in dmcheck are strongly typed using thiserror.
//! Per-rule failures (syntax errors, unbound variables) are also surfaced as
//! diagnostics; the error types here are what the individual stages return
//! before the checker folds them into a diagnostic list.

use thiserror::Error;

use crate::schema::{EdgeId, NodeId};
use crate::span::Span;

/// Malformed rule text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Syntax error at line {}, column {}: {message}", span.line, span.column)]
pub struct SyntaxError {
    /// What the parser expected or found.
    pub message: String,
    /// Position of the offending token.
    pub span: Span,
}

impl SyntaxError {
    /// Creates a syntax error at `span`.
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Rejected schema mutations and malformed schema documents.
///
/// A mutation that returns one of these leaves the schema unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("Schema conflict: attribute '{attribute}' on node {node} is already {existing}, cannot add it as {requested}")]
    Conflict {
        node: NodeId,
        attribute: String,
        existing: String,
        requested: String,
    },

    #[error("Attribute '{attribute}' on node {node} already exists with the same value kind (edge {existing})")]
    DuplicateEdge {
        node: NodeId,
        attribute: String,
        existing: EdgeId,
    },

    #[error("Schema node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Schema edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("Unknown schema root: {0}")]
    UnknownRoot(String),

    #[error("Invalid range: min {min} is greater than max {max}")]
    InvalidRange {
        min: String,
        max: String,
    },

    #[error("{what} name cannot be empty")]
    EmptyName {
        what: &'static str,
    },

    #[error("Invalid attribute name '{name}': only letters, digits, '-' and '_' are allowed")]
    InvalidName {
        name: String,
    },

    #[error("Invalid schema document: {reason}")]
    InvalidDocument {
        reason: String,
    },
}

impl SchemaError {
    /// Returns true if this is a conflicting-kind edge insertion.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::DuplicateEdge { .. })
    }
}

/// Failures while building a rule's binding graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("Variable {variable} is used before it is bound")]
    UnboundVariable {
        variable: String,
        span: Span,
    },
}

impl BindingError {
    /// Source position of the failure.
    #[must_use]
    pub const fn span(&self) -> Span {
        match self {
            Self::UnboundVariable { span, .. } => *span,
        }
    }
}

/// Failures of the incremental engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Check queue full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },
}

/// Top-level error type for dmcheck.
#[derive(Debug, Error)]
pub enum DmError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl DmError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a schema error.
    #[must_use]
    pub const fn is_schema(&self) -> bool {
        matches!(self, Self::Schema(_))
    }

    /// Returns true if this is a syntax error.
    #[must_use]
    pub const fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax(_))
    }

    /// Returns true if this is an engine error.
    #[must_use]
    pub const fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// Returns true if this is an I/O error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result type alias for dmcheck operations.
pub type DmResult<T> = Result<T, DmError>;
