//! Error types for the form engine
//!
//! Three severities are kept apart: schema errors are fatal to one subschema,
//! node errors are recoverable operation failures, and validation issues are
//! plain data (see [`crate::domain::ValidationIssue`]) that never travel as `Err`.

use thiserror::Error;

/// Malformed or self-contradictory schema
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// An `allOf` entry declares a `type` different from the accumulated one
    #[error("allOf entry {index} redefines type '{base}' as '{found}'")]
    AllOfTypeRedefinition {
        index: usize,
        base: String,
        found: String,
    },

    /// The reference table has no schema for a `$ref`
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A `$ref` chain loops back onto itself
    #[error("Circular reference: {0}")]
    CircularReference(String),

    /// `type` holds something no structural kind can be derived from
    #[error("Unknown schema type: {0}")]
    UnknownType(String),

    /// A computed expression failed to compile
    #[error("Expression error in '{property}': {message}")]
    Expression { property: String, message: String },

    /// Node nesting went past the configured depth
    #[error("Maximum schema depth {0} exceeded")]
    MaxDepthExceeded(usize),

    /// A keyword carries a value of the wrong shape
    #[error("Invalid '{keyword}' keyword: {reason}")]
    InvalidKeyword { keyword: String, reason: String },
}

impl SchemaError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllOfTypeRedefinition { .. } => "ALL_OF_TYPE_REDEFINITION",
            Self::UnresolvedReference(_) => "UNRESOLVED_REFERENCE",
            Self::CircularReference(_) => "CIRCULAR_REFERENCE",
            Self::UnknownType(_) => "UNKNOWN_SCHEMA_TYPE",
            Self::Expression { .. } => "EXPRESSION_COMPILE_FAILED",
            Self::MaxDepthExceeded(_) => "MAX_DEPTH_EXCEEDED",
            Self::InvalidKeyword { .. } => "INVALID_KEYWORD",
        }
    }
}

/// Recoverable failure of a node-graph operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    /// No node lives at the path
    #[error("Node not found: {0}")]
    NotFound(String),

    /// The path string cannot be parsed
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The handle refers to a node that has been destroyed
    #[error("Node handle is stale: {0}")]
    Stale(String),

    /// The operation does not apply to this node
    #[error("Illegal mutation at '{path}': {reason}")]
    IllegalMutation { path: String, reason: String },
}

impl NodeError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::InvalidPath { .. } | Self::Stale(_) => "NODE_NOT_FOUND",
            Self::IllegalMutation { .. } => "ILLEGAL_MUTATION",
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by [`crate::Form`] operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl FormError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Schema(e) => e.code(),
            Self::Node(e) => e.code(),
        }
    }
}

/// Result type alias for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;

/// Result type alias for form operations
pub type FormResult<T> = Result<T, FormError>;
