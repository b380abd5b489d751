//! Error types for the IIIF loader
//!
//! Every failure aborts the run: there is no partial-success mode and no
//! automatic retry for transient storage errors. Persistence failures carry
//! the attempted statement so the offending SQL is visible in the report.

use crate::db::ExecutorError;
use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Structured description of a schema violation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    #[error("missing required field '{field}'")]
    Missing { field: String },

    #[error("unexpected fields: {}", .fields.join(", "))]
    Unexpected { fields: Vec<String> },

    #[error("field '{field}' must be '{expected}', got '{actual}'")]
    Constant {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("field '{field}' is invalid: {detail}")]
    Invalid { field: String, detail: String },

    #[error("canvas dimensions {canvas_width}x{canvas_height} do not match its image's {image_width}x{image_height}")]
    DimensionMismatch {
        canvas_width: i64,
        canvas_height: i64,
        image_width: i64,
        image_height: i64,
    },
}

/// Errors raised while parsing and persisting a document graph
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Node shape does not match the strict per-type schema
    #[error("schema violation in {kind} node '{}': {issue}", .id.as_deref().unwrap_or("embedded"))]
    SchemaViolation {
        kind: String,
        id: Option<String>,
        issue: SchemaIssue,
    },

    /// Type tag outside the six recognized node types
    #[error("unknown node type: '{0}'")]
    UnknownType(String),

    /// Same (type, id) pair processed twice within one run
    #[error("duplicate node: {kind} '{id}' was already processed in this run")]
    DuplicateNode { kind: String, id: String },

    /// Storage rejected a write; the attempted statement is included
    #[error("statement failed: {statement}: {source}")]
    Persistence {
        statement: String,
        #[source]
        source: ExecutorError,
    },

    /// Storage was unavailable while resolving an external identifier
    #[error("identifier resolution failed for '{external_id}': {source}")]
    IdentifierResolution {
        external_id: String,
        #[source]
        source: ExecutorError,
    },

    /// Document file could not be read or decompressed
    #[error("failed to read document '{path}': {source}")]
    DocumentRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Document file is not valid JSON
    #[error("failed to parse document '{path}': {source}")]
    DocumentParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Loader configuration is missing or invalid
    #[error("configuration error: {0}")]
    Config(String),
}

impl LoaderError {
    /// Create a schema violation for a node
    pub fn schema(kind: impl Into<String>, id: Option<String>, issue: SchemaIssue) -> Self {
        Self::SchemaViolation {
            kind: kind.into(),
            id,
            issue,
        }
    }

    /// Create a duplicate-node error
    pub fn duplicate(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DuplicateNode {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
