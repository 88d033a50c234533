//! Query error types
//!
//! Error codes:
//! - AERO_DOCUMENT_PARSE (FATAL)
//! - AERO_ELEMENT_DESERIALIZATION (RECOVERABLE)
//! - AERO_INVALID_PLAN (FATAL)
//! - AERO_KEY_COLLISION (FATAL)
//! - AERO_NAVIGATION_NOT_FOUND (RECOVERABLE)
//! - AERO_EMPTY_SEQUENCE (FATAL)
//! - AERO_INVALID_PATH (FATAL)
//! - AERO_PATH_EVALUATION (FATAL)
//! - AERO_QUERY_CANCELLED (FATAL)
//! - AERO_IO (FATAL)
//! - AERO_INVALID_CONFIG (FATAL)
//!
//! Fatal errors abort the query and surface to the caller. Recoverable errors
//! are absorbed by the executors: a malformed element is skipped, a missing
//! path segment triggers the tree fallback.

use std::fmt;

use thiserror::Error;

/// Severity levels for query errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Absorbed internally, the query continues
    Recoverable,
    /// Aborts the whole query
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Recoverable => write!(f, "RECOVERABLE"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while validating or executing a query
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("document is not well-formed at byte {offset}: {reason}")]
    DocumentParse { offset: u64, reason: String },

    #[error("element does not match the source shape: {0}")]
    ElementDeserialization(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("duplicate key {key} in {conversion}")]
    KeyCollision {
        key: String,
        conversion: &'static str,
    },

    #[error("path segment not found: {0}")]
    NavigationNotFound(String),

    #[error("{0} requires a non-empty sequence")]
    EmptySequence(&'static str),

    #[error("invalid path expression '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("path evaluation failed: {0}")]
    PathEvaluation(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl QueryError {
    /// Create a document parse error
    pub fn document_parse(offset: u64, reason: impl Into<String>) -> Self {
        QueryError::DocumentParse {
            offset,
            reason: reason.into(),
        }
    }

    /// Create an invalid plan error
    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        QueryError::InvalidPlan(reason.into())
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Maps a serde_json failure on an element's bytes.
    ///
    /// Data errors mean the element is well-formed JSON of the wrong shape;
    /// anything else means the document itself is broken.
    pub fn from_element_error(offset: u64, err: serde_json::Error) -> Self {
        match err.classify() {
            serde_json::error::Category::Data => {
                QueryError::ElementDeserialization(err.to_string())
            }
            serde_json::error::Category::Io => {
                QueryError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
            }
            serde_json::error::Category::Syntax | serde_json::error::Category::Eof => {
                QueryError::document_parse(offset, err.to_string())
            }
        }
    }

    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::DocumentParse { .. } => "AERO_DOCUMENT_PARSE",
            QueryError::ElementDeserialization(_) => "AERO_ELEMENT_DESERIALIZATION",
            QueryError::InvalidPlan(_) => "AERO_INVALID_PLAN",
            QueryError::KeyCollision { .. } => "AERO_KEY_COLLISION",
            QueryError::NavigationNotFound(_) => "AERO_NAVIGATION_NOT_FOUND",
            QueryError::EmptySequence(_) => "AERO_EMPTY_SEQUENCE",
            QueryError::InvalidPath { .. } => "AERO_INVALID_PATH",
            QueryError::PathEvaluation(_) => "AERO_PATH_EVALUATION",
            QueryError::Cancelled => "AERO_QUERY_CANCELLED",
            QueryError::Io(_) => "AERO_IO",
            QueryError::InvalidConfig(_) => "AERO_INVALID_CONFIG",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            QueryError::ElementDeserialization(_) | QueryError::NavigationNotFound(_) => {
                Severity::Recoverable
            }
            _ => Severity::Fatal,
        }
    }

    /// Returns whether this error aborts the query
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether executors absorb this error
    pub fn is_recoverable(&self) -> bool {
        self.severity() == Severity::Recoverable
    }
}
