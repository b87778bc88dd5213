//! Error types for mongoz

use thiserror::Error;

/// Error produced by the document text parser.
///
/// `offset` is the byte offset in the input where parsing stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// Core error type for mongoz operations
#[derive(Error, Debug)]
pub enum MongozError {
    /// Malformed local input; never reaches the network.
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Caller-facing classification of a [`MongozError`].
///
/// Hosts react per kind: fix the input, reconfigure the connection, fix the
/// query, or refresh a stale view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Connection,
    Query,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Connection => "connection",
            ErrorKind::Query => "query",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MongozError {
    /// Build a validation error for the named input field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        MongozError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MongozError::Validation { .. } | MongozError::Parse(_) => ErrorKind::Validation,
            MongozError::Connection(_) | MongozError::Timeout(_) => ErrorKind::Connection,
            MongozError::Query(_) => ErrorKind::Query,
            MongozError::NotFound(_) => ErrorKind::NotFound,
            MongozError::InvalidPath(_)
            | MongozError::Configuration(_)
            | MongozError::Io(_)
            | MongozError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Name of the offending input field, for validation errors
    pub fn field(&self) -> Option<&str> {
        match self {
            MongozError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Result type alias for mongoz operations
pub type Result<T> = std::result::Result<T, MongozError>;
