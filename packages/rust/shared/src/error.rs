//! Error types for ConceptLink.
//!
//! Library crates use [`ConceptLinkError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ConceptLink operations.
#[derive(Debug, thiserror::Error)]
pub enum ConceptLinkError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// The remote service answered with a status that is not worth retrying.
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// A retryable failure persisted through every allowed attempt.
    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    /// Response body or dump file could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Graph store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (header mismatch, conflicting overrides, bad IRI, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A file the stage cannot proceed without is absent.
    #[error("required input missing: {path:?}")]
    MissingInput { path: PathBuf },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ConceptLinkError>;

impl ConceptLinkError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status carried by this error, if it came from a remote response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
