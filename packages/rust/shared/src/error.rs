//! Error types for docfill.
//!
//! Library crates use [`DocfillError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docfill operations.
#[derive(Debug, thiserror::Error)]
pub enum DocfillError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Unknown or missing session token.
    #[error("invalid session: {token:?}")]
    InvalidSession { token: String },

    /// The uploaded file is neither a DOCX nor a PDF.
    #[error("unsupported file type: {file_name:?} (expected .docx or .pdf)")]
    UnsupportedFormat { file_name: String },

    /// The source document could not be opened or parsed.
    #[error("failed to extract text from {path:?}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// Transport or response error talking to the variable oracle.
    #[error("oracle error: {0}")]
    Oracle(String),

    /// The filled document could not be produced or written.
    #[error("failed to fill document {path:?}: {message}")]
    Fill { path: PathBuf, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (bad file name, oversized upload, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocfillError>;

impl DocfillError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Unknown session token.
    pub fn invalid_session(token: impl Into<String>) -> Self {
        Self::InvalidSession {
            token: token.into(),
        }
    }

    /// Extraction failure for the document at `path`.
    pub fn extraction(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Fill failure for the document at `path`.
    pub fn fill(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Fill {
            path: path.into(),
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
}
