//! Error types for IntakeSync.
//!
//! Library crates use [`IntakeSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all IntakeSync operations.
#[derive(Debug, thiserror::Error)]
pub enum IntakeSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport failure or non-2xx response from the remote database.
    #[error("network error: {0}")]
    Network(String),

    /// Remote response body could not be read or decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// An intake row could not be turned into a canonical record.
    #[error("classification error: {message}")]
    Classification { message: String },

    /// Malformed input value (staging row, id, type, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Tabular store (workbook / sheet) error.
    #[error("sheet error: {message}")]
    Sheet { message: String },

    /// Run ledger or lease store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IntakeSyncError>;

impl IntakeSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a classification error from any displayable message.
    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a sheet error from any displayable message.
    pub fn sheet(msg: impl Into<String>) -> Self {
        Self::Sheet {
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
