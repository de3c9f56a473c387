//! Centralized error types for mailpool.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailpool library.
#[derive(Error, Debug)]
pub enum PoolError {
    /// A container (or other runtime resource) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The delivery-log database rejected an operation.
    #[error("Storage error during {operation} ({key}): {source}")]
    Storage {
        operation: &'static str,
        key: String,
        source: rusqlite::Error,
    },

    /// The mail transport could not be opened at all.
    #[error("Mail transport unavailable: {0}")]
    Transport(String),

    /// A command executed inside a container failed.
    #[error("Command failed in container '{container}': {reason}")]
    RuntimeExec { container: String, reason: String },

    /// Any other failure reported by the container runtime.
    #[error("Container runtime error: {0}")]
    Runtime(String),

    /// A mail payload or runtime snapshot could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A remote HTTP collaborator (quote source, template API) failed.
    #[error("Remote service error: {0}")]
    Remote(String),

    /// Invalid configuration or user input.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, PoolError>`.
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a database error with the failing operation and key.
    pub fn storage(operation: &'static str, key: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Storage {
            operation,
            key: key.into(),
            source,
        }
    }

    /// Create a `RuntimeExec` variant.
    pub fn exec(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuntimeExec {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the target resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for PoolError {
    fn from(source: reqwest::Error) -> Self {
        Self::Remote(source.to_string())
    }
}
