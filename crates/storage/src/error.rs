//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The requested key does not exist at the requested version.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Credential rejection by the remote service.
    #[display("authentication failed: {_0}")]
    Auth(#[error(not(source))] String),
    /// Transport-level failure; retrying may succeed.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The object failed a server-side integrity check on read.
    #[display("corrupt object: {_0}")]
    Corrupt(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes the repository root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// The repository names a backend kind with no registered factory.
    #[display("unsupported backend: {_0}")]
    UnsupportedBackend(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    Backend(#[error(not(source))] String),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::Backend(_))
    }
}
