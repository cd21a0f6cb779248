//! Dependency Table Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A dependency table error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for dependency table operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No row exists for the requested path.
    #[display("no dependency entry for '{_0}'")]
    NotFound(#[error(not(source))] String),
    /// A row with this path already exists where a new one was required.
    #[display("duplicate dependency entry for '{_0}'")]
    DuplicatePath(#[error(not(source))] String),
    /// The requested row is not a media row.
    #[display("'{_0}' is not a media entry")]
    NotMedia(#[error(not(source))] String),
    /// A serialized table could not be read back. Don't retry with the
    /// same input.
    #[display("corrupt dependency table: {_0}")]
    Corrupt(#[error(not(source))] String),
    /// The file extension names no known serialization format.
    #[display("unknown dependency table format: {_0}")]
    UnknownFormat(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
