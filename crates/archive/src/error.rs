//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, following the conventions of the other crates in this
//! workspace.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The container is malformed or an entry fails its checksum.
    /// Don't retry with the same input.
    #[display("corrupt archive: {_0}")]
    Corrupt(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// An entry path escapes the unpack destination.
    #[display("unsafe entry path: {}", _0.display())]
    UnsafePath(#[error(not(source))] PathBuf),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
