//! Flavor Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A flavor error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for flavor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The requested flavor combines values outside the supported set.
    #[display("invalid flavor: {_0}")]
    InvalidSpec(#[error(not(source))] String),
    /// The source file cannot be converted to the requested flavor.
    #[display("unsupported conversion: {_0}")]
    UnsupportedConversion(#[error(not(source))] String),
    /// A media file's properties could not be determined.
    #[display("cannot probe media file: {_0}")]
    Probe(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
