//! Top-level error types.
//!
//! The sub-crates each carry their own `ErrorKind`; this module defines
//! the kinds surfaced to API callers and the conversions from the
//! sub-crate errors. Conversions preserve the inner error tree, so the
//! original failure location stays visible in debug output.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// An error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for top-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories surfaced to callers.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The database (or the requested version of it) exists in none of
    /// the configured repositories.
    #[display("cannot find version '{version}' of database '{name}'")]
    NotFound { name: String, version: String },
    /// Bad version string, illegal id, non-portable build, unknown
    /// filter entry.
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
    /// Transport-level failure that survived the retry schedule.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Credential rejection.
    #[display("authentication failed: {_0}")]
    Auth(#[error(not(source))] String),
    /// Checksum or format mismatch on read.
    #[display("corrupt data: {_0}")]
    Corrupt(#[error(not(source))] String),
    /// A cache lock could not be acquired before the deadline.
    #[display("cache lock timeout")]
    LockTimeout,
    /// The repository names a backend kind with no registered factory.
    #[display("unsupported backend: {_0}")]
    UnsupportedBackend(#[error(not(source))] String),
    /// A media file cannot be converted to the requested flavor.
    #[display("unsupported conversion: {_0}")]
    UnsupportedConversion(#[error(not(source))] String),
    /// Per-file flavor transform failures, collected over a whole load.
    #[display("flavor transforms failed for {} file(s)", failed.len())]
    Flavor { failed: Vec<(String, String)> },
    /// Per-file fetch failures, collected over a whole load.
    #[display("load failed for {} file(s)", failed.len())]
    Load { failed: Vec<(String, String)> },
    /// The operation was cancelled by its caller.
    #[display("operation cancelled")]
    Cancelled,
    /// Configuration file or environment is unusable.
    #[display("invalid configuration: {_0}")]
    Config(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

/// Lift a storage error, preserving its tree.
pub(crate) fn from_storage(err: mediathek_storage::error::Error) -> Error {
    use mediathek_storage::error::ErrorKind as Storage;
    let kind = match &*err {
        Storage::Auth(m) => ErrorKind::Auth(m.clone()),
        Storage::Network(m) => ErrorKind::Network(m.clone()),
        Storage::Corrupt(m) => ErrorKind::Corrupt(m.clone()),
        Storage::UnsupportedBackend(m) => ErrorKind::UnsupportedBackend(m.clone()),
        // A key that the dependency table promised but the repository
        // lacks is a repository consistency problem, not a user error.
        Storage::NotFound(m) => ErrorKind::Corrupt(format!("missing object: {m}")),
        Storage::InvalidPath(p) => ErrorKind::InvalidArgument(format!("invalid path: {}", p.display())),
        Storage::Io(_) | Storage::Backend(_) => ErrorKind::Network(err.to_string()),
    };
    err.raise(kind)
}

/// Lift a cache error.
pub(crate) fn from_cache(err: mediathek_cache::error::Error) -> Error {
    use mediathek_cache::error::ErrorKind as Cache;
    let kind = match &*err {
        Cache::LockTimeout(_) => ErrorKind::LockTimeout,
        Cache::Io(_) => ErrorKind::Io(IoError::new(std::io::ErrorKind::Other, err.to_string())),
    };
    err.raise(kind)
}

/// Lift a dependency table error.
pub(crate) fn from_deps(err: mediathek_deps::error::Error) -> Error {
    let kind = ErrorKind::Corrupt(err.to_string());
    err.raise(kind)
}

/// Lift an archive error.
pub(crate) fn from_archive(err: mediathek_archive::error::Error) -> Error {
    use mediathek_archive::error::ErrorKind as Archive;
    let kind = match &*err {
        Archive::Corrupt(m) => ErrorKind::Corrupt(m.clone()),
        Archive::UnsafePath(p) => ErrorKind::Corrupt(format!("unsafe entry path: {}", p.display())),
        Archive::Io(_) => ErrorKind::Io(IoError::new(std::io::ErrorKind::Other, err.to_string())),
    };
    err.raise(kind)
}

/// Lift a flavor error.
pub(crate) fn from_flavor(err: mediathek_flavor::error::Error) -> Error {
    use mediathek_flavor::error::ErrorKind as Flavor;
    let kind = match &*err {
        Flavor::InvalidSpec(m) => ErrorKind::InvalidArgument(m.clone()),
        Flavor::UnsupportedConversion(m) => ErrorKind::UnsupportedConversion(m.clone()),
        Flavor::Probe(m) => ErrorKind::Corrupt(m.clone()),
        Flavor::Io(_) => ErrorKind::Io(IoError::new(std::io::ErrorKind::Other, err.to_string())),
    };
    err.raise(kind)
}
