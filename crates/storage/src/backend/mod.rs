//! Versioned backend trait and implementations.
//!
//! This module defines the `VersionedBackend` trait, which provides a
//! unified interface for repository operations across different transports
//! (local filesystem, S3-compatible services, etc.).

mod local;
#[cfg(feature = "mock")]
mod mock;
mod s3;

pub use self::local::FileSystemBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
pub use self::s3::S3Backend;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Unified interface for versioned repository backends.
///
/// All objects are addressed by a logical `(key, version)` pair; the
/// mapping to physical storage paths is shared across implementations (see
/// [`key::versioned`](crate::key::versioned)). Operations are asynchronous
/// so that remote transports can interleave.
///
/// # Visibility
/// `put` must be atomic from a reader's perspective: a partially uploaded
/// object must never be observable through `exists`, `get`, or `list`.
/// That guarantee is what lets the publish pipeline order its uploads and
/// commit a version by writing the header last.
///
/// # Examples
///
/// ```no_run
/// use mediathek_storage::{VersionedBackend, key};
/// # async fn example(backend: &dyn VersionedBackend) -> mediathek_storage::error::Result<()> {
/// let published = backend.exists(&key::header("emodb"), "1.0.0").await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait VersionedBackend: Send + Sync {
    /// Name of the repository this backend is connected to (used for
    /// logging only).
    fn name(&self) -> &str;

    /// Check whether an object exists at the given version.
    async fn exists(&self, key: &str, version: &str) -> Result<bool>;

    /// Download an object to `dest`, creating parent directories as
    /// needed.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the
    /// object does not exist.
    async fn get(&self, key: &str, version: &str, dest: &Path) -> Result<()>;

    /// Upload the file at `source` under the given key and version.
    ///
    /// Must be atomic: readers either see the complete object or none at
    /// all. Overwrites an existing object with the same `(key, version)`.
    async fn put(&self, source: &Path, key: &str, version: &str) -> Result<()>;

    /// List all physical keys (version included) under a prefix.
    ///
    /// An empty prefix lists the whole repository. Used by the version
    /// resolver; backends may implement it with whatever enumeration the
    /// transport offers as long as the result is deterministic.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// List all versions of a database for which a header object exists.
    async fn ls_versions(&self, name: &str) -> Result<Vec<String>>;

    /// Delete an object. Used only by maintenance paths.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the
    /// object does not exist.
    async fn delete(&self, key: &str, version: &str) -> Result<()>;
}
