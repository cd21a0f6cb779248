//! Two-tier local cache for materialized databases.
//!
//! Layout: `<root>/<name>/<version>/<flavor_id>/` holds one complete
//! flavor of one version. There is a writable user tier and an optional
//! shared tier that is consulted first on reads. Flavor directories are
//! mutated under a cross-process [`DirLock`] and carry a `.complete`
//! sentinel once a load has fully materialized its requested scope.

pub mod error;
mod layout;
mod lock;
pub mod marker;
pub mod reuse;

pub use crate::layout::{CacheLayout, CacheTier, CachedEntry};
pub use crate::lock::{ACQUIRE_TIMEOUT, DirLock, LOCK_FILE, WARNING_TIMEOUT};
