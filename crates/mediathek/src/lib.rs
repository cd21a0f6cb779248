//! Versioned, content-addressed management of annotated media corpora.
//!
//! Producers publish immutable, incrementally updatable database
//! versions to pluggable repositories ([`publish`]); consumers load any
//! version — optionally in a transformed audio flavor, optionally
//! restricted to a subset of tables, media, and attachments — into a
//! local two-tier cache ([`load`]). Every decision on both sides is
//! driven by the version's dependency table
//! ([`DependencyTable`](mediathek_deps::DependencyTable)): one row per
//! artifact, recording the archive that holds its bytes and the version
//! that last wrote them, which is what makes byte reuse across versions
//! and resumable partial loads possible.
//!
//! ```no_run
//! use mediathek::{Config, LoadRequest};
//!
//! # async fn example() -> mediathek::error::Result<()> {
//! let config = Config::from_env()?;
//! let db = mediathek::load(&config, LoadRequest::new("emodb")).await?;
//! println!("materialized at {}", db.root.display());
//! # Ok(())
//! # }
//! ```

pub mod api;
mod config;
pub mod error;
mod fetch;
mod filter;
mod header;
pub mod info;
mod load;
mod pipeline;
mod publish;
mod resolve;
mod stream;

pub use crate::config::{Config, ENV_CACHE_ROOT, ENV_REPOSITORIES, ENV_SHARED_CACHE_ROOT};
pub use crate::filter::Filter;
pub use crate::header::DatabaseHeader;
pub use crate::load::{LoadEvent, LoadOutcome, LoadRequest, load, load_stream};
pub use crate::publish::{PublishEvent, PublishRequest, publish, publish_stream};
pub use crate::resolve::{AvailableEntry, available, latest_version, repository, versions};
pub use crate::stream::{DatabaseStream, StreamRequest, stream};

pub use mediathek_cache::{CacheTier, CachedEntry};
pub use mediathek_deps::{ArtifactKind, DependencyTable};
pub use mediathek_flavor::{Flavor, FlavorSpec, MediaFormat, MediaProps, MediaTransform};
pub use mediathek_storage::{BackendKind, BackendRegistry, Repository, VersionedBackend};
