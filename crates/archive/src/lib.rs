//! Content-addressed ZIP archives for database artifacts.
//!
//! This crate owns the three low-level building blocks the publish and load
//! pipelines are built on:
//!
//! - **Packing/unpacking** ZIP containers (deflate) while preserving
//!   repository-relative entry paths ([`pack`], [`unpack`])
//! - **Checksums** — MD5 hex digests of file contents ([`checksum::md5_file`])
//! - **Fingerprints** — deterministic, opaque archive identifiers derived
//!   from an archive's member paths and the publishing version
//!   ([`fingerprint`])
//!
//! All functions here are synchronous; async callers run them inside
//! [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html).

pub mod checksum;
mod codec;
pub mod error;
mod fingerprint;

pub use crate::codec::{pack, unpack};
pub use crate::fingerprint::fingerprint;
