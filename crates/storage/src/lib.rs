pub mod backend;
pub mod error;
pub mod key;
mod path;
mod registry;
mod repository;

pub use crate::backend::VersionedBackend;
pub use crate::path::validate as validate_path;
pub use crate::registry::BackendRegistry;
pub use crate::repository::{BackendKind, Repository};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn VersionedBackend + Send + Sync>;
