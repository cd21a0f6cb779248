//! Registry of backend factories, keyed by backend kind.
//!
//! The backend set is open: deployments can register their own transports.
//! Read paths *skip* repositories whose kind has no factory; write paths
//! reject them with [`UnsupportedBackend`](ErrorKind::UnsupportedBackend).

use crate::backend::{FileSystemBackend, S3Backend};
use crate::error::{ErrorKind, Result};
use crate::{BackendHandle, BackendKind, Repository};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

type Factory = Arc<dyn Fn(&Repository) -> Result<BackendHandle> + Send + Sync>;

/// Maps backend kinds to factories producing connected backends.
///
/// # Examples
///
/// ```
/// use mediathek_storage::{BackendKind, BackendRegistry, Repository};
///
/// let registry = BackendRegistry::builtin();
/// assert!(registry.supports(&BackendKind::FileSystem));
/// assert!(!registry.supports(&BackendKind::Artifactory));
/// ```
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, Factory>,
}

impl BackendRegistry {
    /// Registry with the built-in kinds: `file-system`, `s3`, and `minio`
    /// (the latter two share the S3 factory). `artifactory` is recognized
    /// by configuration parsing but intentionally has no factory here.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(BackendKind::FileSystem, |repo| {
            let root = Path::new(&repo.host).join(&repo.name);
            Ok(Arc::new(FileSystemBackend::new(repo.name.clone(), root)?))
        });
        let s3 = |repo: &Repository| -> Result<BackendHandle> {
            let key_id = std::env::var("AWS_ACCESS_KEY_ID")
                .map_err(|_| ErrorKind::Auth("AWS_ACCESS_KEY_ID is not set".to_string()))?;
            let key_secret = std::env::var("AWS_SECRET_ACCESS_KEY")
                .map_err(|_| ErrorKind::Auth("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;
            let endpoint = match repo.host.starts_with("http") {
                true => repo.host.clone(),
                false => format!("https://{}", repo.host),
            };
            Ok(Arc::new(S3Backend::new(repo.name.clone(), repo.name.clone(), Some(endpoint), key_id, key_secret)?))
        };
        registry.register(BackendKind::S3, s3);
        registry.register(BackendKind::Minio, s3);
        registry
    }

    /// Register (or replace) a factory for a backend kind.
    pub fn register<F>(&mut self, kind: BackendKind, factory: F)
    where
        F: Fn(&Repository) -> Result<BackendHandle> + Send + Sync + 'static,
    {
        self.factories.insert(kind.as_str().to_string(), Arc::new(factory));
    }

    /// Whether a factory is registered for the kind.
    pub fn supports(&self, kind: &BackendKind) -> bool {
        self.factories.contains_key(kind.as_str())
    }

    /// Connect to a repository.
    ///
    /// # Errors
    /// Returns [`ErrorKind::UnsupportedBackend`] when the repository's kind
    /// has no registered factory.
    pub fn connect(&self, repository: &Repository) -> Result<BackendHandle> {
        match self.factories.get(repository.backend.as_str()) {
            Some(factory) => factory(repository),
            None => exn::bail!(ErrorKind::UnsupportedBackend(repository.backend.to_string())),
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("BackendRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        let registry = BackendRegistry::builtin();
        assert!(registry.supports(&BackendKind::FileSystem));
        assert!(registry.supports(&BackendKind::S3));
        assert!(registry.supports(&BackendKind::Minio));
        assert!(!registry.supports(&BackendKind::Artifactory));
        assert!(!registry.supports(&BackendKind::Other("gcs".to_string())));
    }

    #[test]
    fn test_connect_unsupported() {
        let registry = BackendRegistry::builtin();
        let repo = Repository::new("r", "host", BackendKind::Artifactory);
        let err = registry.connect(&repo).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedBackend(_)));
    }

    #[test]
    fn test_connect_file_system() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BackendRegistry::builtin();
        let repo = Repository::new("local", dir.path().to_string_lossy(), BackendKind::FileSystem);
        let backend = registry.connect(&repo).unwrap();
        assert_eq!(backend.name(), "local");
    }

    #[test]
    fn test_register_custom_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = BackendRegistry::builtin();
        registry.register(BackendKind::Other("loopback".to_string()), {
            let root = dir.path().to_path_buf();
            move |repo| {
                let backend: BackendHandle = Arc::new(FileSystemBackend::new(repo.name.clone(), &root)?);
                Ok(backend)
            }
        });
        let repo = Repository::new("r", "ignored", BackendKind::Other("loopback".to_string()));
        assert!(registry.connect(&repo).is_ok());
    }
}
