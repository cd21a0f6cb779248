//! In-memory repository backend for testing.

use crate::error::{ErrorKind, Result};
use crate::{VersionedBackend, key, validate_path};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory repository backend for testing.
///
/// Objects are stored in a [`BTreeMap`] behind a [`RwLock`], so all trait
/// methods operate on `&self` without external synchronisation. Ideal for
/// unit tests that need a [`VersionedBackend`] without filesystem or
/// network dependencies.
///
/// The backend can also simulate transient transport failures: every read
/// operation first consumes one pending failure (if any), which is how the
/// retry schedule in the load pipeline gets exercised.
pub struct MockBackend {
    name: String,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    pending_failures: AtomicUsize,
}

impl MockBackend {
    /// Create an empty mock backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
            pending_failures: AtomicUsize::new(0),
        }
    }

    /// Queue `count` transient network failures; each read operation
    /// consumes one before doing any work.
    pub fn inject_failures(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the backend holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn physical(&self, object_key: &str, version: &str) -> Result<String> {
        let physical = key::versioned(object_key, version);
        let validated = validate_path(&physical)?;
        validated
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidPath(validated.clone())))
    }

    fn take_failure(&self) -> Result<()> {
        let previous = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous > 0 {
            exn::bail!(ErrorKind::Network("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VersionedBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, object_key: &str, version: &str) -> Result<bool> {
        let physical = self.physical(object_key, version)?;
        Ok(self.objects.read().await.contains_key(&physical))
    }

    async fn get(&self, object_key: &str, version: &str, dest: &Path) -> Result<()> {
        self.take_failure()?;
        let physical = self.physical(object_key, version)?;
        let data = self
            .objects
            .read()
            .await
            .get(&physical)
            .cloned()
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(physical)))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        tokio::fs::write(dest, data).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn put(&self, source: &Path, object_key: &str, version: &str) -> Result<()> {
        let physical = self.physical(object_key, version)?;
        let data = tokio::fs::read(source).await.map_err(ErrorKind::Io)?;
        self.objects.write().await.insert(physical, data);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.take_failure()?;
        let wanted = match prefix.is_empty() {
            true => String::new(),
            false => format!("{}/", prefix.trim_end_matches('/')),
        };
        Ok(self.objects.read().await.keys().filter(|k| k.starts_with(&wanted)).cloned().collect())
    }

    async fn ls_versions(&self, name: &str) -> Result<Vec<String>> {
        let suffix = format!("/{}", key::HEADER_FILE);
        let prefix = format!("{name}/");
        let mut versions: Vec<String> = self
            .list(name)
            .await?
            .into_iter()
            .filter_map(|object_key| {
                let rest = object_key.strip_prefix(&prefix)?;
                let version = rest.strip_suffix(&suffix)?;
                (!version.is_empty() && !version.contains('/')).then(|| version.to_string())
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    async fn delete(&self, object_key: &str, version: &str) -> Result<()> {
        let physical = self.physical(object_key, version)?;
        self.objects
            .write()
            .await
            .remove(&physical)
            .map(|_| ())
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(physical)))
    }
}
