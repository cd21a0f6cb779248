//! Local filesystem repository backend.
//!
//! Objects live under a root directory using the canonical key layout.
//! Uploads are staged next to their destination and renamed into place so
//! readers never observe partial objects.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{ErrorKind, Result};
use crate::{VersionedBackend, key, path::validate as validate_path};

/// Repository backend on the local filesystem.
///
/// All keys are resolved relative to the configured root directory, which
/// must be absolute. Typically the root is `<host>/<repository>` of a
/// `file-system` repository.
///
/// # Examples
///
/// ```no_run
/// use mediathek_storage::backend::FileSystemBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = FileSystemBackend::new("data-local", "/data/repositories/data-local")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FileSystemBackend {
    name: String,
    root: PathBuf,
}

impl FileSystemBackend {
    /// Create a new local filesystem backend rooted at `root`.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidPath`] if the path is not absolute.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
        }
        Ok(Self {
            name: name.into(),
            root: root.to_path_buf(),
        })
    }

    /// Resolve a `(key, version)` pair to an absolute path under the root.
    fn object_path(&self, object_key: &str, version: &str) -> Result<PathBuf> {
        let physical = key::versioned(object_key, version);
        let validated = validate_path(&physical)?;
        Ok(self.root.join(validated))
    }
}

#[async_trait]
impl VersionedBackend for FileSystemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, object_key: &str, version: &str) -> Result<bool> {
        let path = self.object_path(object_key, version)?;
        Ok(tokio::fs::try_exists(&path).await.map_err(ErrorKind::Io)?)
    }

    async fn get(&self, object_key: &str, version: &str, dest: &Path) -> Result<()> {
        let path = self.object_path(object_key, version)?;
        if !tokio::fs::try_exists(&path).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::NotFound(key::versioned(object_key, version)));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        tokio::fs::copy(&path, dest).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn put(&self, source: &Path, object_key: &str, version: &str) -> Result<()> {
        let path = self.object_path(object_key, version)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        // Stage-then-rename keeps partial uploads invisible.
        let staging = path.with_extension("part~");
        tokio::fs::copy(source, &staging).await.map_err(ErrorKind::Io)?;
        tokio::fs::rename(&staging, &path).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = match prefix.is_empty() {
            true => self.root.clone(),
            false => self.root.join(validate_path(prefix)?),
        };
        if !tokio::fs::try_exists(&base).await.map_err(ErrorKind::Io)? {
            return Ok(Vec::new());
        }
        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    let parts: Vec<String> =
                        relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
                    keys.push(parts.join("/"));
                }
            }
            keys.sort_unstable();
            keys
        })
        .await
        .map_err(|e| ErrorKind::Backend(e.to_string()))?;
        Ok(keys)
    }

    async fn ls_versions(&self, name: &str) -> Result<Vec<String>> {
        let base = self.root.join(validate_path(name)?);
        if !tokio::fs::try_exists(&base).await.map_err(ErrorKind::Io)? {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(&base).await.map_err(ErrorKind::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            if !entry.file_type().await.map_err(ErrorKind::Io)?.is_dir() {
                continue;
            }
            // Category directories (meta/media/attachment) never hold a
            // header, so the check below naturally excludes them.
            let header = entry.path().join(key::HEADER_FILE);
            if tokio::fs::try_exists(&header).await.map_err(ErrorKind::Io)? {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    async fn delete(&self, object_key: &str, version: &str) -> Result<()> {
        let path = self.object_path(object_key, version)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::NotFound(key::versioned(object_key, version)))
            },
            Err(e) => Err(exn::Exn::from(ErrorKind::Io(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(root: &Path) -> FileSystemBackend {
        FileSystemBackend::new("test", root).unwrap()
    }

    async fn stage(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("upload.tmp");
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    #[test]
    fn test_new_requires_absolute_path() {
        assert!(FileSystemBackend::new("x", "/absolute/path").is_ok());
        assert!(FileSystemBackend::new("x", "relative/path").is_err());
        assert!(FileSystemBackend::new("x", "./relative").is_err());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        let source = stage(work.path(), b"header contents").await;

        backend.put(&source, "emodb/db.yaml", "1.0.0").await.unwrap();
        assert!(repo.path().join("emodb/1.0.0/db.yaml").exists());

        let dest = work.path().join("fetched/db.yaml");
        backend.get("emodb/db.yaml", "1.0.0", &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"header contents");
    }

    #[tokio::test]
    async fn test_exists() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        assert!(!backend.exists("emodb/db.yaml", "1.0.0").await.unwrap());
        let source = stage(work.path(), b"x").await;
        backend.put(&source, "emodb/db.yaml", "1.0.0").await.unwrap();
        assert!(backend.exists("emodb/db.yaml", "1.0.0").await.unwrap());
        // Same key, different version
        assert!(!backend.exists("emodb/db.yaml", "2.0.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        let err = backend.get("emodb/db.yaml", "1.0.0", &work.path().join("out")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_media_archive_layout() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        let source = stage(work.path(), b"zipbytes").await;
        backend.put(&source, "emodb/media/abc-123.zip", "1.1.0").await.unwrap();
        assert!(repo.path().join("emodb/media/1.1.0/abc-123.zip").exists());
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        let source = stage(work.path(), b"x").await;
        backend.put(&source, "emodb/db.yaml", "1.0.0").await.unwrap();
        backend.put(&source, "emodb/db.parquet", "1.0.0").await.unwrap();
        backend.put(&source, "other/db.yaml", "0.1.0").await.unwrap();

        let keys = backend.list("emodb").await.unwrap();
        assert_eq!(keys, vec!["emodb/1.0.0/db.parquet".to_string(), "emodb/1.0.0/db.yaml".to_string()]);
        let all = backend.list("").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_list_nonexistent_prefix() {
        let repo = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        assert!(backend.list("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ls_versions_requires_header() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        let source = stage(work.path(), b"x").await;
        backend.put(&source, "emodb/db.yaml", "1.0.0").await.unwrap();
        backend.put(&source, "emodb/db.yaml", "1.1.0").await.unwrap();
        // An archive-only version must not be reported.
        backend.put(&source, "emodb/media/fp.zip", "2.0.0").await.unwrap();

        let versions = backend.ls_versions("emodb").await.unwrap();
        assert_eq!(versions, vec!["1.0.0".to_string(), "1.1.0".to_string()]);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        let source = stage(work.path(), b"x").await;
        backend.put(&source, "emodb/db.yaml", "1.0.0").await.unwrap();
        backend.delete("emodb/db.yaml", "1.0.0").await.unwrap();
        assert!(!backend.exists("emodb/db.yaml", "1.0.0").await.unwrap());
        let err = backend.delete("emodb/db.yaml", "1.0.0").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_security() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let backend = backend(repo.path());
        let source = stage(work.path(), b"x").await;
        assert!(backend.put(&source, "../escape/db.yaml", "1.0.0").await.is_err());
        assert!(backend.get("../../etc/passwd", "1.0.0", work.path()).await.is_err());
    }
}
