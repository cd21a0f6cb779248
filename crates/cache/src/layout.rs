//! Two-tier cache layout.
//!
//! A materialized database flavor lives at
//! `<root>/<name>/<version>/<flavor_id>/`. There are up to two roots: the
//! user cache (always writable) and an optional shared cache. Reads
//! consult the shared tier first; writes go to the user tier.

use crate::error::{ErrorKind, Result};
use crate::marker::is_marked_complete;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Which cache tier a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Shared,
    User,
}

/// The two cache roots.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    user: PathBuf,
    shared: Option<PathBuf>,
}

/// One flavor directory found in the cache.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    /// Absolute path of the flavor directory.
    pub path: PathBuf,
    pub tier: CacheTier,
    pub name: String,
    pub version: String,
    pub flavor_id: String,
    /// Whether the completeness sentinel is present.
    pub complete: bool,
}

impl CacheLayout {
    /// A layout with a user tier and an optional shared tier.
    pub fn new(user: impl Into<PathBuf>, shared: Option<PathBuf>) -> Self {
        Self {
            user: user.into(),
            shared,
        }
    }

    /// The writable user tier root.
    pub fn user_root(&self) -> &Path {
        &self.user
    }

    /// The read-first shared tier root, if configured.
    pub fn shared_root(&self) -> Option<&Path> {
        self.shared.as_deref()
    }

    /// Both roots in read resolution order: shared, then user.
    pub fn roots(&self) -> impl Iterator<Item = (CacheTier, &Path)> {
        self.shared
            .as_deref()
            .map(|root| (CacheTier::Shared, root))
            .into_iter()
            .chain(std::iter::once((CacheTier::User, self.user.as_path())))
    }

    /// Resolve the flavor directory for `(name, version, flavor_id)`.
    ///
    /// An existing directory in the shared tier wins; otherwise the user
    /// tier is used (and is where the directory will be created). When
    /// both tiers hold the entry, the shared one is authoritative and the
    /// divergence is logged.
    pub fn flavor_dir(&self, name: &str, version: &str, flavor_id: &str) -> PathBuf {
        let relative = Path::new(name).join(version).join(flavor_id);
        if let Some(shared) = &self.shared {
            let candidate = shared.join(&relative);
            if candidate.exists() {
                if self.user.join(&relative).exists() {
                    warn!(
                        name,
                        version, flavor_id, "entry exists in both cache tiers; using the shared copy"
                    );
                }
                return candidate;
            }
        }
        self.user.join(relative)
    }

    /// Enumerate every flavor directory in both tiers.
    ///
    /// A directory qualifies if it holds a dependency table or a header;
    /// anything else at that depth is noise (temp dirs, foreign files)
    /// and is skipped.
    pub fn entries(&self) -> Result<Vec<CachedEntry>> {
        let mut out = Vec::new();
        for (tier, root) in self.roots() {
            if !root.exists() {
                continue;
            }
            for name_entry in read_dirs(root)? {
                for version_entry in read_dirs(&name_entry)? {
                    for flavor_entry in read_dirs(&version_entry)? {
                        if !flavor_entry.join("db.parquet").exists() && !flavor_entry.join("db.yaml").exists() {
                            continue;
                        }
                        out.push(CachedEntry {
                            complete: is_marked_complete(&flavor_entry),
                            tier,
                            name: file_name(&name_entry),
                            version: file_name(&version_entry),
                            flavor_id: file_name(&flavor_entry),
                            path: flavor_entry,
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

fn read_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(path).map_err(ErrorKind::Io)? {
        let entry = entry.map_err(ErrorKind::Io)?;
        let file_type = entry.file_type().map_err(ErrorKind::Io)?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort_unstable();
    Ok(dirs)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::mark_complete;

    fn materialize(root: &Path, name: &str, version: &str, flavor: &str) -> PathBuf {
        let dir = root.join(name).join(version).join(flavor);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("db.yaml"), b"name: test\n").unwrap();
        dir
    }

    #[test]
    fn test_flavor_dir_prefers_existing_shared() {
        let user = tempfile::tempdir().unwrap();
        let shared = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(user.path(), Some(shared.path().to_path_buf()));

        // Nothing cached: resolves to the user tier.
        let fresh = layout.flavor_dir("emodb", "1.0.0", "default");
        assert!(fresh.starts_with(user.path()));

        // Cached in the shared tier: resolves there.
        materialize(shared.path(), "emodb", "1.0.0", "default");
        let resolved = layout.flavor_dir("emodb", "1.0.0", "default");
        assert!(resolved.starts_with(shared.path()));
    }

    #[test]
    fn test_flavor_dir_without_shared_tier() {
        let user = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(user.path(), None);
        assert!(layout.flavor_dir("emodb", "1.0.0", "default").starts_with(user.path()));
    }

    #[test]
    fn test_entries_across_tiers() {
        let user = tempfile::tempdir().unwrap();
        let shared = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(user.path(), Some(shared.path().to_path_buf()));

        let complete_dir = materialize(user.path(), "emodb", "1.0.0", "default");
        mark_complete(&complete_dir).unwrap();
        materialize(user.path(), "emodb", "1.1.0", "abcd1234");
        materialize(shared.path(), "other", "2.0.0", "default");
        // A directory without header or dependency table is skipped.
        std::fs::create_dir_all(user.path().join("junk/0.0.0/default")).unwrap();

        let entries = layout.entries().unwrap();
        assert_eq!(entries.len(), 3);
        let complete: Vec<_> = entries.iter().filter(|e| e.complete).collect();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].name, "emodb");
        assert_eq!(complete[0].version, "1.0.0");
        assert_eq!(complete[0].flavor_id, "default");
        assert!(entries.iter().any(|e| e.tier == CacheTier::Shared && e.name == "other"));
    }
}
