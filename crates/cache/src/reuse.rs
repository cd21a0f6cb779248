//! Cross-version file reuse.
//!
//! When materializing `(name, V, flavor)` the loader may satisfy a path
//! from any *other* cached version of the same flavor, provided the
//! dependency tables agree on the content checksum. Reuse is hard-link
//! first, copy second, and strictly best-effort: any failure simply falls
//! back to fetching from the repository.

use crate::error::Result;
use crate::layout::CacheLayout;
use mediathek_deps::DependencyTable;
use semver::Version;
use std::path::Path;
use tracing::debug;

/// Another cached version of the same database and flavor, usable as a
/// reuse source.
#[derive(Debug)]
pub struct SiblingVersion {
    pub version: String,
    /// Absolute path of the sibling's flavor directory.
    pub root: std::path::PathBuf,
    /// The sibling's dependency table.
    pub deps: DependencyTable,
}

/// Find all cached sibling versions of `(name, flavor_id)`, newest first.
///
/// Newer versions are more likely to share bytes with the version being
/// materialized, so they are tried first. Siblings whose dependency table
/// cannot be read are skipped.
pub fn sibling_versions(layout: &CacheLayout, name: &str, exclude_version: &str, flavor_id: &str) -> Vec<SiblingVersion> {
    let entries = match layout.entries() {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut siblings: Vec<(Version, SiblingVersion)> = entries
        .into_iter()
        .filter(|e| e.name == name && e.flavor_id == flavor_id && e.version != exclude_version)
        .filter_map(|e| {
            let parsed = Version::parse(&e.version).ok()?;
            let deps = DependencyTable::load(e.path.join("db.parquet")).ok()?;
            Some((
                parsed,
                SiblingVersion {
                    version: e.version,
                    root: e.path,
                    deps,
                },
            ))
        })
        .collect();
    siblings.sort_by(|a, b| b.0.cmp(&a.0));
    siblings.into_iter().map(|(_, sibling)| sibling).collect()
}

/// Hard-link `src` to `dest`, falling back to a copy when linking fails
/// (different filesystems, FAT, ...). Parent directories are created.
pub fn link_or_copy(src: &Path, dest: &Path) -> Result<()> {
    use crate::error::ErrorKind;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
    }
    if std::fs::hard_link(src, dest).is_ok() {
        debug!(src = %src.display(), dest = %dest.display(), "hard-linked from sibling version");
        return Ok(());
    }
    std::fs::copy(src, dest).map_err(ErrorKind::Io)?;
    debug!(src = %src.display(), dest = %dest.display(), "copied from sibling version");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediathek_deps::MediaEntry;

    fn media_entry(path: &str, checksum: &str) -> MediaEntry {
        MediaEntry {
            path: path.to_string(),
            archive: "fp".to_string(),
            version: "1.0.0".to_string(),
            checksum: checksum.to_string(),
            bit_depth: 16,
            channels: 1,
            sampling_rate: 16000,
            duration: 1.0,
        }
    }

    fn cache_version(root: &Path, name: &str, version: &str, flavor: &str, files: &[(&str, &str)]) {
        let dir = root.join(name).join(version).join(flavor);
        std::fs::create_dir_all(&dir).unwrap();
        let mut deps = DependencyTable::new();
        deps.add_media(files.iter().map(|(path, checksum)| media_entry(path, checksum)).collect()).unwrap();
        deps.save(dir.join("db.parquet")).unwrap();
        for (path, contents) in files {
            let file = dir.join(path);
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, contents).unwrap();
        }
    }

    #[test]
    fn test_siblings_newest_first() {
        let user = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(user.path(), None);
        cache_version(user.path(), "emodb", "1.0.0", "default", &[("a.wav", "one")]);
        cache_version(user.path(), "emodb", "1.2.0", "default", &[("a.wav", "one")]);
        cache_version(user.path(), "emodb", "1.10.0", "default", &[("a.wav", "one")]);

        let siblings = sibling_versions(&layout, "emodb", "2.0.0", "default");
        let versions: Vec<&str> = siblings.iter().map(|s| s.version.as_str()).collect();
        // Semver order, not lexicographic: 1.10.0 > 1.2.0.
        assert_eq!(versions, vec!["1.10.0", "1.2.0", "1.0.0"]);
    }

    #[test]
    fn test_excludes_target_version_and_other_flavors() {
        let user = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(user.path(), None);
        cache_version(user.path(), "emodb", "1.0.0", "default", &[("a.wav", "one")]);
        cache_version(user.path(), "emodb", "1.0.0", "abcd1234", &[("a.wav", "one")]);

        let siblings = sibling_versions(&layout, "emodb", "1.0.0", "default");
        assert!(siblings.is_empty());
        let siblings = sibling_versions(&layout, "emodb", "2.0.0", "default");
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].flavor_dir_name(), "default");
    }

    #[test]
    fn test_link_or_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.wav");
        std::fs::write(&src, b"bytes").unwrap();
        let dest = dir.path().join("nested/dest.wav");
        link_or_copy(&src, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"bytes");
    }

    impl SiblingVersion {
        fn flavor_dir_name(&self) -> String {
            self.root.file_name().unwrap().to_string_lossy().into_owned()
        }
    }
}
