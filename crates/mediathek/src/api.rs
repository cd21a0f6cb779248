//! Cache-level API: dependency tables, cache introspection, and
//! maintenance operations.

use crate::config::Config;
use crate::error::{ErrorKind, Result, from_cache, from_deps, from_storage};
use crate::fetch::{LazyBackend, download_dependencies, ensure_dependencies, with_retry};
use crate::resolve;
use mediathek_archive::checksum::md5_path;
use mediathek_cache::{CacheLayout, CachedEntry, DirLock, marker};
use mediathek_deps::{ArtifactKind, DependencyTable};
use mediathek_flavor::{DEFAULT_FLAVOR_ID, Flavor, FlavorSpec};
use mediathek_storage::key;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Resolve an optional version argument, defaulting to the latest.
pub(crate) async fn resolve_version(config: &Config, name: &str, version: Option<&str>) -> Result<String> {
    match version {
        Some(version) => Ok(version.to_string()),
        None => resolve::latest_version(config, name).await,
    }
}

/// The dependency table of a database version.
///
/// The table is cached in the default-flavor directory; a missing or
/// unreadable cached copy is fetched from the first repository that
/// holds the version.
pub async fn dependencies(config: &Config, name: &str, version: Option<&str>) -> Result<DependencyTable> {
    let version = resolve_version(config, name, version).await?;
    let dir = config.layout().flavor_dir(name, &version, DEFAULT_FLAVOR_ID);
    let _lock = DirLock::acquire(&dir).await.map_err(from_cache)?;
    let cancel = CancellationToken::new();
    let mut backend = LazyBackend::new(config, name, &version);
    ensure_dependencies(&mut backend, name, &version, &dir, &cancel).await
}

/// Every database flavor found in the local cache (both tiers).
pub fn cached(config: &Config) -> Result<Vec<CachedEntry>> {
    config.layout().entries().map_err(from_cache)
}

/// Relative cache path of a flavor: `<name>/<version>/<flavor_id>`.
pub fn flavor_path(name: &str, version: &str, flavor: FlavorSpec) -> Result<PathBuf> {
    let flavor = Flavor::try_from(flavor).map_err(crate::error::from_flavor)?;
    Ok(Path::new(name).join(version).join(flavor.id()))
}

/// Whether a particular flavor of a database version exists in the local
/// cache. This checks for the directory only, not for completeness.
pub async fn exists(config: &Config, name: &str, version: Option<&str>, flavor: FlavorSpec) -> Result<bool> {
    let version = resolve_version(config, name, version).await?;
    let relative = flavor_path(name, &version, flavor)?;
    Ok(config.layout().roots().any(|(_, root)| root.join(&relative).exists()))
}

/// Whether a cached flavor is *complete*: its sentinel is present and
/// every non-tombstoned path of its dependency table exists on disk in
/// materialized form and matches its recorded checksum.
///
/// Media of a non-default flavor is only checked for presence — the
/// recorded checksums describe the published originals, not the
/// transcoded files.
pub async fn verify_complete(config: &Config, name: &str, version: Option<&str>, flavor: FlavorSpec) -> Result<bool> {
    let version = resolve_version(config, name, version).await?;
    let flavor = Flavor::try_from(flavor).map_err(crate::error::from_flavor)?;
    let layout: CacheLayout = config.layout();
    let dir = layout.flavor_dir(name, &version, &flavor.id());
    if !marker::is_marked_complete(&dir) {
        return Ok(false);
    }
    let deps = match DependencyTable::load(dir.join(key::DEPENDENCIES_FILE)) {
        Ok(deps) => deps,
        Err(_) => return Ok(false),
    };
    for path in deps.files() {
        let row = deps.row(path).map_err(from_deps)?;
        if row.kind == ArtifactKind::Media && row.removed {
            continue;
        }
        let dest = match row.kind == ArtifactKind::Media && row.sampling_rate != 0 {
            true => flavor.destination(path),
            false => path.to_string(),
        };
        let full = dir.join(&dest);
        if !full.exists() {
            return Ok(false);
        }
        if row.kind == ArtifactKind::Media && !flavor.is_default() {
            continue;
        }
        let verified = tokio::task::spawn_blocking(move || md5_path(&full))
            .await
            .map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        match verified {
            Ok(digest) if digest == row.checksum => {},
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Remove a media file from every published version of a database.
///
/// The file's bytes are deleted from all archives that hold them and its
/// dependency rows become tombstones; they are never re-materialized.
/// This cannot be undone.
pub async fn remove_media(config: &Config, name: &str, file: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    for version in resolve::versions(config, name).await? {
        let (_, backend) = resolve::lookup(config, name, &version).await?;
        let staging = tempfile::tempdir().map_err(ErrorKind::Io)?;
        let mut deps = download_dependencies(&backend, name, &version, staging.path(), &cancel).await?;
        if !deps.contains(file)
            || deps.kind(file).map_err(from_deps)? != ArtifactKind::Media
            || deps.is_removed(file).map_err(from_deps)?
        {
            continue;
        }

        // Re-publish the archive without the file, if this version holds
        // one.
        let row = deps.row(file).map_err(from_deps)?;
        let archive_key = key::media(name, &row.archive);
        if with_retry(&archive_key, &cancel, || backend.exists(&archive_key, &row.version))
            .await
            .map_err(from_storage)?
        {
            let archive_path = staging.path().join("archive.zip");
            with_retry(&archive_key, &cancel, || backend.get(&archive_key, &row.version, &archive_path))
                .await
                .map_err(from_storage)?;
            let unpack_dir = staging.path().join("unpacked");
            let members = {
                let archive_path = archive_path.clone();
                let unpack_dir = unpack_dir.clone();
                tokio::task::spawn_blocking(move || mediathek_archive::unpack(&archive_path, &unpack_dir, None))
                    .await
                    .map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
                    .map_err(crate::error::from_archive)?
            };
            let survivors: Vec<String> = members.into_iter().filter(|member| member != file).collect();
            let had_file = {
                let doomed = unpack_dir.join(file);
                doomed.exists()
            };
            if had_file {
                let repacked = staging.path().join("repacked.zip");
                {
                    let repacked = repacked.clone();
                    let survivors = survivors.clone();
                    tokio::task::spawn_blocking(move || mediathek_archive::pack(&repacked, &unpack_dir, &survivors))
                        .await
                        .map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
                        .map_err(crate::error::from_archive)?;
                }
                with_retry(&archive_key, &cancel, || backend.put(&repacked, &archive_key, &row.version))
                    .await
                    .map_err(from_storage)?;
            }
        }

        deps.remove(file).map_err(from_deps)?;
        let local = staging.path().join(key::DEPENDENCIES_FILE);
        deps.save(&local).map_err(from_deps)?;
        let deps_key = key::dependencies(name);
        with_retry(&deps_key, &cancel, || backend.put(&local, &deps_key, &version)).await.map_err(from_storage)?;
        info!(name, version, file, "removed media file");
    }
    Ok(())
}

/// Distinct non-zero values of a media metadata column across the
/// dependency table.
pub(crate) fn distinct_media_values<F>(deps: &DependencyTable, read: F) -> Vec<i32>
where
    F: Fn(&DependencyTable, &str) -> i32,
{
    let mut values: HashSet<i32> = deps.media().map(|path| read(deps, path)).filter(|v| *v != 0).collect();
    let mut values: Vec<i32> = values.drain().collect();
    values.sort_unstable();
    values
}
