//! Version resolution across repositories.
//!
//! Repositories are consulted in configuration order. Repositories that
//! do not exist, reject our credentials, or use a backend unsupported on
//! this platform are skipped silently; only transport-level failures
//! surface to the caller.

use crate::config::Config;
use crate::error::{ErrorKind, Result};
use mediathek_storage::error::ErrorKind as StorageErrorKind;
use mediathek_storage::{BackendHandle, BackendKind, Repository, key};
use semver::Version;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// One published `(name, version)` pair and where it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailableEntry {
    pub name: String,
    pub version: String,
    pub repository: String,
    pub backend: BackendKind,
    pub host: String,
}

/// All versions of `name` across the configured repositories, in strict
/// semver order.
pub async fn versions(config: &Config, name: &str) -> Result<Vec<String>> {
    let mut found = BTreeSet::new();
    for repository in &config.repositories {
        let Some(backend) = connect_readonly(config, repository) else {
            continue;
        };
        match backend.ls_versions(name).await {
            Ok(versions) => found.extend(versions),
            Err(e) => skip_or_surface(e, repository)?,
        }
    }
    let mut parsed: Vec<(Version, String)> = found
        .into_iter()
        .filter_map(|v| match Version::parse(&v) {
            Ok(parsed) => Some((parsed, v)),
            Err(_) => {
                warn!(name, version = %v, "ignoring non-semver version directory");
                None
            },
        })
        .collect();
    parsed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(parsed.into_iter().map(|(_, v)| v).collect())
}

/// The latest version of `name` under strict semver ordering.
///
/// # Errors
/// [`ErrorKind::NotFound`] when no repository holds any version.
pub async fn latest_version(config: &Config, name: &str) -> Result<String> {
    versions(config, name).await?.pop().ok_or_else(|| {
        exn::Exn::from(ErrorKind::NotFound {
            name: name.to_string(),
            version: "latest".to_string(),
        })
    })
}

/// The first configured repository that holds `(name, version)`.
pub async fn repository(config: &Config, name: &str, version: &str) -> Result<Repository> {
    Ok(lookup(config, name, version).await?.0)
}

/// Find `(name, version)` and return the repository together with a
/// connected backend.
pub(crate) async fn lookup(config: &Config, name: &str, version: &str) -> Result<(Repository, BackendHandle)> {
    let header_key = key::header(name);
    for repository in &config.repositories {
        let Some(backend) = connect_readonly(config, repository) else {
            continue;
        };
        match backend.exists(&header_key, version).await {
            Ok(true) => return Ok((repository.clone(), backend)),
            Ok(false) => {},
            Err(e) => skip_or_surface(e, repository)?,
        }
    }
    exn::bail!(ErrorKind::NotFound {
        name: name.to_string(),
        version: version.to_string(),
    })
}

/// Enumerate every published `(name, version)` pair.
///
/// A pair only counts as published when both its header and its
/// dependency table exist. Results are sorted by name, then version.
pub async fn available(config: &Config, repositories: Option<&[Repository]>) -> Result<Vec<AvailableEntry>> {
    let repositories = repositories.unwrap_or(&config.repositories);
    let mut entries = Vec::new();
    for repository in repositories {
        let Some(backend) = connect_readonly(config, repository) else {
            continue;
        };
        let keys = match backend.list("").await {
            Ok(keys) => keys,
            Err(e) => {
                skip_or_surface(e, repository)?;
                continue;
            },
        };
        let key_set: std::collections::HashSet<&str> = keys.iter().map(String::as_str).collect();
        for object_key in &keys {
            let Some((name, version)) = published_pair(object_key) else {
                continue;
            };
            // Half-published versions (interrupted publish) are invisible.
            if !key_set.contains(format!("{name}/{version}/{}", key::DEPENDENCIES_FILE).as_str()) {
                continue;
            }
            entries.push(AvailableEntry {
                name: name.to_string(),
                version: version.to_string(),
                repository: repository.name.clone(),
                backend: repository.backend.clone(),
                host: repository.host.clone(),
            });
        }
    }
    entries.sort_by(|a, b| {
        a.name.cmp(&b.name).then_with(|| match (Version::parse(&a.version), Version::parse(&b.version)) {
            (Ok(left), Ok(right)) => left.cmp(&right),
            _ => a.version.cmp(&b.version),
        })
    });
    Ok(entries)
}

/// Split a physical key of the form `<name>/<version>/db.yaml`.
fn published_pair(object_key: &str) -> Option<(&str, &str)> {
    let rest = object_key.strip_suffix(key::HEADER_FILE)?.strip_suffix('/')?;
    let (name, version) = rest.split_once('/')?;
    (!name.is_empty() && !version.is_empty() && !version.contains('/')).then_some((name, version))
}

/// Connect for reading; unsupported or misconfigured backends are
/// skipped.
fn connect_readonly(config: &Config, repository: &Repository) -> Option<BackendHandle> {
    match config.registry.connect(repository) {
        Ok(backend) => Some(backend),
        Err(e) => {
            debug!(repository = %repository, error = %e, "skipping repository");
            None
        },
    }
}

/// Decide whether a per-repository failure is fatal. Only transport
/// errors are; everything else is logged and skipped.
fn skip_or_surface(err: mediathek_storage::error::Error, repository: &Repository) -> Result<()> {
    match &*err {
        StorageErrorKind::Network(_) => Err(crate::error::from_storage(err)),
        _ => {
            debug!(repository = %repository, error = %err, "skipping repository");
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_pair() {
        assert_eq!(published_pair("emodb/1.0.0/db.yaml"), Some(("emodb", "1.0.0")));
        assert_eq!(published_pair("emodb/1.0.0/db.parquet"), None);
        assert_eq!(published_pair("emodb/media/1.0.0/fp.zip"), None);
        assert_eq!(published_pair("db.yaml"), None);
    }
}
