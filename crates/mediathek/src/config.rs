//! Process configuration.
//!
//! Repositories, cache roots, and the backend registry are plain data
//! threaded explicitly through the API — never ambient state — so the
//! core stays testable and reentrant. Initial values come from the user
//! configuration file and the environment; after that they are just a
//! value.

use crate::error::{ErrorKind, Result};
use mediathek_cache::CacheLayout;
use mediathek_storage::{BackendRegistry, Repository};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// User configuration file, resolved against the home directory.
const USER_CONFIG_FILE: &str = ".mediathek.yaml";
/// Subdirectory of `$XDG_CACHE_HOME` used when no cache root is
/// configured.
const CACHE_DIR_NAME: &str = "audb";

/// Environment variable overriding the user cache root.
pub const ENV_CACHE_ROOT: &str = "CACHE_ROOT";
/// Environment variable for the shared cache root; empty disables it.
pub const ENV_SHARED_CACHE_ROOT: &str = "SHARED_CACHE_ROOT";
/// Environment variable overriding the repository list. Entries are
/// separated by `;`, each entry is `name,host,backend-kind`.
pub const ENV_REPOSITORIES: &str = "REPOSITORIES";

/// Everything a pipeline needs to know about its surroundings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repositories, consulted left to right.
    pub repositories: Vec<Repository>,
    /// Writable user cache root.
    pub cache_root: PathBuf,
    /// Optional shared cache root, consulted first on reads.
    pub shared_cache_root: Option<PathBuf>,
    /// Backend factories, keyed by backend kind.
    pub registry: BackendRegistry,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    repositories: Option<Vec<Repository>>,
    cache_root: Option<PathBuf>,
    shared_cache_root: Option<PathBuf>,
}

impl Config {
    /// A configuration with explicit repositories and cache root.
    pub fn new(repositories: Vec<Repository>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            repositories,
            cache_root: cache_root.into(),
            shared_cache_root: None,
            registry: BackendRegistry::builtin(),
        }
    }

    /// Configuration from `~/.mediathek.yaml` overridden by the
    /// environment (`CACHE_ROOT`, `SHARED_CACHE_ROOT`, `REPOSITORIES`).
    ///
    /// # Errors
    /// [`ErrorKind::Config`] for an unreadable configuration file, an
    /// empty `repositories:` section, or a malformed `REPOSITORIES`
    /// entry.
    pub fn from_env() -> Result<Self> {
        let file = match home_dir() {
            Some(home) => read_config_file(&home.join(USER_CONFIG_FILE))?,
            None => ConfigFile::default(),
        };

        let repositories = match std::env::var(ENV_REPOSITORIES) {
            Ok(value) if !value.trim().is_empty() => parse_repositories(&value)?,
            _ => file.repositories.unwrap_or_default(),
        };

        let cache_root = std::env::var(ENV_CACHE_ROOT)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or(file.cache_root)
            .or_else(default_cache_root)
            .ok_or_else(|| exn::Exn::from(ErrorKind::Config("cannot determine a cache root".to_string())))?;

        let shared_cache_root = match std::env::var(ENV_SHARED_CACHE_ROOT) {
            Ok(value) if value.is_empty() => None,
            Ok(value) => Some(PathBuf::from(value)),
            Err(_) => file.shared_cache_root,
        };

        Ok(Self {
            repositories,
            cache_root,
            shared_cache_root,
            registry: BackendRegistry::builtin(),
        })
    }

    /// Add a shared cache tier.
    pub fn with_shared_cache(mut self, root: impl Into<PathBuf>) -> Self {
        self.shared_cache_root = Some(root.into());
        self
    }

    /// Replace the backend registry.
    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The two-tier cache layout described by this configuration.
    pub fn layout(&self) -> CacheLayout {
        CacheLayout::new(&self.cache_root, self.shared_cache_root.clone())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(ErrorKind::Io)?;
    let file: ConfigFile = serde_yaml::from_str(&contents)
        .map_err(|e| ErrorKind::Config(format!("{}: {e}", path.display())))?;
    if let Some(repositories) = &file.repositories {
        if repositories.is_empty() {
            exn::bail!(ErrorKind::Config(format!(
                "{}: the 'repositories:' section must not be empty",
                path.display()
            )));
        }
    }
    Ok(file)
}

/// Parse the `REPOSITORIES` environment format:
/// `name,host,backend-kind` entries joined by `;`.
fn parse_repositories(value: &str) -> Result<Vec<Repository>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let fields: Vec<&str> = entry.split(',').map(str::trim).collect();
            match fields.as_slice() {
                [name, host, backend] if !name.is_empty() && !host.is_empty() => {
                    Ok(Repository::new(*name, *host, (*backend).into()))
                },
                _ => exn::bail!(ErrorKind::Config(format!(
                    "malformed repository entry '{entry}' (expected 'name,host,backend-kind')"
                ))),
            }
        })
        .collect()
}

fn default_cache_root() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join(CACHE_DIR_NAME));
        }
    }
    home_dir().map(|home| home.join(".cache").join(CACHE_DIR_NAME))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
