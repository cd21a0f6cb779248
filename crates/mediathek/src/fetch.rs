//! Shared download plumbing: retry schedule, lazy backend resolution,
//! and the header / dependency-table fetch helpers used by the load
//! pipeline, the info queries, and the streaming iterator.

use crate::config::Config;
use crate::error::{ErrorKind, Result, from_deps, from_storage};
use crate::header::DatabaseHeader;
use crate::resolve;
use mediathek_deps::DependencyTable;
use mediathek_storage::{BackendHandle, Repository, key};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fail fast once the caller has cancelled the operation. Checked at
/// stage and task boundaries.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        exn::bail!(ErrorKind::Cancelled);
    }
    Ok(())
}

/// Default worker count: one per available CPU.
pub(crate) fn default_workers() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4)
}

/// Retries per archive after the initial attempt.
const MAX_RETRIES: u32 = 3;
/// First backoff delay.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff ceiling.
const BACKOFF_MAX: Duration = Duration::from_secs(30);
/// Hard ceiling for one attempt (an archive transfer at the slowest).
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Run `op` with the standard retry schedule: up to [`MAX_RETRIES`]
/// retries with exponential backoff (factor 2, capped at
/// [`BACKOFF_MAX`]). Only transport-level failures are retried; each
/// attempt is cut off after [`ATTEMPT_TIMEOUT`].
pub(crate) async fn with_retry<T, F, Fut>(
    what: &str,
    cancel: &CancellationToken,
    op: F,
) -> mediathek_storage::error::Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = mediathek_storage::error::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = match tokio::time::timeout(ATTEMPT_TIMEOUT, op()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(exn::Exn::from(mediathek_storage::error::ErrorKind::Network(format!(
                "{what}: no response within {}s",
                ATTEMPT_TIMEOUT.as_secs()
            )))),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_RETRIES && e.is_retryable() && !cancel.is_cancelled() => {
                let delay = BACKOFF_BASE.saturating_mul(1 << attempt).min(BACKOFF_MAX);
                attempt += 1;
                warn!(what, attempt, delay = ?delay, error = %e, "retrying after transient failure");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {},
                    _ = cancel.cancelled() => return Err(e),
                }
            },
            Err(e) => return Err(e),
        }
    }
}

/// A backend that is only resolved (repository scan, client setup) the
/// first time it is actually needed, so cache-only operations work
/// offline.
pub(crate) struct LazyBackend<'a> {
    config: &'a Config,
    name: &'a str,
    version: &'a str,
    resolved: Option<(Repository, BackendHandle)>,
}

impl<'a> LazyBackend<'a> {
    pub(crate) fn new(config: &'a Config, name: &'a str, version: &'a str) -> Self {
        Self {
            config,
            name,
            version,
            resolved: None,
        }
    }

    pub(crate) async fn get(&mut self) -> Result<&BackendHandle> {
        if self.resolved.is_none() {
            self.resolved = Some(resolve::lookup(self.config, self.name, self.version).await?);
        }
        // unwrap is safe: resolved was just populated
        Ok(&self.resolved.as_ref().unwrap().1)
    }
}

/// Make sure `dir/db.yaml` exists, fetching it when absent, and parse
/// it.
pub(crate) async fn ensure_header(
    backend: &mut LazyBackend<'_>,
    name: &str,
    version: &str,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<DatabaseHeader> {
    let local = dir.join(key::HEADER_FILE);
    if !local.exists() {
        let backend = backend.get().await?;
        let header_key = key::header(name);
        with_retry(&header_key, cancel, || backend.get(&header_key, version, &local))
            .await
            .map_err(from_storage)?;
        debug!(name, version, "fetched header");
    }
    DatabaseHeader::from_file(&local)
}

/// Make sure `dir/db.parquet` holds a readable dependency table and load
/// it.
///
/// An unreadable cached table (legacy format, torn write) is not an
/// error: it is discarded and re-fetched from the repository.
pub(crate) async fn ensure_dependencies(
    backend: &mut LazyBackend<'_>,
    name: &str,
    version: &str,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<DependencyTable> {
    let local = dir.join(key::DEPENDENCIES_FILE);
    if local.exists() {
        match DependencyTable::load(&local) {
            Ok(deps) => return Ok(deps),
            Err(e) => warn!(name, version, error = %e, "cached dependency table is unreadable; fetching it again"),
        }
    }
    let backend = backend.get().await?;
    download_dependencies(backend, name, version, dir, cancel).await
}

/// Fetch the dependency table of `(name, version)` into `dir` and load
/// it. Tries `db.parquet` first, then the legacy `db.zip` (CSV inside);
/// a legacy table is re-saved as Parquet so the cache is canonical.
pub(crate) async fn download_dependencies(
    backend: &BackendHandle,
    name: &str,
    version: &str,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<DependencyTable> {
    std::fs::create_dir_all(dir).map_err(ErrorKind::Io)?;
    let local = dir.join(key::DEPENDENCIES_FILE);
    let deps_key = key::dependencies(name);
    if with_retry(&deps_key, cancel, || backend.exists(&deps_key, version)).await.map_err(from_storage)? {
        with_retry(&deps_key, cancel, || backend.get(&deps_key, version, &local)).await.map_err(from_storage)?;
        return DependencyTable::load(&local).map_err(from_deps);
    }

    // Legacy layout: a ZIP holding db.csv.
    let legacy_key = key::legacy_dependencies(name);
    if with_retry(&legacy_key, cancel, || backend.exists(&legacy_key, version)).await.map_err(from_storage)? {
        let staging = tempfile::tempdir().map_err(ErrorKind::Io)?;
        let archive = staging.path().join(key::LEGACY_DEPENDENCIES_FILE);
        with_retry(&legacy_key, cancel, || backend.get(&legacy_key, version, &archive))
            .await
            .map_err(from_storage)?;
        let unpack_dir = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || mediathek_archive::unpack(&archive, &unpack_dir, None))
            .await
            .map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
            .map_err(crate::error::from_archive)?;
        let deps = DependencyTable::load(staging.path().join("db.csv")).map_err(from_deps)?;
        deps.save(&local).map_err(from_deps)?;
        return Ok(deps);
    }

    exn::bail!(ErrorKind::NotFound {
        name: name.to_string(),
        version: version.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventually_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let result = with_retry("test", &cancel, || {
            let calls = calls.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => exn::bail!(mediathek_storage::error::ErrorKind::Network("flaky".to_string())),
                    _ => Ok(42),
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let result: mediathek_storage::error::Result<()> = with_retry("test", &cancel, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                exn::bail!(mediathek_storage::error::ErrorKind::Network("down".to_string()))
            }
        })
        .await;
        assert!(result.is_err());
        // Initial attempt + three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let result: mediathek_storage::error::Result<()> = with_retry("test", &cancel, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                exn::bail!(mediathek_storage::error::ErrorKind::NotFound("gone".to_string()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
