//! Cross-process locks for flavor directories.
//!
//! Any code that mutates a flavor directory — first-time fetch, partial
//! load merge, flavor materialization — holds the directory's `.lock`
//! file for the duration. The lock is an OS advisory lock, so it is
//! released by the kernel even if the holder crashes; the lock *file*
//! records the owning process id for diagnosis and is never auto-removed.

use crate::error::{ErrorKind, Result};
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Name of the lock file inside a flavor directory.
pub const LOCK_FILE: &str = ".lock";

/// How long to block silently before warning the user.
pub const WARNING_TIMEOUT: Duration = Duration::from_secs(2);
/// How long to block in total before giving up.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusive lock on one directory, released on drop.
///
/// # Examples
///
/// ```no_run
/// use mediathek_cache::DirLock;
/// # async fn example() -> mediathek_cache::error::Result<()> {
/// let guard = DirLock::acquire(std::path::Path::new("/cache/emodb/1.0.0/default")).await?;
/// // ... mutate the directory ...
/// drop(guard);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock for `dir`, creating the directory if needed.
    ///
    /// Blocks up to [`WARNING_TIMEOUT`] silently, then logs a warning
    /// naming the lock file and its recorded owner, and keeps trying
    /// until [`ACQUIRE_TIMEOUT`].
    pub async fn acquire(dir: &Path) -> Result<Self> {
        Self::acquire_with_timeout(dir, ACQUIRE_TIMEOUT).await
    }

    /// Acquire the lock with a custom total timeout. Used by best-effort
    /// callers (e.g. the reuse scan) that would rather skip than wait.
    ///
    /// # Errors
    /// [`ErrorKind::LockTimeout`] when the deadline passes without the
    /// lock being released by its holder.
    pub async fn acquire_with_timeout(dir: &Path, timeout: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(ErrorKind::Io)?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path).map_err(ErrorKind::Io)?;

        let started = Instant::now();
        let mut warned = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {},
                Err(e) => exn::bail!(ErrorKind::Io(e)),
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                exn::bail!(ErrorKind::LockTimeout(path));
            }
            if !warned && elapsed >= WARNING_TIMEOUT {
                warned = true;
                warn!(
                    lock = %path.display(),
                    owner = owner_of(&path).as_deref().unwrap_or("unknown"),
                    "lock not acquired yet; another process may be loading the same database, \
                     or the lock is left over from a crashed process"
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let mut guard = Self { file, path };
        guard.record_owner()?;
        debug!(lock = %guard.path.display(), "acquired");
        Ok(guard)
    }

    /// Directory this lock protects.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    fn record_owner(&mut self) -> Result<()> {
        self.file.set_len(0).map_err(ErrorKind::Io)?;
        self.file.write_all(format!("{}\n", std::process::id()).as_bytes()).map_err(ErrorKind::Io)?;
        self.file.flush().map_err(ErrorKind::Io)?;
        Ok(())
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // The lock file itself stays behind so crashed holders remain
        // diagnosable.
        let _ = self.file.unlock();
        debug!(lock = %self.path.display(), "released");
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

/// Read the process id recorded in a lock file, if any.
fn owner_of(path: &Path) -> Option<String> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    let owner = contents.trim();
    (!owner.is_empty()).then(|| owner.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_creates_dir_and_lock_file() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("emodb/1.0.0/default");
        let guard = DirLock::acquire(&dir).await.unwrap();
        assert!(dir.join(LOCK_FILE).exists());
        assert_eq!(guard.dir(), dir);
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().to_path_buf();
        let _held = DirLock::acquire(&dir).await.unwrap();
        let err = DirLock::acquire_with_timeout(&dir, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::LockTimeout(_)));
    }

    #[tokio::test]
    async fn test_released_lock_can_be_reacquired() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().to_path_buf();
        let guard = DirLock::acquire(&dir).await.unwrap();
        drop(guard);
        let _again = DirLock::acquire_with_timeout(&dir, Duration::from_millis(300)).await.unwrap();
        // The lock file survives release.
        assert!(dir.join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_owner_is_recorded() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().to_path_buf();
        let _guard = DirLock::acquire(&dir).await.unwrap();
        let recorded = owner_of(&dir.join(LOCK_FILE)).unwrap();
        assert_eq!(recorded, std::process::id().to_string());
    }
}
