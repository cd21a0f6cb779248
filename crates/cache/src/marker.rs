//! Completeness markers.
//!
//! A flavor directory gains an empty `.complete` sentinel once the
//! requested scope of a load has fully materialized. The sentinel alone
//! does not prove every artifact is present — partial loads also finish
//! complete — so callers combine it with a per-file existence check
//! against the dependency table.

use crate::error::{ErrorKind, Result};
use std::path::Path;

/// Name of the completeness sentinel inside a flavor directory.
pub const COMPLETE_FILE: &str = ".complete";

/// Write the sentinel.
pub fn mark_complete(dir: &Path) -> Result<()> {
    std::fs::write(dir.join(COMPLETE_FILE), b"").map_err(ErrorKind::Io)?;
    Ok(())
}

/// Whether the sentinel is present.
pub fn is_marked_complete(dir: &Path) -> bool {
    dir.join(COMPLETE_FILE).exists()
}

/// Remove the sentinel, if present. Called before a mutation that could
/// leave the directory incomplete.
pub fn clear_complete(dir: &Path) -> Result<()> {
    match std::fs::remove_file(dir.join(COMPLETE_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(exn::Exn::from(ErrorKind::Io(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_marked_complete(dir.path()));
        mark_complete(dir.path()).unwrap();
        assert!(is_marked_complete(dir.path()));
        clear_complete(dir.path()).unwrap();
        assert!(!is_marked_complete(dir.path()));
        // Clearing an absent marker is fine.
        clear_complete(dir.path()).unwrap();
    }
}
