//! MD5 content checksums.
//!
//! Checksums identify *file content*; they are what the dependency table
//! records and what the unpacker uses to decide whether an on-disk file can
//! be left alone.

use crate::error::{ErrorKind, Result};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

const READ_BUFFER: usize = 64 * 1024;

/// MD5 hex digest of a file's bytes.
///
/// Reads the file in fixed-size chunks so arbitrarily large media files
/// never get buffered whole.
pub fn md5_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = File::open(path.as_ref()).map_err(ErrorKind::Io)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; READ_BUFFER];
    loop {
        let read = file.read(&mut buf).map_err(ErrorKind::Io)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// MD5 hex digest of an in-memory buffer.
pub fn md5_bytes(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Checksum of a file, or of a directory as the digest of its sorted
/// `(relative path, digest)` pairs.
///
/// This is the digest recorded for attachment payloads, which may be a
/// single file or a whole subtree.
pub fn md5_path(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    if path.is_file() {
        return md5_file(path);
    }
    let mut entries: Vec<(String, String)> = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry =
            entry.map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path()).to_string_lossy().replace('\\', "/");
        entries.push((relative, md5_file(entry.path())?));
    }
    entries.sort();
    let combined = entries.into_iter().map(|(p, d)| format!("{p}:{d}")).collect::<Vec<_>>().join("\n");
    Ok(md5_bytes(combined.as_bytes()))
}
