//! Packing and unpacking of artifact archives.
//!
//! Archives are plain ZIP containers with deflate compression. Entry names
//! are repository-relative paths using `/` separators, matching the paths
//! recorded in the dependency table. The archive's *identity* (its
//! fingerprint) is chosen by the caller and never stored inside the
//! container itself.

use crate::checksum::md5_file;
use crate::error::{ErrorKind, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Pack `members` (paths relative to `root`) into a ZIP archive at `dest`.
///
/// Members are written in the given order. Parent directories of `dest` are
/// created as needed.
///
/// # Errors
/// Returns [`ErrorKind::Io`] if a member cannot be read or the archive
/// cannot be written.
pub fn pack(dest: &Path, root: &Path, members: &[String]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
    }
    let file = File::create(dest).map_err(ErrorKind::Io)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for member in members {
        let mut source = File::open(root.join(member)).map_err(ErrorKind::Io)?;
        writer.start_file(member.as_str(), options).map_err(zip_error)?;
        io::copy(&mut source, &mut writer).map_err(ErrorKind::Io)?;
    }
    writer.finish().map_err(zip_error)?;
    debug!(archive = %dest.display(), members = members.len(), "packed archive");
    Ok(())
}

/// Unpack an archive into `dest`, returning the relative paths written.
///
/// When `members` is given, only entries whose names appear in the set are
/// extracted; other entries are left untouched. This is how the loader
/// avoids clobbering files that a *newer* archive already provides when an
/// older multi-file archive is fetched for a subset of its members.
///
/// Extraction is idempotent: an entry whose destination already exists with
/// identical content (verified by checksum) is skipped instead of rewritten.
///
/// # Errors
/// Returns [`ErrorKind::Corrupt`] for a malformed container,
/// [`ErrorKind::UnsafePath`] for an entry that would escape `dest`, and
/// [`ErrorKind::Io`] for write failures.
pub fn unpack(src: &Path, dest: &Path, members: Option<&HashSet<String>>) -> Result<Vec<String>> {
    let file = File::open(src).map_err(ErrorKind::Io)?;
    let mut archive = ZipArchive::new(file).map_err(zip_error)?;
    let mut written = Vec::new();
    for index in 0..archive.len() {
        let name = {
            let entry = archive.by_index(index).map_err(zip_error)?;
            if entry.is_dir() {
                continue;
            }
            entry.name().to_string()
        };
        if let Some(wanted) = members {
            if !wanted.contains(&name) {
                continue;
            }
        }
        let relative = sanitize(&name)?;
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
        }
        if target.exists() {
            // Comparing consumes the entry; the write path below
            // re-opens it by index.
            let mut entry = archive.by_index(index).map_err(zip_error)?;
            if entry_matches(&mut entry, &target)? {
                written.push(name);
                continue;
            }
        }
        let mut entry = archive.by_index(index).map_err(zip_error)?;
        let mut out = File::create(&target).map_err(ErrorKind::Io)?;
        io::copy(&mut entry, &mut out).map_err(ErrorKind::Io)?;
        out.flush().map_err(ErrorKind::Io)?;
        written.push(name);
    }
    debug!(archive = %src.display(), files = written.len(), "unpacked archive");
    Ok(written)
}

/// Reject entry names that are absolute or contain parent-directory
/// references; they would let a hostile archive write outside `dest`.
fn sanitize(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {},
            _ => exn::bail!(ErrorKind::UnsafePath(path.to_path_buf())),
        }
    }
    if clean.as_os_str().is_empty() {
        exn::bail!(ErrorKind::UnsafePath(path.to_path_buf()));
    }
    Ok(clean)
}

/// Compare an archive entry against an existing file by checksum.
///
/// The entry is consumed either way; callers that need its bytes afterwards
/// must re-open it by index.
fn entry_matches(entry: &mut zip::read::ZipFile<'_>, existing: &Path) -> Result<bool> {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = entry.read(&mut buf).map_err(ErrorKind::Io)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let entry_digest = hex::encode(hasher.finalize());
    Ok(md5_file(existing)? == entry_digest)
}

fn zip_error(err: zip::result::ZipError) -> ErrorKind {
    match err {
        zip::result::ZipError::Io(io) => ErrorKind::Io(io),
        other => ErrorKind::Corrupt(other.to_string()),
    }
}
