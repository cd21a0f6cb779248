//! Shared fixtures for the integration tests: a filesystem-backend
//! repository in a tempdir, a cache in another, and a tiny database
//! build with synthesized WAV files.
#![allow(dead_code)]

use mediathek::{BackendKind, Config, Repository};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const DB_NAME: &str = "songs";

/// A repository and a cache, both rooted in temp directories that live
/// as long as the value.
pub struct Env {
    pub repo_dir: TempDir,
    pub cache_dir: TempDir,
    pub repository: Repository,
    pub config: Config,
}

pub fn env() -> Env {
    let repo_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let repository = Repository::new("repo", repo_dir.path().to_string_lossy(), BackendKind::FileSystem);
    let config = Config::new(vec![repository.clone()], cache_dir.path());
    Env {
        repo_dir,
        cache_dir,
        repository,
        config,
    }
}

impl Env {
    /// Same repository, empty cache.
    pub fn fresh_cache(&self) -> (TempDir, Config) {
        let cache_dir = tempfile::tempdir().unwrap();
        let config = Config::new(vec![self.repository.clone()], cache_dir.path());
        (cache_dir, config)
    }

    /// Directory that holds the repository's objects on disk.
    pub fn repo_root(&self) -> PathBuf {
        self.repo_dir.path().join("repo")
    }
}

/// Write a minimal canonical PCM WAV file. `fill` differentiates file
/// contents (and therefore checksums).
pub fn write_wav(path: &Path, sample_rate: u32, bit_depth: u16, channels: u16, frames: u32, fill: u8) {
    let bytes_per_frame = u32::from(channels) * u32::from(bit_depth / 8);
    let data_len = frames * bytes_per_frame;
    let byte_rate = sample_rate * bytes_per_frame;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(channels * (bit_depth / 8)).to_le_bytes());
    out.extend_from_slice(&bit_depth.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(out.len() + data_len as usize, fill);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&out).unwrap();
}

/// The minimal build: a header, one (opaque) table file, and three
/// 16-bit 16 kHz mono WAV files of one second each.
pub fn build_s1(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("db.yaml"), "name: songs\ntables:\n  age:\n    type: filewise\n").unwrap();
    std::fs::write(dir.join("db.age.parquet"), b"opaque table bytes v1").unwrap();
    write_wav(&dir.join("audio/001.wav"), 16000, 16, 1, 16000, 0x01);
    write_wav(&dir.join("audio/002.wav"), 16000, 16, 1, 16000, 0x02);
    write_wav(&dir.join("audio/003.wav"), 16000, 16, 1, 16000, 0x03);
}

/// Files under `dir`, relative with `/` separators, sorted.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    for entry in walk(dir) {
        files.push(entry);
    }
    files.sort();
    files
}

fn walk(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    if !dir.exists() {
        return out;
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                stack.push(entry.path());
            } else {
                let relative = entry.path().strip_prefix(dir).unwrap().to_string_lossy().replace('\\', "/");
                out.push(relative);
            }
        }
    }
    out
}
