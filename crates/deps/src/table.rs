//! The columnar dependency table.

use crate::error::{ErrorKind, Result};
use crate::row::{ArtifactKind, MediaEntry, Row, file_extension, table_id};
use std::collections::{HashMap, HashSet};

/// Manifest of every artifact in one database version.
///
/// One row per artifact, keyed by its repository-relative path. The table
/// is the sole source of truth about what a version contains, which
/// archive holds each file's bytes, and whether those bytes are reused
/// from an earlier version.
///
/// Internally the table is a struct of column vectors with a hash index
/// on the path column, so scalar lookups are O(1) and the filtered
/// iterators are single cache-friendly column scans. Rows are kept in
/// insertion order; serialization preserves that order.
#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    pub(crate) paths: Vec<String>,
    pub(crate) archives: Vec<String>,
    pub(crate) kinds: Vec<ArtifactKind>,
    pub(crate) formats: Vec<String>,
    pub(crate) versions: Vec<String>,
    pub(crate) checksums: Vec<String>,
    pub(crate) removed: Vec<bool>,
    pub(crate) bit_depths: Vec<i32>,
    pub(crate) channels: Vec<i32>,
    pub(crate) sampling_rates: Vec<i32>,
    pub(crate) durations: Vec<f64>,
    index: HashMap<String, usize>,
}

impl DependencyTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows (tombstones included).
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Whether a row exists for `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// The full row for `path`.
    pub fn row(&self, path: &str) -> Result<Row> {
        let i = self.position(path)?;
        Ok(Row {
            path: self.paths[i].clone(),
            archive: self.archives[i].clone(),
            kind: self.kinds[i],
            format: self.formats[i].clone(),
            version: self.versions[i].clone(),
            checksum: self.checksums[i].clone(),
            removed: self.removed[i],
            bit_depth: self.bit_depths[i],
            channels: self.channels[i],
            sampling_rate: self.sampling_rates[i],
            duration: self.durations[i],
        })
    }

    /// All paths in insertion order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Paths of media rows, in insertion order.
    pub fn media(&self) -> impl Iterator<Item = &str> {
        self.of_kind(ArtifactKind::Media)
    }

    /// Paths of table rows, in insertion order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.of_kind(ArtifactKind::Meta)
    }

    /// Table ids (`db.<id>.<ext>` → `<id>`), in insertion order.
    pub fn table_ids(&self) -> impl Iterator<Item = &str> {
        self.tables().filter_map(table_id)
    }

    /// Paths of attachment rows, in insertion order.
    pub fn attachments(&self) -> impl Iterator<Item = &str> {
        self.of_kind(ArtifactKind::Attachment)
    }

    /// Attachment ids (the archive column of attachment rows).
    pub fn attachment_ids(&self) -> impl Iterator<Item = &str> {
        self.kinds
            .iter()
            .zip(self.archives.iter())
            .filter(|(kind, _)| **kind == ArtifactKind::Attachment)
            .map(|(_, archive)| archive.as_str())
    }

    /// Paths of tombstoned media rows.
    pub fn removed_media(&self) -> impl Iterator<Item = &str> {
        self.kinds
            .iter()
            .zip(self.removed.iter())
            .zip(self.paths.iter())
            .filter(|((kind, removed), _)| **kind == ArtifactKind::Media && **removed)
            .map(|(_, path)| path.as_str())
    }

    /// Unique archive fingerprints, sorted.
    pub fn archives(&self) -> Vec<String> {
        let unique: HashSet<&String> = self.archives.iter().collect();
        let mut out: Vec<String> = unique.into_iter().cloned().collect();
        out.sort_unstable();
        out
    }

    /// Archive fingerprint of `path`.
    pub fn archive(&self, path: &str) -> Result<&str> {
        Ok(self.archives[self.position(path)?].as_str())
    }

    /// Content checksum of `path`.
    pub fn checksum(&self, path: &str) -> Result<&str> {
        Ok(self.checksums[self.position(path)?].as_str())
    }

    /// Version in which the bytes of `path` were last written.
    pub fn version(&self, path: &str) -> Result<&str> {
        Ok(self.versions[self.position(path)?].as_str())
    }

    /// Lowercase format (extension) of `path`.
    pub fn format(&self, path: &str) -> Result<&str> {
        Ok(self.formats[self.position(path)?].as_str())
    }

    /// Artifact kind of `path`.
    pub fn kind(&self, path: &str) -> Result<ArtifactKind> {
        Ok(self.kinds[self.position(path)?])
    }

    /// Whether `path` is tombstoned.
    pub fn is_removed(&self, path: &str) -> Result<bool> {
        Ok(self.removed[self.position(path)?])
    }

    /// PCM bit depth of `path` (0 when not applicable).
    pub fn bit_depth(&self, path: &str) -> Result<i32> {
        Ok(self.bit_depths[self.position(path)?])
    }

    /// Channel count of `path` (0 when not applicable).
    pub fn channels(&self, path: &str) -> Result<i32> {
        Ok(self.channels[self.position(path)?])
    }

    /// Sampling rate of `path` in Hz (0 when not applicable).
    pub fn sampling_rate(&self, path: &str) -> Result<i32> {
        Ok(self.sampling_rates[self.position(path)?])
    }

    /// Duration of `path` in seconds (0.0 when not applicable).
    pub fn duration(&self, path: &str) -> Result<f64> {
        Ok(self.durations[self.position(path)?])
    }

    /// Batch checksum lookup; unknown paths are reported as `NotFound`.
    pub fn checksums<'a, I>(&self, paths: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths
            .into_iter()
            .map(|path| Ok((path.to_string(), self.checksums[self.position(path)?].clone())))
            .collect()
    }

    /// Batch version lookup.
    pub fn versions<'a, I>(&self, paths: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths
            .into_iter()
            .map(|path| Ok((path.to_string(), self.versions[self.position(path)?].clone())))
            .collect()
    }

    /// Batch archive lookup.
    pub fn archives_of<'a, I>(&self, paths: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths
            .into_iter()
            .map(|path| Ok((path.to_string(), self.archives[self.position(path)?].clone())))
            .collect()
    }

    /// Batch format lookup.
    pub fn formats<'a, I>(&self, paths: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths
            .into_iter()
            .map(|path| Ok((path.to_string(), self.formats[self.position(path)?].clone())))
            .collect()
    }

    /// Batch kind lookup.
    pub fn kinds<'a, I>(&self, paths: I) -> Result<HashMap<String, ArtifactKind>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().map(|path| Ok((path.to_string(), self.kinds[self.position(path)?]))).collect()
    }

    /// Batch tombstone-flag lookup.
    pub fn removed_of<'a, I>(&self, paths: I) -> Result<HashMap<String, bool>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().map(|path| Ok((path.to_string(), self.removed[self.position(path)?]))).collect()
    }

    /// Batch bit depth lookup.
    pub fn bit_depths<'a, I>(&self, paths: I) -> Result<HashMap<String, i32>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().map(|path| Ok((path.to_string(), self.bit_depths[self.position(path)?]))).collect()
    }

    /// Batch channel count lookup.
    pub fn channels_of<'a, I>(&self, paths: I) -> Result<HashMap<String, i32>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().map(|path| Ok((path.to_string(), self.channels[self.position(path)?]))).collect()
    }

    /// Batch sampling rate lookup.
    pub fn sampling_rates<'a, I>(&self, paths: I) -> Result<HashMap<String, i32>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths
            .into_iter()
            .map(|path| Ok((path.to_string(), self.sampling_rates[self.position(path)?])))
            .collect()
    }

    /// Batch duration lookup.
    pub fn durations<'a, I>(&self, paths: I) -> Result<HashMap<String, f64>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().map(|path| Ok((path.to_string(), self.durations[self.position(path)?]))).collect()
    }

    /// Semantic equality: same rows regardless of row order.
    pub fn equal(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.paths.iter().all(|path| match (self.row(path), other.row(path)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        })
    }

    /// Bulk insert of new media rows.
    ///
    /// # Errors
    /// Fails with [`ErrorKind::DuplicatePath`] if any entry's path already
    /// has a row; the table is left unchanged in that case.
    pub fn add_media(&mut self, entries: Vec<MediaEntry>) -> Result<()> {
        for entry in &entries {
            if self.contains(&entry.path) {
                exn::bail!(ErrorKind::DuplicatePath(entry.path.clone()));
            }
        }
        self.paths.reserve(entries.len());
        for entry in entries {
            let format = file_extension(&entry.path);
            self.index.insert(entry.path.clone(), self.paths.len());
            self.paths.push(entry.path);
            self.archives.push(entry.archive);
            self.kinds.push(ArtifactKind::Media);
            self.formats.push(format);
            self.versions.push(entry.version);
            self.checksums.push(entry.checksum);
            self.removed.push(false);
            self.bit_depths.push(entry.bit_depth);
            self.channels.push(entry.channels);
            self.sampling_rates.push(entry.sampling_rate);
            self.durations.push(entry.duration);
        }
        Ok(())
    }

    /// Insert or overwrite a table row.
    ///
    /// The archive of a table row is its table id, which keys the
    /// one-table-per-archive layout on the backend.
    pub fn add_meta(&mut self, path: &str, version: &str, checksum: &str) {
        let archive = table_id(path).unwrap_or_default().to_string();
        let format = file_extension(path);
        match self.index.get(path) {
            Some(&i) => {
                self.archives[i] = archive;
                self.formats[i] = format;
                self.versions[i] = version.to_string();
                self.checksums[i] = checksum.to_string();
            },
            None => {
                self.index.insert(path.to_string(), self.paths.len());
                self.paths.push(path.to_string());
                self.archives.push(archive);
                self.kinds.push(ArtifactKind::Meta);
                self.formats.push(format);
                self.versions.push(version.to_string());
                self.checksums.push(checksum.to_string());
                self.removed.push(false);
                self.bit_depths.push(0);
                self.channels.push(0);
                self.sampling_rates.push(0);
                self.durations.push(0.0);
            },
        }
    }

    /// Insert or overwrite an attachment row. The archive is the
    /// attachment id.
    pub fn add_attachment(&mut self, path: &str, version: &str, archive: &str, checksum: &str) {
        let format = file_extension(path);
        match self.index.get(path) {
            Some(&i) => {
                self.archives[i] = archive.to_string();
                self.formats[i] = format;
                self.versions[i] = version.to_string();
                self.checksums[i] = checksum.to_string();
            },
            None => {
                self.index.insert(path.to_string(), self.paths.len());
                self.paths.push(path.to_string());
                self.archives.push(archive.to_string());
                self.kinds.push(ArtifactKind::Attachment);
                self.formats.push(format);
                self.versions.push(version.to_string());
                self.checksums.push(checksum.to_string());
                self.removed.push(false);
                self.bit_depths.push(0);
                self.channels.push(0);
                self.sampling_rates.push(0);
                self.durations.push(0.0);
            },
        }
    }

    /// Bulk update of existing media rows whose bytes changed: archive,
    /// checksum, version, and audio metadata are all replaced.
    ///
    /// # Errors
    /// Fails with [`ErrorKind::NotFound`] if any entry has no row; the
    /// table is left unchanged in that case.
    pub fn update_media(&mut self, entries: Vec<MediaEntry>) -> Result<()> {
        let mut positions = Vec::with_capacity(entries.len());
        for entry in &entries {
            positions.push(self.position(&entry.path)?);
        }
        for (entry, i) in entries.into_iter().zip(positions) {
            self.archives[i] = entry.archive;
            self.versions[i] = entry.version;
            self.checksums[i] = entry.checksum;
            self.bit_depths[i] = entry.bit_depth;
            self.channels[i] = entry.channels;
            self.sampling_rates[i] = entry.sampling_rate;
            self.durations[i] = entry.duration;
        }
        Ok(())
    }

    /// Bulk version bump for media rows whose bytes were re-uploaded
    /// unchanged (members riding along in a re-packed archive).
    pub fn update_media_version<'a, I>(&mut self, paths: I, version: &str)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for path in paths {
            if let Some(&i) = self.index.get(path) {
                self.versions[i] = version.to_string();
            }
        }
    }

    /// Tombstone a media row. The row stays in the table forever.
    ///
    /// # Errors
    /// Fails with [`ErrorKind::NotFound`] for unknown paths and
    /// [`ErrorKind::NotMedia`] for table or attachment rows.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let i = self.position(path)?;
        if self.kinds[i] != ArtifactKind::Media {
            exn::bail!(ErrorKind::NotMedia(path.to_string()));
        }
        self.removed[i] = true;
        Ok(())
    }

    /// Physically delete rows. Used only while synthesizing a new version
    /// during publish; relative order of the surviving rows is preserved.
    pub fn drop_rows<'a, I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let doomed: HashSet<&str> = paths.into_iter().collect();
        if doomed.is_empty() {
            return;
        }
        let keep: Vec<bool> = self.paths.iter().map(|p| !doomed.contains(p.as_str())).collect();
        compact(&mut self.paths, &keep);
        compact(&mut self.archives, &keep);
        compact(&mut self.kinds, &keep);
        compact(&mut self.formats, &keep);
        compact(&mut self.versions, &keep);
        compact(&mut self.checksums, &keep);
        compact(&mut self.removed, &keep);
        compact(&mut self.bit_depths, &keep);
        compact(&mut self.channels, &keep);
        compact(&mut self.sampling_rates, &keep);
        compact(&mut self.durations, &keep);
        self.rebuild_index();
    }

    fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &str> {
        self.kinds
            .iter()
            .zip(self.paths.iter())
            .filter(move |(k, _)| **k == kind)
            .map(|(_, path)| path.as_str())
    }

    fn position(&self, path: &str) -> Result<usize> {
        self.index.get(path).copied().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.to_string())))
    }

    pub(crate) fn rebuild_index(&mut self) {
        self.index = self.paths.iter().enumerate().map(|(i, path)| (path.clone(), i)).collect();
    }
}

impl PartialEq for DependencyTable {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

/// Retain the elements of `column` whose `keep` flag is set, in place.
fn compact<T>(column: &mut Vec<T>, keep: &[bool]) {
    let mut flags = keep.iter();
    column.retain(|_| *flags.next().unwrap_or(&false));
}
