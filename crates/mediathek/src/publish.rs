//! The publish pipeline.
//!
//! Publishing diffs a local build directory against the previous version's
//! dependency table, packs new or changed files into content-addressed
//! archives, uploads them in parallel, and finally commits the version by
//! uploading the dependency table and then the header. A reader at any
//! point sees either no version (no `db.yaml`) or a complete one, and an
//! interrupted publish can simply be re-run: uploads are idempotent and
//! already-uploaded archives are detected and skipped.

use crate::config::Config;
use crate::error::{ErrorKind, Result, from_archive, from_deps, from_storage};
use crate::fetch::{default_workers, download_dependencies, ensure_active, with_retry};
use crate::header::DatabaseHeader;
use crate::pipeline::drive;
use futures::{Stream, StreamExt};
use mediathek_archive::checksum::{md5_file, md5_path};
use mediathek_deps::{DependencyTable, MediaEntry};
use mediathek_flavor::{MediaProps, probe};
use mediathek_storage::{BackendHandle, Repository, key, validate_path};
use semver::Version;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

/// What to publish and how.
#[derive(Clone)]
pub struct PublishRequest {
    /// Root directory of the database build.
    pub build_dir: PathBuf,
    /// Version to publish.
    pub version: String,
    /// Version this publication is based on; `None` starts from scratch.
    pub previous_version: Option<String>,
    /// Optional grouping of media files into shared archives
    /// (`path → group name`); ungrouped files get one archive each.
    pub archives: HashMap<String, String>,
    /// Parallel checksum/upload slots.
    pub num_workers: usize,
    /// Cooperative cancellation; checked at task boundaries.
    pub cancel: CancellationToken,
}

impl PublishRequest {
    pub fn new(build_dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            build_dir: build_dir.into(),
            version: version.into(),
            previous_version: None,
            archives: HashMap::new(),
            num_workers: default_workers(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Progress events yielded by [`publish_stream`].
#[derive(Debug)]
pub enum PublishEvent {
    /// Preconditions passed; the diff is running.
    Started { name: String, version: String },
    /// Attachment diff finished; this many attachments changed.
    AttachmentsDiffed { changed: usize },
    /// Table diff finished; this many tables changed.
    TablesDiffed { changed: usize },
    /// Media diff finished.
    MediaDiffed {
        added: usize,
        updated: usize,
        removed: usize,
    },
    /// An archive was packed and uploaded (or found already uploaded).
    Uploaded { key: String },
    /// The dependency table is on the backend.
    DependenciesUploaded,
    /// The header is on the backend — the version is now visible.
    Committed,
    /// The pipeline finished; always the final event.
    Complete(Box<DependencyTable>),
}

/// Publish a database build as a new version and return its dependency
/// table.
pub async fn publish(config: &Config, repository: &Repository, request: PublishRequest) -> Result<DependencyTable> {
    let (events, receiver) = mpsc::unbounded_channel();
    drop(receiver);
    run_publish(config, repository, request, events).await
}

/// The publish pipeline as an event stream.
pub fn publish_stream<'a>(
    config: &'a Config,
    repository: &'a Repository,
    request: PublishRequest,
) -> impl Stream<Item = Result<PublishEvent>> + 'a {
    let (events, receiver) = mpsc::unbounded_channel();
    drive(run_publish(config, repository, request, events), receiver, |deps| {
        PublishEvent::Complete(Box::new(deps))
    })
}

async fn run_publish(
    config: &Config,
    repository: &Repository,
    request: PublishRequest,
    events: UnboundedSender<PublishEvent>,
) -> Result<DependencyTable> {
    let version = parse_version(&request.version)?;
    if let Some(previous) = &request.previous_version {
        let previous = parse_version(previous)?;
        if previous >= version {
            exn::bail!(ErrorKind::InvalidArgument(format!(
                "previous version has to be smaller than the published version, but {previous} >= {version}"
            )));
        }
    }

    let header_path = request.build_dir.join(key::HEADER_FILE);
    if !header_path.exists() {
        exn::bail!(ErrorKind::InvalidArgument(format!(
            "build directory {} has no {}",
            request.build_dir.display(),
            key::HEADER_FILE
        )));
    }
    let header = DatabaseHeader::from_file(&header_path)?;
    let name = header.name().to_string();

    // Publishing is a write path: an unregistered backend kind is an
    // error here, never a silent skip.
    let backend = config.registry.connect(repository).map_err(from_storage)?;

    let header_key = key::header(&name);
    let published = with_retry(&header_key, &request.cancel, || backend.exists(&header_key, &request.version))
        .await
        .map_err(from_storage)?;
    if published {
        exn::bail!(ErrorKind::InvalidArgument(format!(
            "version '{}' of database '{name}' already exists",
            request.version
        )));
    }

    // Continuations must stay in the repository that holds the previous
    // version; splitting a database across repositories is not
    // supported.
    let mut deps = DependencyTable::new();
    if let Some(previous) = &request.previous_version {
        let exists = with_retry(&header_key, &request.cancel, || backend.exists(&header_key, previous))
            .await
            .map_err(from_storage)?;
        if !exists {
            exn::bail!(ErrorKind::InvalidArgument(format!(
                "previous version '{previous}' of database '{name}' is not in repository '{}'",
                repository.name
            )));
        }
        let staging = tempfile::tempdir().map_err(ErrorKind::Io)?;
        deps = download_dependencies(&backend, &name, previous, staging.path(), &request.cancel).await?;
    }

    let _ = events.send(PublishEvent::Started {
        name: name.clone(),
        version: request.version.clone(),
    });
    ensure_active(&request.cancel)?;

    // ---- attachments
    let attachments = header.attachments();
    check_ids(attachments.iter().map(|(id, _)| id.as_str()), "attachment")?;
    let attachment_paths: Vec<String> = attachments.iter().map(|(_, path)| path.clone()).collect();
    validate_attachments(&request.build_dir, &attachments)?;

    let stale: Vec<String> = deps
        .attachments()
        .filter(|path| match deps.archive(path) {
            Ok(id) => !attachments.iter().any(|(current, _)| current.as_str() == id),
            Err(_) => true,
        })
        .map(str::to_string)
        .collect();
    deps.drop_rows(stale.iter().map(String::as_str));

    let mut changed_attachments: Vec<(String, String)> = Vec::new();
    for (id, path, checksum) in checksums_for(&request.build_dir, attachments.clone(), request.num_workers).await? {
        if deps.checksum(&path).map(|c| c != checksum).unwrap_or(true) {
            deps.add_attachment(&path, &request.version, &id, &checksum);
            changed_attachments.push((id, path));
        }
    }
    let _ = events.send(PublishEvent::AttachmentsDiffed {
        changed: changed_attachments.len(),
    });

    // ---- tables
    let table_ids = header.tables();
    check_ids(table_ids.iter().map(String::as_str), "table")?;
    let mut table_files: Vec<(String, String)> = Vec::new();
    for id in &table_ids {
        let parquet = format!("db.{id}.parquet");
        let csv = format!("db.{id}.csv");
        if request.build_dir.join(&parquet).exists() {
            // Parquet wins when both formats are present.
            table_files.push((id.clone(), parquet));
        } else if request.build_dir.join(&csv).exists() {
            table_files.push((id.clone(), csv));
        } else {
            exn::bail!(ErrorKind::InvalidArgument(format!("table '{id}' has no file in the build directory")));
        }
    }
    let current_tables: HashSet<&str> = table_files.iter().map(|(_, file)| file.as_str()).collect();
    let stale: Vec<String> = deps.tables().filter(|path| !current_tables.contains(path)).map(str::to_string).collect();
    deps.drop_rows(stale.iter().map(String::as_str));

    let mut changed_tables: Vec<(String, String)> = Vec::new();
    for (id, file, checksum) in checksums_for(&request.build_dir, table_files.clone(), request.num_workers).await? {
        if deps.checksum(&file).map(|c| c != checksum).unwrap_or(true) {
            deps.add_meta(&file, &request.version, &checksum);
            changed_tables.push((id, file));
        }
    }
    let _ = events.send(PublishEvent::TablesDiffed {
        changed: changed_tables.len(),
    });
    ensure_active(&request.cancel)?;

    // ---- media
    let discovered = discover_media(&request.build_dir, &attachment_paths)?;
    let discovered_set: HashSet<&str> = discovered.iter().map(String::as_str).collect();
    let vanished: Vec<String> = deps
        .media()
        .filter(|path| !deps.is_removed(path).unwrap_or(false) && !discovered_set.contains(*path))
        .map(str::to_string)
        .collect();
    for path in &vanished {
        deps.remove(path).map_err(from_deps)?;
    }

    let mut added: Vec<(String, String, MediaProps)> = Vec::new();
    let mut updated: Vec<(String, String, MediaProps)> = Vec::new();
    for scan in scan_media(&request, &deps, discovered).await? {
        match scan {
            MediaScan::New { path, checksum, props } => added.push((path, checksum, props)),
            MediaScan::Modified { path, checksum, props } => updated.push((path, checksum, props)),
            MediaScan::Unchanged => {},
        }
    }
    let _ = events.send(PublishEvent::MediaDiffed {
        added: added.len(),
        updated: updated.len(),
        removed: vanished.len(),
    });
    ensure_active(&request.cancel)?;

    // ---- assign archives
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for (path, _, _) in added.iter().chain(updated.iter()) {
        let group = request.archives.get(path).cloned().unwrap_or_else(|| path.clone());
        groups.entry(group).or_default().push(path.clone());
    }
    let mut fingerprints: HashMap<String, String> = HashMap::new();
    let mut media_uploads: Vec<(String, Vec<String>)> = Vec::new();
    for members in groups.into_values() {
        let fingerprint = mediathek_archive::fingerprint(&members, &request.version);
        for member in &members {
            fingerprints.insert(member.clone(), fingerprint.clone());
        }
        media_uploads.push((fingerprint, members));
    }

    let to_entries = |rows: Vec<(String, String, MediaProps)>| -> Vec<MediaEntry> {
        let mut entries: Vec<MediaEntry> = rows
            .into_iter()
            .map(|(path, checksum, props)| MediaEntry {
                archive: fingerprints[&path].clone(),
                version: request.version.clone(),
                checksum,
                bit_depth: props.bit_depth,
                channels: props.channels,
                sampling_rate: props.sampling_rate,
                duration: props.duration,
                path,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    };
    deps.add_media(to_entries(added)).map_err(from_deps)?;
    deps.update_media(to_entries(updated)).map_err(from_deps)?;

    // ---- pack & upload, archives strictly before the dependency table
    // and the header
    let mut uploads: Vec<Upload> = Vec::new();
    for (id, path) in changed_attachments {
        let members = attachment_members(&request.build_dir, &path)?;
        uploads.push(Upload {
            key: key::attachment(&name, &id),
            members,
        });
    }
    for (id, file) in changed_tables {
        uploads.push(Upload {
            key: key::table(&name, &id),
            members: vec![file],
        });
    }
    for (fingerprint, members) in media_uploads {
        uploads.push(Upload {
            key: key::media(&name, &fingerprint),
            members,
        });
    }

    let mut upload_stream = futures::stream::iter(uploads.into_iter().map(|upload| {
        pack_and_put(
            backend.clone(),
            request.build_dir.clone(),
            upload,
            request.version.clone(),
            request.cancel.clone(),
        )
    }))
    .buffer_unordered(request.num_workers.max(1));
    while let Some(result) = upload_stream.next().await {
        let uploaded_key = result?;
        let _ = events.send(PublishEvent::Uploaded { key: uploaded_key });
    }
    drop(upload_stream);
    ensure_active(&request.cancel)?;

    // ---- dependency table, then the header: the visibility commit.
    let local_deps = request.build_dir.join(key::DEPENDENCIES_FILE);
    deps.save(&local_deps).map_err(from_deps)?;
    let deps_key = key::dependencies(&name);
    with_retry(&deps_key, &request.cancel, || backend.put(&local_deps, &deps_key, &request.version))
        .await
        .map_err(from_storage)?;
    let _ = events.send(PublishEvent::DependenciesUploaded);

    with_retry(&header_key, &request.cancel, || backend.put(&header_path, &header_key, &request.version))
        .await
        .map_err(from_storage)?;
    let _ = events.send(PublishEvent::Committed);

    Ok(deps)
}

fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version)
        .map_err(|e| exn::Exn::from(ErrorKind::InvalidArgument(format!("invalid version '{version}': {e}"))))
}

/// Table and attachment ids end up in archive file names, so their
/// alphabet is restricted.
fn check_ids<'a>(ids: impl Iterator<Item = &'a str>, what: &str) -> Result<()> {
    for id in ids {
        let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            exn::bail!(ErrorKind::InvalidArgument(format!(
                "{what} ids must only contain characters from [A-Za-z0-9._-], which is not the case for '{id}'"
            )));
        }
    }
    Ok(())
}

/// Attachment payloads must be portable, present, and non-empty.
fn validate_attachments(build_dir: &Path, attachments: &[(String, String)]) -> Result<()> {
    for (id, path) in attachments {
        if validate_path(path).is_err() || path.starts_with("db.") {
            exn::bail!(ErrorKind::InvalidArgument(format!("attachment '{id}' has a non-portable path '{path}'")));
        }
        let full = build_dir.join(path);
        if full.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false) {
            exn::bail!(ErrorKind::InvalidArgument(format!("attachment '{id}' must not be a symlink")));
        }
        if !full.exists() {
            exn::bail!(ErrorKind::InvalidArgument(format!("attachment '{id}' points to missing path '{path}'")));
        }
        if full.is_dir() {
            let mut files = 0usize;
            for entry in WalkDir::new(&full) {
                let entry = entry.map_err(|e| ErrorKind::InvalidArgument(e.to_string()))?;
                if entry.file_type().is_file() {
                    files += 1;
                } else if entry.file_type().is_dir() && entry.path() != full {
                    let empty = std::fs::read_dir(entry.path()).map(|mut d| d.next().is_none()).unwrap_or(true);
                    if empty {
                        exn::bail!(ErrorKind::InvalidArgument(format!(
                            "attachment '{id}' contains an empty sub-folder"
                        )));
                    }
                }
            }
            if files == 0 {
                exn::bail!(ErrorKind::InvalidArgument(format!("attachment '{id}' points to an empty folder")));
            }
        }
    }
    Ok(())
}

async fn blocking_checksum(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || md5_path(&path).map_err(from_archive))
        .await
        .map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
}

/// Checksum a set of `(id, path)` pairs in parallel. Results come back
/// sorted by path so the diff is deterministic.
async fn checksums_for(
    build_dir: &Path,
    files: Vec<(String, String)>,
    workers: usize,
) -> Result<Vec<(String, String, String)>> {
    let results: Vec<Result<(String, String, String)>> = futures::stream::iter(files.into_iter().map(|(id, path)| {
        let full = build_dir.join(&path);
        async move {
            let checksum = blocking_checksum(full).await?;
            Ok((id, path, checksum))
        }
    }))
    .buffer_unordered(workers.max(1))
    .collect()
    .await;
    let mut out: Vec<(String, String, String)> = results.into_iter().collect::<Result<_>>()?;
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

/// Everything in the build tree that is neither a root `db.*` file, an
/// attachment payload, nor hidden is a media file.
fn discover_media(build_dir: &Path, attachments: &[String]) -> Result<Vec<String>> {
    let mut media = Vec::new();
    for entry in WalkDir::new(build_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(build_dir) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if relative.split('/').any(|part| part.starts_with('.')) {
            continue;
        }
        if !relative.contains('/') && relative.starts_with("db.") {
            // The header, the dependency table, table files, and any
            // leftover table format (a CSV shadowed by its Parquet twin)
            // are never media.
            continue;
        }
        if attachments.iter().any(|a| relative == *a || relative.starts_with(&format!("{a}/"))) {
            continue;
        }
        media.push(relative);
    }
    Ok(media)
}

/// Per-file media scan outcome.
enum MediaScan {
    New {
        path: String,
        checksum: String,
        props: MediaProps,
    },
    Modified {
        path: String,
        checksum: String,
        props: MediaProps,
    },
    Unchanged,
}

/// Checksum and probe the discovered media files in parallel, comparing
/// against the prior dependency table.
async fn scan_media(request: &PublishRequest, deps: &DependencyTable, discovered: Vec<String>) -> Result<Vec<MediaScan>> {
    enum Prior {
        New,
        Existing(String),
        Tombstoned,
    }
    let jobs: Vec<(String, Prior)> = discovered
        .into_iter()
        .map(|path| {
            let prior = match deps.contains(&path) {
                false => Prior::New,
                true => match deps.is_removed(&path).unwrap_or(false) {
                    // Tombstoned rows are never re-materialized.
                    true => Prior::Tombstoned,
                    false => Prior::Existing(deps.checksum(&path).unwrap_or_default().to_string()),
                },
            };
            (path, prior)
        })
        .collect();

    let results: Vec<Result<MediaScan>> = futures::stream::iter(jobs.into_iter().map(|(path, prior)| {
        let build_dir = request.build_dir.clone();
        async move {
            tokio::task::spawn_blocking(move || -> Result<MediaScan> {
                if let Prior::Tombstoned = prior {
                    debug!(path = %path, "ignoring media file with a tombstoned entry");
                    return Ok(MediaScan::Unchanged);
                }
                let file_name = path.rsplit('/').next().unwrap_or(path.as_str());
                let extension = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
                if extension.chars().any(|c| c.is_ascii_uppercase()) {
                    exn::bail!(ErrorKind::InvalidArgument(format!(
                        "the file extension of a media file must be lowercase, but '{path}' is not"
                    )));
                }
                let full = build_dir.join(&path);
                let checksum = md5_file(&full).map_err(from_archive)?;
                match prior {
                    Prior::New => {
                        let props = probe(&full).map_err(crate::error::from_flavor)?;
                        Ok(MediaScan::New { path, checksum, props })
                    },
                    Prior::Existing(previous) if previous != checksum => {
                        let props = probe(&full).map_err(crate::error::from_flavor)?;
                        Ok(MediaScan::Modified { path, checksum, props })
                    },
                    _ => Ok(MediaScan::Unchanged),
                }
            })
            .await
            .map_err(|e| exn::Exn::from(ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))))?
        }
    }))
    .buffer_unordered(request.num_workers.max(1))
    .collect()
    .await;
    results.into_iter().collect()
}

/// One archive to pack and upload.
struct Upload {
    key: String,
    members: Vec<String>,
}

/// Files belonging to an attachment payload (the file itself, or every
/// file of a directory subtree).
fn attachment_members(build_dir: &Path, path: &str) -> Result<Vec<String>> {
    let full = build_dir.join(path);
    if full.is_file() {
        return Ok(vec![path.to_string()]);
    }
    let mut members = Vec::new();
    for entry in WalkDir::new(&full).sort_by_file_name() {
        let entry = entry.map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(build_dir).unwrap_or(entry.path());
            members.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(members)
}

/// Pack one archive and upload it, skipping the upload when the backend
/// already holds the object (interrupted publish being re-run).
async fn pack_and_put(
    backend: BackendHandle,
    build_dir: PathBuf,
    upload: Upload,
    version: String,
    cancel: CancellationToken,
) -> Result<String> {
    ensure_active(&cancel)?;
    if with_retry(&upload.key, &cancel, || backend.exists(&upload.key, &version)).await.map_err(from_storage)? {
        debug!(key = %upload.key, "archive already uploaded; skipping");
        return Ok(upload.key);
    }
    let staging = tempfile::tempdir().map_err(ErrorKind::Io)?;
    let archive_path = staging.path().join("archive.zip");
    {
        let archive_path = archive_path.clone();
        let members = upload.members.clone();
        tokio::task::spawn_blocking(move || mediathek_archive::pack(&archive_path, &build_dir, &members))
            .await
            .map_err(|e| ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
            .map_err(from_archive)?;
    }
    with_retry(&upload.key, &cancel, || backend.put(&archive_path, &upload.key, &version))
        .await
        .map_err(from_storage)?;
    Ok(upload.key)
}
