//! The load pipeline.
//!
//! Loading materializes one flavor of one database version in the local
//! cache: resolve the version across repositories, lock the flavor
//! directory, fetch header and dependency table, plan the required
//! artifacts against the filters, reuse bytes from sibling cached
//! versions, fetch the remaining archives in parallel with retries, and
//! finally apply flavor transforms.
//!
//! Per-file failures never abort the pipeline — they are collected and
//! surfaced as one aggregate error at the end, with the cache left
//! consistent: media of non-default flavors is staged and converted
//! *before* entering the flavor directory, so every file found there is
//! in its final form.

use crate::config::Config;
use crate::error::{ErrorKind, Result, from_cache, from_deps, from_flavor};
use crate::fetch::{LazyBackend, default_workers, ensure_active, ensure_dependencies, ensure_header, with_retry};
use crate::filter::Filter;
use crate::header::DatabaseHeader;
use crate::pipeline::drive;
use crate::resolve;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use mediathek_cache::{DirLock, marker, reuse};
use mediathek_deps::{ArtifactKind, DependencyTable};
use mediathek_flavor::{Flavor, FlavorSpec, MediaProps, MediaTransform};
use mediathek_storage::{BackendHandle, key};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long the reuse scan waits for a sibling directory's lock before
/// skipping that sibling.
const REUSE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// What to load and how.
#[derive(Clone)]
pub struct LoadRequest {
    /// Database name.
    pub name: String,
    /// Version; latest when unset.
    pub version: Option<String>,
    /// Table selection (by table id).
    pub tables: Filter,
    /// Media selection (by path).
    pub media: Filter,
    /// Attachment selection (by attachment id).
    pub attachments: Filter,
    /// Requested flavor; default means no transformation.
    pub flavor: FlavorSpec,
    /// Load only the header and tables.
    pub only_metadata: bool,
    /// Also materialize tombstoned media.
    pub include_removed: bool,
    /// Parallel fetch/transform slots.
    pub num_workers: usize,
    /// Audio transform collaborator, required for non-default flavors
    /// that actually convert.
    pub transform: Option<Arc<dyn MediaTransform>>,
    /// Cooperative cancellation; checked at task boundaries.
    pub cancel: CancellationToken,
}

impl LoadRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            tables: Filter::All,
            media: Filter::All,
            attachments: Filter::All,
            flavor: FlavorSpec::default(),
            only_metadata: false,
            include_removed: false,
            num_workers: default_workers(),
            transform: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Progress events yielded by [`load_stream`].
#[derive(Debug)]
pub enum LoadEvent {
    /// The flavor directory is locked and the pipeline is running.
    Started {
        name: String,
        version: String,
        root: PathBuf,
    },
    /// Planning finished: this many files across this many archives are
    /// not yet materialized.
    Planned { files: usize, archives: usize },
    /// A file was satisfied from another cached version.
    Reused { path: String },
    /// An archive was fetched and unpacked.
    Fetched { archive: String, files: usize },
    /// A file could not be materialized; the pipeline continues.
    Failed { path: String, cause: String },
    /// A media file was converted to the requested flavor.
    Transformed { path: String },
    /// The pipeline finished; always the final event.
    Complete(Box<LoadOutcome>),
}

/// Result of a load.
#[derive(Debug)]
pub struct LoadOutcome {
    pub name: String,
    pub version: String,
    /// The materialized flavor directory.
    pub root: PathBuf,
    pub header: DatabaseHeader,
    pub deps: DependencyTable,
    /// Fetch failures as `(path, cause)`.
    pub failed: Vec<(String, String)>,
    /// Flavor transform failures as `(path, cause)`.
    pub flavor_failed: Vec<(String, String)>,
}

/// Load a database version into the cache.
///
/// Collected per-file failures become an aggregate error: fetch failures
/// are [`ErrorKind::Load`], transform failures [`ErrorKind::Flavor`].
pub async fn load(config: &Config, request: LoadRequest) -> Result<LoadOutcome> {
    let (events, receiver) = mpsc::unbounded_channel();
    drop(receiver);
    let outcome = run_load(config, request, events).await?;
    if !outcome.failed.is_empty() {
        let mut failed = outcome.failed.clone();
        failed.extend(outcome.flavor_failed.clone());
        exn::bail!(ErrorKind::Load { failed });
    }
    if !outcome.flavor_failed.is_empty() {
        exn::bail!(ErrorKind::Flavor {
            failed: outcome.flavor_failed.clone(),
        });
    }
    Ok(outcome)
}

/// The load pipeline as an event stream.
///
/// Events follow a strict ordering: [`Started`](LoadEvent::Started) and
/// [`Planned`](LoadEvent::Planned) exactly once, then any number of
/// [`Reused`](LoadEvent::Reused) / [`Fetched`](LoadEvent::Fetched) /
/// [`Failed`](LoadEvent::Failed) / [`Transformed`](LoadEvent::Transformed),
/// then [`Complete`](LoadEvent::Complete) exactly once. An `Err` item
/// terminates the stream early. Dropping the stream stops pending work
/// and leaves the cache consistent but unmarked.
pub fn load_stream<'a>(config: &'a Config, request: LoadRequest) -> impl Stream<Item = Result<LoadEvent>> + 'a {
    let (events, receiver) = mpsc::unbounded_channel();
    drive(run_load(config, request, events), receiver, |outcome| LoadEvent::Complete(Box::new(outcome)))
}

/// The pipeline worker. Emits progress on `events` (best-effort; a
/// dropped receiver is fine) and returns the outcome.
async fn run_load(config: &Config, request: LoadRequest, events: UnboundedSender<LoadEvent>) -> Result<LoadOutcome> {
    let flavor = Flavor::try_from(request.flavor.clone()).map_err(from_flavor)?;
    let version = match &request.version {
        Some(version) => version.clone(),
        None => resolve::latest_version(config, &request.name).await?,
    };
    let layout = config.layout();
    let root = layout.flavor_dir(&request.name, &version, &flavor.id());

    let _lock = DirLock::acquire(&root).await.map_err(from_cache)?;
    let _ = events.send(LoadEvent::Started {
        name: request.name.clone(),
        version: version.clone(),
        root: root.clone(),
    });

    let mut backend = LazyBackend::new(config, &request.name, &version);
    let header = ensure_header(&mut backend, &request.name, &version, &root, &request.cancel).await?;
    let deps = ensure_dependencies(&mut backend, &request.name, &version, &root, &request.cancel).await?;
    ensure_active(&request.cancel)?;

    let plan = plan_load(&request, &flavor, &deps, &root)?;
    let mut missing = plan.missing;
    let _ = events.send(LoadEvent::Planned {
        files: missing.len(),
        archives: count_archives(&deps, &missing),
    });

    // Reuse scan: satisfy what we can from sibling cached versions
    // before touching the network. Strictly best-effort.
    if !missing.is_empty() {
        let siblings = reuse::sibling_versions(&layout, &request.name, &version, &flavor.id());
        for sibling in &siblings {
            if missing.is_empty() {
                break;
            }
            let sibling_lock = DirLock::acquire_with_timeout(&sibling.root, REUSE_LOCK_TIMEOUT).await;
            if sibling_lock.is_err() {
                debug!(sibling = %sibling.root.display(), "skipping busy or unwritable sibling version");
                continue;
            }
            let mut still_missing = Vec::with_capacity(missing.len());
            for item in missing {
                match try_reuse(sibling, &deps, &item, &root) {
                    true => {
                        let _ = events.send(LoadEvent::Reused { path: item.path });
                    },
                    false => still_missing.push(item),
                }
            }
            missing = still_missing;
        }
    }
    ensure_active(&request.cancel)?;

    // Media of a non-default flavor is unpacked into a staging directory
    // and only enters the flavor directory converted, so a file found in
    // the directory is always in its final form.
    let staging = match flavor.is_default() {
        true => None,
        false => {
            Some(tempfile::Builder::new().prefix(".staging-").tempdir_in(&root).map_err(ErrorKind::Io)?)
        },
    };

    // Fetch stage: one task per archive, bounded by the worker count,
    // each with the standard retry schedule.
    let mut failed: Vec<(String, String)> = Vec::new();
    if !missing.is_empty() {
        let backend = backend.get().await?.clone();
        let media_root = staging.as_ref().map(|dir| dir.path().to_path_buf()).unwrap_or_else(|| root.clone());
        let mut queued: Vec<_> = group_by_archive(&request.name, &deps, missing)
            .into_iter()
            .map(|plan| {
                let unpack_root = match plan.media {
                    true => media_root.clone(),
                    false => root.clone(),
                };
                fetch_archive(backend.clone(), unpack_root, plan, request.cancel.clone())
            })
            .collect();
        let mut in_flight = FuturesUnordered::new();
        let slots = request.num_workers.max(1).min(queued.len());
        in_flight.extend(queued.drain(..slots));
        while let Some((plan, outcome)) = in_flight.next().await {
            match outcome {
                Ok(files) => {
                    let _ = events.send(LoadEvent::Fetched {
                        archive: plan.display_name,
                        files,
                    });
                },
                Err(cause) => {
                    for member in plan.members {
                        failed.push((member.path.clone(), cause.clone()));
                        let _ = events.send(LoadEvent::Failed {
                            path: member.path,
                            cause: cause.clone(),
                        });
                    }
                },
            }
            if !queued.is_empty() {
                in_flight.push(queued.remove(0));
            }
        }
    }
    ensure_active(&request.cancel)?;

    // Transform stage: move every staged media file into the flavor
    // directory, converting audio where the flavor differs from the
    // source properties. Non-audio media always passes through.
    let mut flavor_failed: Vec<(String, String)> = Vec::new();
    if let Some(staging_dir) = &staging {
        if !request.only_metadata {
            let failed_paths: HashSet<&str> = failed.iter().map(|(path, _)| path.as_str()).collect();
            let pending = plan_transforms(&plan.media, &deps, &flavor, staging_dir.path(), &root, &failed_paths)?;
            let flavor = Arc::new(flavor.clone());
            let mut conversions = futures::stream::iter(pending.into_iter().map(|item| {
                let flavor = flavor.clone();
                let transform = request.transform.clone();
                let TransformItem {
                    path,
                    src,
                    dest,
                    props,
                    converted,
                } = item;
                async move {
                    let result = tokio::task::spawn_blocking(move || match props.is_audio() {
                        true => mediathek_flavor::apply(transform.as_deref(), &flavor, &src, &dest, &props),
                        false => mediathek_flavor::apply(None, &Flavor::default(), &src, &dest, &props),
                    })
                    .await;
                    (path, converted, result)
                }
            }))
            .buffer_unordered(request.num_workers.max(1));
            while let Some((path, converted, result)) = conversions.next().await {
                match result {
                    Ok(Ok(())) => {
                        if converted {
                            let _ = events.send(LoadEvent::Transformed { path });
                        }
                    },
                    Ok(Err(e)) => {
                        flavor_failed.push((path.clone(), e.to_string()));
                        let _ = events.send(LoadEvent::Failed {
                            path,
                            cause: e.to_string(),
                        });
                    },
                    Err(join_error) => {
                        flavor_failed.push((path.clone(), join_error.to_string()));
                        let _ = events.send(LoadEvent::Failed {
                            path,
                            cause: join_error.to_string(),
                        });
                    },
                }
            }
        }
    }
    drop(staging);

    // Finalize: the sentinel appears only when the requested scope fully
    // materialized.
    if failed.is_empty() && flavor_failed.is_empty() {
        marker::mark_complete(&root).map_err(from_cache)?;
    }
    Ok(LoadOutcome {
        name: request.name.clone(),
        version,
        root,
        header,
        deps,
        failed,
        flavor_failed,
    })
}

/// One path that still has to be materialized.
struct MissingPath {
    path: String,
    /// Repository-relative destination (differs from `path` only for
    /// format-converted audio).
    dest: String,
}

/// One archive to fetch.
struct ArchivePlan {
    key: String,
    version: String,
    display_name: String,
    members: Vec<MissingPath>,
    /// Media archives unpack into the staging area (for flavored loads)
    /// and restrict extraction to their wanted members, so a stale
    /// multi-file archive never clobbers files owned by newer archives.
    media: bool,
}

struct LoadPlan {
    /// Media paths in the requested scope (transform stage input).
    media: Vec<String>,
    missing: Vec<MissingPath>,
}

/// Intersect the filters with the dependency table and check what
/// already exists on disk.
fn plan_load(request: &LoadRequest, flavor: &Flavor, deps: &DependencyTable, root: &Path) -> Result<LoadPlan> {
    // Tables and attachments are selected by id, media by path.
    let table_ids: Vec<String> = deps.table_ids().map(str::to_string).collect();
    let selected_tables = request.tables.select(&table_ids, "table")?;
    let table_paths: Vec<String> = deps
        .tables()
        .filter(|path| match mediathek_deps::table_id_of(path) {
            Some(id) => selected_tables.iter().any(|s| s.as_str() == id),
            None => false,
        })
        .map(str::to_string)
        .collect();

    let attachment_ids: Vec<String> = deps.attachment_ids().map(str::to_string).collect();
    let selected_attachments = match request.only_metadata {
        true => Vec::new(),
        false => request.attachments.select(&attachment_ids, "attachment")?,
    };
    let attachment_paths: Vec<String> = deps
        .attachments()
        .filter(|path| match deps.archive(path) {
            Ok(id) => selected_attachments.iter().any(|s| s.as_str() == id),
            Err(_) => false,
        })
        .map(str::to_string)
        .collect();

    let available_media: Vec<String> = deps
        .media()
        .filter(|path| request.include_removed || !deps.is_removed(path).unwrap_or(false))
        .map(str::to_string)
        .collect();
    let selected_media = match request.only_metadata {
        true => Vec::new(),
        false => request.media.select(&available_media, "media file")?,
    };

    let mut missing = Vec::new();
    for path in table_paths.iter().chain(attachment_paths.iter()) {
        if !root.join(path).exists() {
            missing.push(MissingPath {
                path: path.clone(),
                dest: path.clone(),
            });
        }
    }
    for path in &selected_media {
        let dest = media_destination(flavor, deps, path);
        if !root.join(&dest).exists() {
            missing.push(MissingPath {
                path: path.clone(),
                dest,
            });
        }
    }
    Ok(LoadPlan {
        media: selected_media,
        missing,
    })
}

/// Materialized path of a media file under a flavor: format conversion
/// renames audio files, everything else passes through unchanged.
fn media_destination(flavor: &Flavor, deps: &DependencyTable, path: &str) -> String {
    match deps.sampling_rate(path) {
        Ok(rate) if rate != 0 => flavor.destination(path),
        _ => path.to_string(),
    }
}

fn count_archives(deps: &DependencyTable, missing: &[MissingPath]) -> usize {
    missing.iter().filter_map(|item| deps.archive(&item.path).ok()).collect::<HashSet<_>>().len()
}

/// Group the remaining missing paths into per-archive fetch plans.
fn group_by_archive(name: &str, deps: &DependencyTable, missing: Vec<MissingPath>) -> Vec<ArchivePlan> {
    let mut plans: HashMap<String, ArchivePlan> = HashMap::new();
    for item in missing {
        let Ok(row) = deps.row(&item.path) else {
            continue;
        };
        let (archive_key, display_name, media) = match row.kind {
            ArtifactKind::Meta => match mediathek_deps::table_id_of(&item.path) {
                Some(id) => (key::table(name, id), format!("meta/{id}"), false),
                None => continue,
            },
            ArtifactKind::Attachment => {
                (key::attachment(name, &row.archive), format!("attachment/{}", row.archive), false)
            },
            ArtifactKind::Media => (key::media(name, &row.archive), format!("media/{}", row.archive), true),
        };
        plans
            .entry(archive_key.clone())
            .or_insert_with(|| ArchivePlan {
                key: archive_key,
                version: row.version.clone(),
                display_name,
                members: Vec::new(),
                media,
            })
            .members
            .push(item);
    }
    let mut plans: Vec<ArchivePlan> = plans.into_values().collect();
    plans.sort_by(|a, b| a.key.cmp(&b.key));
    plans
}

/// Try to satisfy one missing path from a sibling cached version.
///
/// Reuse requires the two dependency tables to agree on the content
/// checksum; the file is then hard-linked (or copied) in its
/// *materialized* form, so flavored files are reused without converting
/// again.
fn try_reuse(sibling: &reuse::SiblingVersion, deps: &DependencyTable, item: &MissingPath, root: &Path) -> bool {
    let Ok(wanted) = deps.checksum(&item.path) else {
        return false;
    };
    let Ok(theirs) = sibling.deps.checksum(&item.path) else {
        return false;
    };
    if wanted != theirs {
        return false;
    }
    let source = sibling.root.join(&item.dest);
    if !source.is_file() {
        return false;
    }
    reuse::link_or_copy(&source, &root.join(&item.dest)).is_ok()
}

/// Download one archive and unpack the wanted members into
/// `unpack_root`. Returns the number of files written.
async fn fetch_archive(
    backend: BackendHandle,
    unpack_root: PathBuf,
    plan: ArchivePlan,
    cancel: CancellationToken,
) -> (ArchivePlan, std::result::Result<usize, String>) {
    if cancel.is_cancelled() {
        return (plan, Err("cancelled".to_string()));
    }
    let staging = match tempfile::Builder::new().prefix(".fetch-").tempdir_in(&unpack_root) {
        Ok(staging) => staging,
        Err(e) => return (plan, Err(e.to_string())),
    };
    let archive_path = staging.path().join("archive.zip");
    if let Err(e) = with_retry(&plan.key, &cancel, || backend.get(&plan.key, &plan.version, &archive_path)).await {
        return (plan, Err(e.to_string()));
    }

    let filter: Option<HashSet<String>> =
        plan.media.then(|| plan.members.iter().map(|member| member.path.clone()).collect());
    let unpacked = tokio::task::spawn_blocking(move || {
        mediathek_archive::unpack(&archive_path, &unpack_root, filter.as_ref())
    })
    .await;
    match unpacked {
        Ok(Ok(files)) => (plan, Ok(files.len())),
        Ok(Err(e)) => (plan, Err(e.to_string())),
        Err(join_error) => (plan, Err(join_error.to_string())),
    }
}

/// One pending move from the staging area into the flavor directory.
struct TransformItem {
    path: String,
    src: PathBuf,
    dest: PathBuf,
    props: MediaProps,
    /// Whether this is an actual conversion (as opposed to a pass-through
    /// of an already-conforming or non-audio file).
    converted: bool,
}

/// Everything sitting in the staging area that belongs in the flavor
/// directory: audio to convert, the rest to pass through.
fn plan_transforms(
    media: &[String],
    deps: &DependencyTable,
    flavor: &Flavor,
    staging: &Path,
    root: &Path,
    failed: &HashSet<&str>,
) -> Result<Vec<TransformItem>> {
    let mut items = Vec::new();
    for path in media {
        if failed.contains(path.as_str()) {
            continue;
        }
        let row = deps.row(path).map_err(from_deps)?;
        let dest_rel = match row.sampling_rate {
            0 => path.clone(),
            _ => flavor.destination(path),
        };
        let src = staging.join(path);
        let dest = root.join(&dest_rel);
        if !src.exists() {
            // Satisfied by reuse or an earlier load, or its fetch failed
            // (which is already recorded).
            continue;
        }
        if dest.exists() {
            continue;
        }
        let props = MediaProps {
            format: row.format.clone(),
            bit_depth: row.bit_depth,
            channels: row.channels,
            sampling_rate: row.sampling_rate,
            duration: row.duration,
        };
        items.push(TransformItem {
            path: path.clone(),
            converted: row.sampling_rate != 0 && mediathek_flavor::needs_transform(flavor, &props),
            src,
            dest,
            props,
        });
    }
    Ok(items)
}
