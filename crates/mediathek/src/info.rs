//! Header-only introspection.
//!
//! Every function here answers from `db.yaml` (plus `db.parquet` where
//! durations or file counts are involved) without materializing any
//! media. The header is fetched once into the default-flavor cache
//! directory and reused afterwards.

use crate::api;
use crate::config::Config;
use crate::error::{Result, from_cache};
use crate::fetch::LazyBackend;
use crate::header::DatabaseHeader;
use mediathek_cache::DirLock;
use mediathek_deps::DependencyTable;
use mediathek_flavor::DEFAULT_FLAVOR_ID;
use tokio_util::sync::CancellationToken;

/// The database header, fetched into the cache if necessary.
pub async fn header(config: &Config, name: &str, version: Option<&str>) -> Result<DatabaseHeader> {
    let version = api::resolve_version(config, name, version).await?;
    let dir = config.layout().flavor_dir(name, &version, DEFAULT_FLAVOR_ID);
    let _lock = DirLock::acquire(&dir).await.map_err(from_cache)?;
    let cancel = CancellationToken::new();
    let mut backend = LazyBackend::new(config, name, &version);
    crate::fetch::ensure_header(&mut backend, name, &version, &dir, &cancel).await
}

/// Author line of the database.
pub async fn author(config: &Config, name: &str, version: Option<&str>) -> Result<Option<String>> {
    Ok(header(config, name, version).await?.string_field("author"))
}

/// Free-text description.
pub async fn description(config: &Config, name: &str, version: Option<&str>) -> Result<Option<String>> {
    Ok(header(config, name, version).await?.string_field("description"))
}

/// License identifier.
pub async fn license(config: &Config, name: &str, version: Option<&str>) -> Result<Option<String>> {
    Ok(header(config, name, version).await?.string_field("license"))
}

/// License URL.
pub async fn license_url(config: &Config, name: &str, version: Option<&str>) -> Result<Option<String>> {
    Ok(header(config, name, version).await?.string_field("license_url"))
}

/// Publishing organization.
pub async fn organization(config: &Config, name: &str, version: Option<&str>) -> Result<Option<String>> {
    Ok(header(config, name, version).await?.string_field("organization"))
}

/// Where the data originally came from.
pub async fn source(config: &Config, name: &str, version: Option<&str>) -> Result<Option<String>> {
    Ok(header(config, name, version).await?.string_field("source"))
}

/// Intended usage (commercial, research, ...).
pub async fn usage(config: &Config, name: &str, version: Option<&str>) -> Result<Option<String>> {
    Ok(header(config, name, version).await?.string_field("usage"))
}

/// Languages covered by the database.
pub async fn languages(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<String>> {
    Ok(header(config, name, version).await?.string_list("languages"))
}

/// Scheme ids.
pub async fn schemes(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<String>> {
    Ok(header(config, name, version).await?.mapping_keys("schemes"))
}

/// Split ids.
pub async fn splits(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<String>> {
    Ok(header(config, name, version).await?.mapping_keys("splits"))
}

/// Rater ids.
pub async fn raters(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<String>> {
    Ok(header(config, name, version).await?.mapping_keys("raters"))
}

/// Table ids (tables and misc tables).
pub async fn tables(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<String>> {
    Ok(header(config, name, version).await?.tables())
}

/// Attachment ids.
pub async fn attachments(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<String>> {
    Ok(header(config, name, version).await?.attachments().into_iter().map(|(id, _)| id).collect())
}

/// Total duration of all non-tombstoned media, in seconds.
pub async fn duration(config: &Config, name: &str, version: Option<&str>) -> Result<f64> {
    let deps = api::dependencies(config, name, version).await?;
    Ok(live_media(&deps).map(|path| deps.duration(path).unwrap_or(0.0)).sum())
}

/// Number of non-tombstoned media files.
pub async fn files(config: &Config, name: &str, version: Option<&str>) -> Result<usize> {
    let deps = api::dependencies(config, name, version).await?;
    Ok(live_media(&deps).count())
}

/// Distinct bit depths across the media files.
pub async fn bit_depths(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<i32>> {
    let deps = api::dependencies(config, name, version).await?;
    Ok(api::distinct_media_values(&deps, |deps, path| deps.bit_depth(path).unwrap_or(0)))
}

/// Distinct channel counts across the media files.
pub async fn channels(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<i32>> {
    let deps = api::dependencies(config, name, version).await?;
    Ok(api::distinct_media_values(&deps, |deps, path| deps.channels(path).unwrap_or(0)))
}

/// Distinct sampling rates across the media files.
pub async fn sampling_rates(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<i32>> {
    let deps = api::dependencies(config, name, version).await?;
    Ok(api::distinct_media_values(&deps, |deps, path| deps.sampling_rate(path).unwrap_or(0)))
}

/// Distinct media formats (lowercase extensions).
pub async fn formats(config: &Config, name: &str, version: Option<&str>) -> Result<Vec<String>> {
    let deps = api::dependencies(config, name, version).await?;
    let mut formats: Vec<String> =
        deps.media().filter_map(|path| deps.format(path).ok().map(str::to_string)).collect();
    formats.sort_unstable();
    formats.dedup();
    Ok(formats)
}

fn live_media(deps: &DependencyTable) -> impl Iterator<Item = &str> {
    deps.media().filter(|path| !deps.is_removed(path).unwrap_or(false))
}
