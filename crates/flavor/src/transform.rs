//! Driving media transforms.
//!
//! The flavor engine itself never decodes audio. It decides, per file,
//! whether the requested flavor differs from the file's actual properties
//! and either passes the file through (hard link or copy) or hands it to
//! the [`MediaTransform`] collaborator supplied by the caller.

use crate::error::{ErrorKind, Result};
use crate::probe::MediaProps;
use crate::spec::Flavor;
use std::path::Path;
use tracing::debug;

/// Audio transform collaborator.
///
/// Implementations decode `src`, apply the requested remix/resample/
/// requantization, and write the result to `dest`. The engine guarantees
/// that `dest`'s extension matches the flavor's output format and that the
/// source is a decodable container.
pub trait MediaTransform: Send + Sync {
    fn transform(&self, src: &Path, dest: &Path, props: &MediaProps, flavor: &Flavor) -> Result<()>;
}

/// Whether materializing `props` in `flavor` requires a transform at all.
///
/// A channel selection that exactly enumerates the source's channels in
/// order is a no-op; so is a mixdown of a mono file.
pub fn needs_transform(flavor: &Flavor, props: &MediaProps) -> bool {
    if let Some(format) = flavor.format() {
        if format.as_str() != props.format {
            return true;
        }
    }
    if let Some(bit_depth) = flavor.bit_depth() {
        if bit_depth as i32 != props.bit_depth {
            return true;
        }
    }
    if flavor.mixdown() && props.channels != 1 {
        return true;
    }
    if let Some(selection) = flavor.channels() {
        let identity: Vec<i32> = (0..props.channels).collect();
        if selection != identity {
            return true;
        }
    }
    if let Some(rate) = flavor.sampling_rate() {
        if rate as i32 != props.sampling_rate {
            return true;
        }
    }
    false
}

/// Materialize one audio file in the requested flavor.
///
/// Non-transforming cases hard-link (or copy) `src` to `dest`; otherwise
/// the collaborator converts. `src == dest` with nothing to do is a
/// no-op.
///
/// # Errors
/// [`ErrorKind::UnsupportedConversion`] when a transform is required but
/// the source container cannot be decoded (only WAV and FLAC sources are
/// convertible) or no collaborator was provided.
pub fn apply(
    transform: Option<&dyn MediaTransform>,
    flavor: &Flavor,
    src: &Path,
    dest: &Path,
    props: &MediaProps,
) -> Result<()> {
    if !needs_transform(flavor, props) {
        if src != dest {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
            }
            if std::fs::hard_link(src, dest).is_err() {
                std::fs::copy(src, dest).map_err(ErrorKind::Io)?;
            }
        }
        return Ok(());
    }

    if !matches!(props.format.as_str(), "wav" | "flac") {
        exn::bail!(ErrorKind::UnsupportedConversion(format!(
            "cannot decode '{}' files; only wav and flac sources are convertible",
            props.format
        )));
    }
    let Some(transform) = transform else {
        exn::bail!(ErrorKind::UnsupportedConversion(
            "a transform is required for this flavor but no collaborator was provided".to_string()
        ));
    };
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
    }
    debug!(src = %src.display(), dest = %dest.display(), "converting media file");
    transform.transform(src, dest, props, flavor)
}
