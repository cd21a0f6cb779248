//! Media property probing.
//!
//! The publish pipeline records bit depth, channel count, sampling rate,
//! and duration for every audio file; the flavor engine compares those
//! properties against a requested flavor to decide whether a transform is
//! needed at all.

use crate::error::{ErrorKind, Result};
use lofty::prelude::*;
use std::path::Path;

/// Audio properties of a media file. All zero for non-audio media.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaProps {
    /// Lowercase container format (file extension).
    pub format: String,
    /// PCM bit depth, 0 if unknown or not applicable.
    pub bit_depth: i32,
    /// Channel count, 0 if unknown or not applicable.
    pub channels: i32,
    /// Sampling rate in Hz, 0 if unknown or not applicable.
    pub sampling_rate: i32,
    /// Duration in seconds, 0.0 if unknown or not applicable.
    pub duration: f64,
}

impl MediaProps {
    /// Whether the file carries audio at all.
    pub fn is_audio(&self) -> bool {
        self.sampling_rate != 0
    }
}

/// Probe a file on disk.
///
/// Media files that are not an audio container (text files, video
/// sidecars, ...) yield all-zero properties; that is not an error.
///
/// # Errors
/// [`ErrorKind::Probe`] when a recognized audio container cannot be
/// decoded, [`ErrorKind::Io`] when the file cannot be read.
pub fn probe(path: &Path) -> Result<MediaProps> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let tagged = match lofty::read_from_path(path) {
        Ok(tagged) => tagged,
        Err(e) if matches!(e.kind(), lofty::error::ErrorKind::UnknownFormat) => {
            return Ok(MediaProps {
                format,
                ..MediaProps::default()
            });
        },
        Err(e) => match e.kind() {
            lofty::error::ErrorKind::Io(_) => {
                exn::bail!(ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
            },
            _ => exn::bail!(ErrorKind::Probe(format!("{}: {e}", path.display()))),
        },
    };
    let properties = tagged.properties();
    Ok(MediaProps {
        format,
        bit_depth: properties.bit_depth().map(i32::from).unwrap_or(0),
        channels: properties.channels().map(i32::from).unwrap_or(0),
        sampling_rate: properties.sample_rate().map(|r| r as i32).unwrap_or(0),
        duration: properties.duration().as_secs_f64(),
    })
}
