//! Flavor value objects.

use crate::error::{ErrorKind, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Supported output media formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Wav,
    Flac,
}

impl MediaFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Flac => "flac",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaFormat {
    type Err = crate::error::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "flac" => Ok(Self::Flac),
            other => exn::bail!(ErrorKind::InvalidSpec(format!("format has to be one of [wav, flac], not '{other}'"))),
        }
    }
}

/// Supported PCM bit depths (32 bit only for WAV output).
pub const BIT_DEPTHS: &[u32] = &[8, 16, 24, 32];
/// Supported sampling rates in Hz.
pub const SAMPLING_RATES: &[u32] = &[8000, 16000, 22050, 24000, 44100, 48000];
/// Deprecated alias for 22050 Hz, still accepted.
const DEPRECATED_SAMPLING_RATE: u32 = 22500;

/// Flavor id of the flavor with no transformations.
pub const DEFAULT_FLAVOR_ID: &str = "default";

/// An unvalidated flavor request, as it appears in user-facing APIs.
///
/// All fields unset (and `mixdown` false) is the *default flavor*: media
/// files are materialized exactly as published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlavorSpec {
    /// Sample precision, one of 8, 16, 24, 32.
    pub bit_depth: Option<u32>,
    /// Ordered channel selection; negative indices count from the last
    /// channel.
    pub channels: Option<Vec<i32>>,
    /// Output format.
    pub format: Option<String>,
    /// Apply a mono mix-down to the channel selection.
    #[serde(default)]
    pub mixdown: bool,
    /// Sampling rate in Hz.
    pub sampling_rate: Option<u32>,
}

/// A validated, normalized flavor.
///
/// Normalization lowercases the format, maps the deprecated 22500 Hz
/// alias to 22050 Hz, and drops a redundant `mixdown` when the channel
/// selection is already mono — so equivalent requests always hash to the
/// same [`Flavor::id`].
#[derive(Debug, Clone, PartialEq)]
pub struct Flavor {
    bit_depth: Option<u32>,
    channels: Option<Vec<i32>>,
    format: Option<MediaFormat>,
    mixdown: bool,
    sampling_rate: Option<u32>,
}

impl Default for Flavor {
    fn default() -> Self {
        Self {
            bit_depth: None,
            channels: None,
            format: None,
            mixdown: false,
            sampling_rate: None,
        }
    }
}

impl TryFrom<FlavorSpec> for Flavor {
    type Error = crate::error::Error;

    fn try_from(spec: FlavorSpec) -> Result<Self> {
        let format = spec.format.as_deref().map(str::parse).transpose()?;

        if let Some(bit_depth) = spec.bit_depth {
            if !BIT_DEPTHS.contains(&bit_depth) {
                exn::bail!(ErrorKind::InvalidSpec(format!(
                    "bit depth has to be one of {BIT_DEPTHS:?}, not {bit_depth}"
                )));
            }
            if bit_depth == 32 && format != Some(MediaFormat::Wav) {
                exn::bail!(ErrorKind::InvalidSpec("bit depth 32 requires format 'wav'".to_string()));
            }
        }

        if let Some(channels) = &spec.channels {
            if channels.is_empty() {
                exn::bail!(ErrorKind::InvalidSpec("channel selection must not be empty".to_string()));
            }
        }

        let sampling_rate = match spec.sampling_rate {
            Some(DEPRECATED_SAMPLING_RATE) => {
                warn!("sampling rate 22500 Hz is a deprecated alias; using 22050 Hz");
                Some(22050)
            },
            Some(rate) if !SAMPLING_RATES.contains(&rate) => {
                exn::bail!(ErrorKind::InvalidSpec(format!(
                    "sampling rate has to be one of {SAMPLING_RATES:?}, not {rate}"
                )));
            },
            other => other,
        };

        // A mono selection makes mixdown a no-op.
        let mixdown = match &spec.channels {
            Some(channels) if channels.len() < 2 => false,
            _ => spec.mixdown,
        };

        Ok(Self {
            bit_depth: spec.bit_depth,
            channels: spec.channels,
            format,
            mixdown,
            sampling_rate,
        })
    }
}

impl Flavor {
    pub fn bit_depth(&self) -> Option<u32> {
        self.bit_depth
    }

    pub fn channels(&self) -> Option<&[i32]> {
        self.channels.as_deref()
    }

    pub fn format(&self) -> Option<MediaFormat> {
        self.format
    }

    pub fn mixdown(&self) -> bool {
        self.mixdown
    }

    pub fn sampling_rate(&self) -> Option<u32> {
        self.sampling_rate
    }

    /// Whether this is the default (no transformation) flavor.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Short stable id of the normalized flavor.
    ///
    /// The default flavor has the designated id `"default"`; every other
    /// flavor hashes its canonical form to eight hex characters.
    pub fn id(&self) -> String {
        if self.is_default() {
            return DEFAULT_FLAVOR_ID.to_string();
        }
        let digest = Md5::digest(self.canonical().as_bytes());
        hex::encode(digest)[..8].to_string()
    }

    /// Canonical textual form used for hashing. The unset sentinel is
    /// distinct from every concrete value.
    fn canonical(&self) -> String {
        let channels = match &self.channels {
            Some(channels) => channels.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(","),
            None => "unset".to_string(),
        };
        format!(
            "bit_depth={};channels={};format={};mixdown={};sampling_rate={}",
            display_or_unset(self.bit_depth),
            channels,
            self.format.map(|f| f.as_str().to_string()).unwrap_or_else(|| "unset".to_string()),
            self.mixdown,
            display_or_unset(self.sampling_rate),
        )
    }

    /// Path of a media file after materialization in this flavor.
    ///
    /// Only a format conversion changes the path (its extension).
    pub fn destination(&self, path: &str) -> String {
        let Some(format) = self.format else {
            return path.to_string();
        };
        match path.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && ext.to_ascii_lowercase() != format.as_str() => {
                format!("{stem}.{format}")
            },
            _ => path.to_string(),
        }
    }
}

fn display_or_unset(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "unset".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flavor(spec: FlavorSpec) -> Flavor {
        Flavor::try_from(spec).unwrap()
    }

    #[test]
    fn test_default_flavor_id() {
        assert_eq!(Flavor::default().id(), "default");
        assert_eq!(flavor(FlavorSpec::default()).id(), "default");
        assert!(Flavor::default().is_default());
    }

    #[test]
    fn test_id_is_stable_and_short() {
        let a = flavor(FlavorSpec {
            format: Some("flac".to_string()),
            sampling_rate: Some(44100),
            ..FlavorSpec::default()
        });
        let b = flavor(FlavorSpec {
            format: Some("flac".to_string()),
            sampling_rate: Some(44100),
            ..FlavorSpec::default()
        });
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().len(), 8);
        assert_ne!(a.id(), "default");
    }

    #[test]
    fn test_id_distinguishes_flavors() {
        let wav = flavor(FlavorSpec {
            format: Some("wav".to_string()),
            ..FlavorSpec::default()
        });
        let flac = flavor(FlavorSpec {
            format: Some("flac".to_string()),
            ..FlavorSpec::default()
        });
        assert_ne!(wav.id(), flac.id());
    }

    #[test]
    fn test_format_is_lowercased() {
        let upper = flavor(FlavorSpec {
            format: Some("FLAC".to_string()),
            ..FlavorSpec::default()
        });
        assert_eq!(upper.format(), Some(MediaFormat::Flac));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Flavor::try_from(FlavorSpec {
            bit_depth: Some(12),
            ..FlavorSpec::default()
        })
        .is_err());
        assert!(Flavor::try_from(FlavorSpec {
            format: Some("mp3".to_string()),
            ..FlavorSpec::default()
        })
        .is_err());
        assert!(Flavor::try_from(FlavorSpec {
            sampling_rate: Some(11025),
            ..FlavorSpec::default()
        })
        .is_err());
        assert!(Flavor::try_from(FlavorSpec {
            channels: Some(vec![]),
            ..FlavorSpec::default()
        })
        .is_err());
    }

    #[test]
    fn test_bit_depth_32_requires_wav() {
        assert!(Flavor::try_from(FlavorSpec {
            bit_depth: Some(32),
            format: Some("flac".to_string()),
            ..FlavorSpec::default()
        })
        .is_err());
        assert!(Flavor::try_from(FlavorSpec {
            bit_depth: Some(32),
            ..FlavorSpec::default()
        })
        .is_err());
        assert!(Flavor::try_from(FlavorSpec {
            bit_depth: Some(32),
            format: Some("wav".to_string()),
            ..FlavorSpec::default()
        })
        .is_ok());
    }

    #[test]
    fn test_deprecated_sampling_rate_alias() {
        let deprecated = flavor(FlavorSpec {
            sampling_rate: Some(22500),
            ..FlavorSpec::default()
        });
        let canonical = flavor(FlavorSpec {
            sampling_rate: Some(22050),
            ..FlavorSpec::default()
        });
        assert_eq!(deprecated.sampling_rate(), Some(22050));
        // Both spellings name the same flavor.
        assert_eq!(deprecated.id(), canonical.id());
    }

    #[test]
    fn test_mixdown_dropped_for_mono_selection() {
        let mono = flavor(FlavorSpec {
            channels: Some(vec![0]),
            mixdown: true,
            ..FlavorSpec::default()
        });
        assert!(!mono.mixdown());
        let stereo = flavor(FlavorSpec {
            channels: Some(vec![0, 1]),
            mixdown: true,
            ..FlavorSpec::default()
        });
        assert!(stereo.mixdown());
    }

    #[test]
    fn test_destination() {
        let flac = flavor(FlavorSpec {
            format: Some("flac".to_string()),
            ..FlavorSpec::default()
        });
        assert_eq!(flac.destination("audio/001.wav"), "audio/001.flac");
        assert_eq!(flac.destination("audio/001.flac"), "audio/001.flac");
        assert_eq!(Flavor::default().destination("audio/001.wav"), "audio/001.wav");
    }
}
