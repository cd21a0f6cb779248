//! Test helpers shared by this crate's unit tests.

use std::io::Write;
use std::path::Path;

/// Write a minimal canonical PCM WAV file (fmt + data chunk).
pub(crate) fn write_wav(path: &Path, sample_rate: u32, bit_depth: u16, channels: u16, frames: u32) {
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
    out.resize(out.len() + data_len as usize, 0);
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&out).unwrap();
}
