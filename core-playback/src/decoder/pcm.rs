//! # PCM Sample Conversion
//!
//! Converts little-endian sample bytes into normalised `f32` values.

use serde::{Deserialize, Serialize};

use crate::error::{PlaybackError, Result};
use crate::wav::FormatTag;

/// Mapping applied to unsigned 8-bit samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EightBitScaling {
    /// `(b - 128) / 128`, silence at 0.0.
    #[default]
    Centered,
    /// `b / 127`, range 0.0..~2.0 with silence near 1.0.
    Legacy,
}

/// Number of whole samples `len` bytes hold at `bit_depth`.
pub fn sample_count(len: usize, bit_depth: u16) -> usize {
    match usize::from(bit_depth / 8) {
        0 => 0,
        bps => len / bps,
    }
}

/// Decode `len` bytes starting at `offset` using the default 8-bit scaling.
pub fn decode(
    buf: &[u8],
    offset: usize,
    len: usize,
    bit_depth: u16,
    tag: FormatTag,
) -> Result<Vec<f32>> {
    decode_with(buf, offset, len, bit_depth, tag, EightBitScaling::default())
}

/// Decode `len` bytes starting at `offset`.
///
/// Produces `len / (bit_depth / 8)` samples; trailing partial bytes are
/// ignored. The window is clamped to the buffer.
pub fn decode_with(
    buf: &[u8],
    offset: usize,
    len: usize,
    bit_depth: u16,
    tag: FormatTag,
    scaling: EightBitScaling,
) -> Result<Vec<f32>> {
    let start = offset.min(buf.len());
    let end = offset.saturating_add(len).min(buf.len());
    let window = &buf[start..end];

    let mut out = Vec::with_capacity(sample_count(window.len(), bit_depth));
    decode_into(window, bit_depth, tag, scaling, &mut out)?;
    Ok(out)
}

/// Append decoded samples from `window` to `out`.
pub fn decode_into(
    window: &[u8],
    bit_depth: u16,
    tag: FormatTag,
    scaling: EightBitScaling,
    out: &mut Vec<f32>,
) -> Result<()> {
    match (bit_depth, tag) {
        (8, FormatTag::Pcm) => {
            out.extend(window.iter().map(|&b| match scaling {
                EightBitScaling::Centered => (f32::from(b) - 128.0) / 128.0,
                EightBitScaling::Legacy => f32::from(b) / 127.0,
            }));
        }
        (16, FormatTag::Pcm) => {
            out.extend(
                window
                    .chunks_exact(2)
                    .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32767.0),
            );
        }
        (16, FormatTag::IeeeFloat) => {
            // 16-bit float has no native layout here: four bytes are read
            // from each 2-byte slot and the tail is zero-padded.
            for index in 0..window.len() / 2 {
                let at = index * 2;
                let mut word = [0u8; 4];
                let available = window.len().min(at + 4) - at;
                word[..available].copy_from_slice(&window[at..at + available]);
                out.push(f32::from_le_bytes(word));
            }
        }
        (24, FormatTag::Pcm) => {
            out.extend(window.chunks_exact(3).map(|b| {
                i32::from_le_bytes([0, b[0], b[1], b[2]]) as f32 / i32::MAX as f32
            }));
        }
        (24, FormatTag::IeeeFloat) => {
            out.extend(
                window
                    .chunks_exact(3)
                    .map(|b| f32::from_le_bytes([0, b[0], b[1], b[2]])),
            );
        }
        (32, FormatTag::Pcm) => {
            out.extend(window.chunks_exact(4).map(|b| {
                i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / i32::MAX as f32
            }));
        }
        (32, FormatTag::IeeeFloat) => {
            out.extend(
                window
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        }
        (depth, tag) => {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "{}-bit {}",
                depth, tag
            )));
        }
    }
    Ok(())
}
