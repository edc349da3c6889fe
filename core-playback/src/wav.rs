//! # WAV Header Parsing
//!
//! Locates the `fmt ` and `data` chunks inside the first bytes of a RIFF/WAVE
//! resource. Parsing works on whatever prefix has been downloaded so far and
//! never panics; a missing chunk yields a [`WavHeader`] failure the caller can
//! inspect before deciding how to degrade.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::error::{PlaybackError, Result};

/// Scan bound for the `fmt ` tag; the first offset past it is still probed.
const FMT_SCAN_LIMIT: usize = 2018;

/// Scan bound for the `data` tag; the first offset past it is still probed.
const DATA_SCAN_LIMIT: usize = 2048;

/// Bytes skipped past the `fmt ` tag before looking for `data`.
const DATA_SCAN_SKIP: usize = 24;

/// Minimum `fmt ` chunk size that carries the extensible sub-format GUID.
const EXTENSIBLE_FMT_SIZE: u32 = 40;

/// WAVE format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatTag {
    /// Integer PCM (1)
    Pcm,
    /// IEEE 754 float (3)
    IeeeFloat,
    /// WAVE_FORMAT_EXTENSIBLE (65534)
    Extensible,
    Other(u16),
}

impl FormatTag {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::Pcm,
            3 => Self::IeeeFloat,
            65534 => Self::Extensible,
            other => Self::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Pcm => 1,
            Self::IeeeFloat => 3,
            Self::Extensible => 65534,
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcm => write!(f, "PCM"),
            Self::IeeeFloat => write!(f, "IEEE float"),
            Self::Extensible => write!(f, "extensible"),
            Self::Other(value) => write!(f, "tag {}", value),
        }
    }
}

/// Immutable description of a parsed WAV stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavFormat {
    /// Tag as written in the `fmt ` chunk.
    pub format_tag: FormatTag,
    /// Tag that determines sample decoding. Equal to `format_tag` unless the
    /// header is extensible and its sub-format GUID was resolved.
    pub sample_format: FormatTag,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bit_depth: u16,
    /// Payload length in bytes, from the `data` chunk header.
    pub data_length: u32,
    /// Absolute offset of the first payload byte.
    pub data_start: usize,
}

impl WavFormat {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bit_depth / 8)
    }

    /// Individual samples (not frames) in the payload.
    pub fn total_samples(&self) -> u64 {
        match self.bytes_per_sample() {
            0 => 0,
            bps => u64::from(self.data_length) / bps as u64,
        }
    }

    /// Frames (one sample per channel) in the payload.
    pub fn total_frames(&self) -> u64 {
        match self.channels {
            0 => 0,
            channels => self.total_samples() / u64::from(channels),
        }
    }

    /// Bytes from the start of the resource to the end of the payload.
    pub fn file_length(&self) -> u64 {
        self.data_start as u64 + u64::from(self.data_length)
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.byte_rate == 0 {
            return 0.0;
        }
        f64::from(self.data_length) / f64::from(self.byte_rate)
    }

    /// Reject layouts the decoder cannot handle.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.sample_format, FormatTag::Pcm | FormatTag::IeeeFloat) {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "format {} (sample format {})",
                self.format_tag, self.sample_format
            )));
        }

        if !matches!(self.bit_depth, 8 | 16 | 24 | 32) {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "{}-bit samples",
                self.bit_depth
            )));
        }

        if self.channels == 0 || self.sample_rate == 0 || self.byte_rate == 0 {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "degenerate layout: {} channels, {} Hz, {} bytes/s",
                self.channels, self.sample_rate, self.byte_rate
            )));
        }

        Ok(())
    }
}

/// Why a header could not be located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFailure {
    MissingFmt,
    MissingData,
    /// A tag was found but its fields run past the buffer.
    Truncated,
}

impl fmt::Display for HeaderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFmt => write!(f, "no 'fmt ' chunk in header window"),
            Self::MissingData => write!(f, "no 'data' chunk in header window"),
            Self::Truncated => write!(f, "header fields truncated"),
        }
    }
}

/// Result of scanning a buffer for a WAV header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    /// Bytes 0..4, expected `RIFF`. Informational only.
    pub riff_id: [u8; 4],
    /// Bytes 8..12, expected `WAVE`. Informational only.
    pub wave_id: [u8; 4],
    outcome: std::result::Result<WavFormat, HeaderFailure>,
}

impl WavHeader {
    pub fn failure(reason: HeaderFailure) -> Self {
        Self {
            riff_id: [0; 4],
            wave_id: [0; 4],
            outcome: Err(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn format(&self) -> Option<&WavFormat> {
        self.outcome.as_ref().ok()
    }

    pub fn failure_reason(&self) -> Option<HeaderFailure> {
        self.outcome.as_ref().err().copied()
    }

    /// Convert into a validated format.
    ///
    /// A missing chunk becomes `HeaderNotFound`; a located but undecodable
    /// layout becomes `UnsupportedFormat`.
    pub fn into_format(self) -> Result<WavFormat> {
        let format = self
            .outcome
            .map_err(|reason| PlaybackError::HeaderNotFound(reason.to_string()))?;
        format.validate()?;
        Ok(format)
    }
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_tag(buf: &[u8], at: usize) -> [u8; 4] {
    let mut tag = [0u8; 4];
    if let Some(bytes) = buf.get(at..at + 4) {
        tag.copy_from_slice(bytes);
    }
    tag
}

/// Probe `tag` in 2-byte steps from `from`, stopping after the first offset
/// beyond `limit` has been checked.
fn find_tag(buf: &[u8], tag: &[u8; 4], from: usize, limit: usize) -> Option<usize> {
    let mut offset = from;
    while offset + 4 <= buf.len() {
        if &buf[offset..offset + 4] == tag {
            return Some(offset);
        }
        if offset > limit {
            break;
        }
        offset += 2;
    }
    None
}

/// Scan `buf` for the `fmt ` and `data` chunks.
pub fn parse_header(buf: &[u8]) -> WavHeader {
    let riff_id = read_tag(buf, 0);
    let wave_id = read_tag(buf, 8);

    debug!(
        riff = %String::from_utf8_lossy(&riff_id),
        wave = %String::from_utf8_lossy(&wave_id),
        len = buf.len(),
        "Scanning WAV header"
    );

    let outcome = scan(buf);
    if let Err(reason) = &outcome {
        warn!(%reason, len = buf.len(), "WAV header not found");
    }

    WavHeader {
        riff_id,
        wave_id,
        outcome,
    }
}

fn scan(buf: &[u8]) -> std::result::Result<WavFormat, HeaderFailure> {
    let fmt_at = find_tag(buf, b"fmt ", 12, FMT_SCAN_LIMIT).ok_or(HeaderFailure::MissingFmt)?;

    let fmt_size = read_u32(buf, fmt_at + 4).ok_or(HeaderFailure::Truncated)?;
    let raw_tag = read_u16(buf, fmt_at + 8).ok_or(HeaderFailure::Truncated)?;
    let channels = read_u16(buf, fmt_at + 10).ok_or(HeaderFailure::Truncated)?;
    let sample_rate = read_u32(buf, fmt_at + 12).ok_or(HeaderFailure::Truncated)?;
    let byte_rate = read_u32(buf, fmt_at + 16).ok_or(HeaderFailure::Truncated)?;
    let block_align = read_u16(buf, fmt_at + 20).ok_or(HeaderFailure::Truncated)?;
    let bit_depth = read_u16(buf, fmt_at + 22).ok_or(HeaderFailure::Truncated)?;

    let format_tag = FormatTag::from_u16(raw_tag);
    let sample_format = match format_tag {
        // Sub-format GUID starts 24 bytes into the fmt payload; its first two
        // bytes carry the plain format tag.
        FormatTag::Extensible if fmt_size >= EXTENSIBLE_FMT_SIZE => {
            read_u16(buf, fmt_at + 8 + 24)
                .map(FormatTag::from_u16)
                .unwrap_or(FormatTag::Extensible)
        }
        tag => tag,
    };

    let data_at = find_tag(buf, b"data", fmt_at + DATA_SCAN_SKIP, DATA_SCAN_LIMIT)
        .ok_or(HeaderFailure::MissingData)?;
    let data_length = read_u32(buf, data_at + 4).ok_or(HeaderFailure::Truncated)?;

    Ok(WavFormat {
        format_tag,
        sample_format,
        channels,
        sample_rate,
        byte_rate,
        block_align,
        bit_depth,
        data_length,
        data_start: data_at + 8,
    })
}

/// Build a canonical 44-byte header.
///
/// Used by tests and tools that synthesise streams.
pub fn encode_header(
    format_tag: FormatTag,
    channels: u16,
    sample_rate: u32,
    bit_depth: u16,
    data_length: u32,
) -> Vec<u8> {
    let block_align = channels * (bit_depth / 8);
    let byte_rate = sample_rate * u32::from(block_align);

    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(36 + data_length).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&format_tag.as_u16().to_le_bytes());
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&bit_depth.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_length.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_pcm_header() {
        let buf = encode_header(FormatTag::Pcm, 1, 44_100, 16, 1000);
        let header = parse_header(&buf);

        assert!(header.is_success());
        assert_eq!(&header.riff_id, b"RIFF");
        assert_eq!(&header.wave_id, b"WAVE");

        let format = header.into_format().unwrap();
        assert_eq!(format.data_start, 44);
        assert_eq!(format.channels, 1);
        assert_eq!(format.sample_rate, 44_100);
        assert_eq!(format.byte_rate, 88_200);
        assert_eq!(format.block_align, 2);
        assert_eq!(format.bit_depth, 16);
        assert_eq!(format.data_length, 1000);
        assert_eq!(format.total_samples(), 500);
        assert_eq!(format.file_length(), 1044);
    }

    #[test]
    fn test_header_with_leading_list_chunk() {
        let mut buf = encode_header(FormatTag::IeeeFloat, 2, 48_000, 32, 64);
        // Insert a LIST chunk between fmt and data.
        let mut list = b"LIST".to_vec();
        list.extend_from_slice(&10u32.to_le_bytes());
        list.extend_from_slice(b"INFOabcdef");
        let tail = buf.split_off(36);
        buf.extend_from_slice(&list);
        buf.extend_from_slice(&tail);

        let format = parse_header(&buf).into_format().unwrap();
        assert_eq!(format.data_start, 44 + list.len());
        assert_eq!(format.sample_format, FormatTag::IeeeFloat);
    }

    #[test]
    fn test_missing_fmt_is_failure_not_panic() {
        let buf = vec![0u8; 4096];
        let header = parse_header(&buf);
        assert!(!header.is_success());
        assert_eq!(header.failure_reason(), Some(HeaderFailure::MissingFmt));
        assert!(matches!(
            header.into_format(),
            Err(PlaybackError::HeaderNotFound(_))
        ));
    }

    #[test]
    fn test_missing_data_chunk() {
        let buf = encode_header(FormatTag::Pcm, 1, 8000, 8, 10);
        let header = parse_header(&buf[..36]);
        assert_eq!(header.failure_reason(), Some(HeaderFailure::MissingData));
    }

    #[test]
    fn test_truncated_and_empty_buffers() {
        assert_eq!(
            parse_header(&[]).failure_reason(),
            Some(HeaderFailure::MissingFmt)
        );

        let buf = encode_header(FormatTag::Pcm, 1, 8000, 8, 10);
        assert_eq!(
            parse_header(&buf[..20]).failure_reason(),
            Some(HeaderFailure::Truncated)
        );
        assert_eq!(
            parse_header(&buf[..42]).failure_reason(),
            Some(HeaderFailure::Truncated)
        );
    }

    #[test]
    fn test_fmt_beyond_scan_window() {
        let mut buf = vec![0u8; 2100];
        buf[..4].copy_from_slice(b"RIFF");
        buf[8..12].copy_from_slice(b"WAVE");
        buf[2022..2026].copy_from_slice(b"fmt ");
        assert_eq!(
            parse_header(&buf).failure_reason(),
            Some(HeaderFailure::MissingFmt)
        );
    }

    #[test]
    fn test_fmt_at_last_probed_offset() {
        // Relocate a canonical header so its fmt chunk starts at 2020.
        let canonical = encode_header(FormatTag::Pcm, 2, 44_100, 16, 400);
        let mut buf = vec![0u8; 2020];
        buf[..12].copy_from_slice(&canonical[..12]);
        buf.extend_from_slice(&canonical[12..]);

        let format = parse_header(&buf).into_format().unwrap();
        assert_eq!(format.channels, 2);
        assert_eq!(format.data_length, 400);
        assert_eq!(format.data_start, 2020 + 32);
    }

    #[test]
    fn test_unsupported_tag_and_depth() {
        let buf = encode_header(FormatTag::Other(2), 2, 44_100, 16, 100);
        assert!(matches!(
            parse_header(&buf).into_format(),
            Err(PlaybackError::UnsupportedFormat(_))
        ));

        let buf = encode_header(FormatTag::Pcm, 2, 44_100, 12, 100);
        assert!(matches!(
            parse_header(&buf).into_format(),
            Err(PlaybackError::UnsupportedFormat(_))
        ));
    }

    fn extensible_header(sub_format: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&40u32.to_le_bytes());
        buf.extend_from_slice(&65534u16.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&48_000u32.to_le_bytes());
        buf.extend_from_slice(&(48_000u32 * 12).to_le_bytes());
        buf.extend_from_slice(&12u16.to_le_bytes());
        buf.extend_from_slice(&24u16.to_le_bytes());
        buf.extend_from_slice(&22u16.to_le_bytes()); // cbSize
        buf.extend_from_slice(&24u16.to_le_bytes()); // valid bits
        buf.extend_from_slice(&0u32.to_le_bytes()); // channel mask
        buf.extend_from_slice(&sub_format.to_le_bytes());
        buf.extend_from_slice(&[0u8; 14]);
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&1200u32.to_le_bytes());
        buf
    }

    #[test]
    fn test_extensible_resolves_sub_format() {
        let format = parse_header(&extensible_header(1)).into_format().unwrap();
        assert_eq!(format.format_tag, FormatTag::Extensible);
        assert_eq!(format.sample_format, FormatTag::Pcm);
        assert_eq!(format.channels, 4);
        assert_eq!(format.data_start, 68);
        assert_eq!(format.total_samples(), 400);
    }

    #[test]
    fn test_extensible_with_unknown_sub_format() {
        let result = parse_header(&extensible_header(0x55)).into_format();
        assert!(matches!(result, Err(PlaybackError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_format_tag_round_trip() {
        for raw in [1u16, 3, 65534, 2, 7] {
            assert_eq!(FormatTag::from_u16(raw).as_u16(), raw);
        }
    }

    #[test]
    fn test_duration_and_frames() {
        let format = parse_header(&encode_header(FormatTag::Pcm, 2, 48_000, 16, 192_000))
            .into_format()
            .unwrap();
        assert_eq!(format.total_frames(), 48_000);
        assert!((format.duration_seconds() - 1.0).abs() < 1e-9);
    }
}
