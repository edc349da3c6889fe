//! # PCM Decoder
//!
//! Turns the raw payload of a WAV stream into interleaved `f32` samples.
//!
//! Chunks arrive from the network at arbitrary byte boundaries, so
//! [`PcmDecoder`] keeps the trailing bytes of an incomplete sample and
//! prepends them to the next chunk. The free functions in [`pcm`] decode a
//! single contiguous window.
//!
//! ## Supported Layouts
//!
//! | Bit depth | PCM                 | IEEE float                    |
//! |-----------|---------------------|-------------------------------|
//! | 8         | unsigned, centered  | -                             |
//! | 16        | `i16 / 32767`       | 4-byte reinterpret, padded    |
//! | 24        | `i32 / i32::MAX`    | `f32` of shifted bytes        |
//! | 32        | `i32 / i32::MAX`    | native `f32`                  |

pub mod pcm;

pub use pcm::{decode, decode_with, sample_count, EightBitScaling};

use crate::error::Result;
use crate::wav::{FormatTag, WavFormat};

/// Stateful decoder for one stream.
#[derive(Debug, Clone)]
pub struct PcmDecoder {
    bit_depth: u16,
    tag: FormatTag,
    scaling: EightBitScaling,
    carry: Vec<u8>,
}

impl PcmDecoder {
    pub fn new(format: &WavFormat, scaling: EightBitScaling) -> Self {
        Self {
            bit_depth: format.bit_depth,
            tag: format.sample_format,
            scaling,
            carry: Vec::new(),
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bit_depth / 8)
    }

    /// Bytes held back from the previous chunk.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    /// Decode a chunk, carrying any incomplete trailing sample forward.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<f32>> {
        let bps = self.bytes_per_sample().max(1);

        let mut joined;
        let bytes: &[u8] = if self.carry.is_empty() {
            chunk
        } else {
            joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(chunk);
            &joined
        };

        let whole = bytes.len() - bytes.len() % bps;
        let mut out = Vec::with_capacity(whole / bps);
        pcm::decode_into(&bytes[..whole], self.bit_depth, self.tag, self.scaling, &mut out)?;

        self.carry = bytes[whole..].to_vec();
        Ok(out)
    }

    /// Drop any carried bytes, e.g. after a seek or a re-request.
    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::{encode_header, parse_header};

    fn format(bit_depth: u16) -> WavFormat {
        parse_header(&encode_header(FormatTag::Pcm, 1, 8000, bit_depth, 1200))
            .into_format()
            .unwrap()
    }

    #[test]
    fn test_carry_across_chunks() {
        let mut decoder = PcmDecoder::new(&format(24), EightBitScaling::Centered);
        let sample = [0x00, 0x00, 0x40];

        let first = decoder.push(&sample[..2]).unwrap();
        assert!(first.is_empty());
        assert_eq!(decoder.pending_bytes(), 2);

        let second = decoder.push(&sample[2..]).unwrap();
        assert_eq!(second.len(), 1);
        assert!((second[0] - 0.5).abs() < 1e-4);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn test_split_chunks_match_whole_decode() {
        let bytes: Vec<u8> = (0..60u8).collect();
        let whole = decode(&bytes, 0, bytes.len(), 16, FormatTag::Pcm).unwrap();

        let mut decoder = PcmDecoder::new(&format(16), EightBitScaling::Centered);
        let mut split = Vec::new();
        for chunk in bytes.chunks(7) {
            split.extend(decoder.push(chunk).unwrap());
        }
        assert_eq!(split, whole);
    }

    #[test]
    fn test_reset_discards_carry() {
        let mut decoder = PcmDecoder::new(&format(16), EightBitScaling::Centered);
        decoder.push(&[1]).unwrap();
        decoder.reset();
        assert_eq!(decoder.pending_bytes(), 0);
        assert_eq!(decoder.push(&[0, 0]).unwrap().len(), 1);
    }
}
