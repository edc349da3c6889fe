//! # Progressive WAV Streaming
//!
//! Fetches a remote WAV file in byte ranges, decodes its PCM payload while it
//! downloads and feeds pull-based audio callbacks.
//!
//! ## Overview
//!
//! This crate handles:
//! - WAV header parsing on partially downloaded data ([`wav`])
//! - 8/16/24/32-bit integer and float sample decoding ([`decoder`])
//! - Per-channel-group sample queues, including ambisonic splitting ([`queue`])
//! - Ranged HTTP fetching with retry ([`fetcher`])
//! - An optional checksummed disk cache ([`cache`])
//! - The per-stream controller and audio callback ([`streaming`])
//! - Buffer-health aggregation and transport gating ([`sync`], [`transport`])
//!
//! Host capabilities (HTTP, file system, media player) are injected through
//! the `bridge-traits` crate.

pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod fetcher;
pub mod queue;
pub mod streaming;
pub mod sync;
pub mod transport;
pub mod wav;

pub use config::{RetrySettings, StreamConfig, StreamPhase, StreamStats};
pub use decoder::{EightBitScaling, PcmDecoder};
pub use error::{PlaybackError, Result};
pub use queue::{AudioQueueManager, Channel, ChannelQueue};
pub use streaming::{
    AudioInformation, ChannelRouting, ClipReader, ClipSpec, FillOutcome, StreamController,
};
pub use sync::{BufferHealth, StreamSynchroniser};
pub use transport::{
    CoordinatorConfig, PlaybackCoordinator, PlaybackTarget, TransportCommand, TransportStage,
};
pub use wav::{parse_header, FormatTag, WavFormat, WavHeader};

#[cfg(feature = "http-streaming")]
pub use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
