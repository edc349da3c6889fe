//! # Streaming Configuration
//!
//! Configuration, lifecycle phase and statistics types for WAV stream
//! controllers.

use bridge_traits::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Component;
use std::path::Path;
use std::time::Duration;

use crate::decoder::pcm::EightBitScaling;
use crate::error::{PlaybackError, Result};

/// Stream controller configuration.
///
/// Controls chunk sizes, buffer thresholds, caching and retry behaviour.
/// Every field has a serde default so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bytes requested for the first chunk, which must contain the header.
    ///
    /// Default: 2048.
    #[serde(default = "default_initial_chunk_bytes")]
    pub initial_chunk_bytes: usize,

    /// Seconds of audio requested per follow-up chunk (multiplied by the byte rate).
    ///
    /// Default: 5.
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: u32,

    /// Buffered seconds below which the next chunk is requested.
    ///
    /// Default: 5.0.
    #[serde(default = "default_min_buffer_seconds")]
    pub min_buffer_seconds: f32,

    /// Buffered seconds below which an idle stream reports a critical shortage.
    ///
    /// Default: 1.0.
    #[serde(default = "default_critical_buffer_seconds")]
    pub critical_buffer_seconds: f32,

    /// Read from and populate the local disk cache.
    ///
    /// Default: false.
    #[serde(default)]
    pub use_cache: bool,

    /// Require a matching checksum marker before trusting a cached file.
    ///
    /// Default: true.
    #[serde(default = "default_true")]
    pub verify_cache_integrity: bool,

    /// Cache directory, relative to the host data directory.
    ///
    /// Default: "stream_cache".
    #[serde(default = "default_cache_directory")]
    pub cache_directory: String,

    /// Interval between ticks when driven by `StreamController::run`.
    ///
    /// Default: 20 ms.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Normalisation applied to unsigned 8-bit samples.
    #[serde(default)]
    pub eight_bit_scaling: EightBitScaling,

    /// Retry behaviour for ranged fetches.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Per-request HTTP timeout.
    ///
    /// Default: 30 s.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_chunk_bytes: default_initial_chunk_bytes(),
            chunk_seconds: default_chunk_seconds(),
            min_buffer_seconds: default_min_buffer_seconds(),
            critical_buffer_seconds: default_critical_buffer_seconds(),
            use_cache: false,
            verify_cache_integrity: true,
            cache_directory: default_cache_directory(),
            tick_interval_ms: default_tick_interval_ms(),
            eight_bit_scaling: EightBitScaling::default(),
            retry: RetrySettings::default(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl StreamConfig {
    /// Smaller chunks and thresholds for short clips on fast links.
    pub fn low_latency() -> Self {
        Self {
            chunk_seconds: 2,
            min_buffer_seconds: 2.0,
            critical_buffer_seconds: 0.5,
            tick_interval_ms: 10,
            ..Default::default()
        }
    }

    /// Larger chunks and a deeper buffer for unreliable networks.
    pub fn resilient() -> Self {
        Self {
            chunk_seconds: 10,
            min_buffer_seconds: 10.0,
            critical_buffer_seconds: 2.0,
            retry: RetrySettings {
                max_attempts: 5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Parse a JSON document, filling omitted fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PlaybackError::Config(format!("Invalid stream config: {}", e)))?;
        config.validate().map_err(PlaybackError::Config)?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.initial_chunk_bytes < 44 {
            return Err("initial_chunk_bytes must hold at least a 44-byte header".to_string());
        }

        if self.chunk_seconds == 0 {
            return Err("chunk_seconds must be > 0".to_string());
        }

        if self.min_buffer_seconds.is_nan() || self.min_buffer_seconds <= 0.0 {
            return Err("min_buffer_seconds must be > 0".to_string());
        }

        if self.critical_buffer_seconds < 0.0 {
            return Err("critical_buffer_seconds cannot be negative".to_string());
        }

        if self.critical_buffer_seconds > self.min_buffer_seconds {
            return Err("critical_buffer_seconds cannot exceed min_buffer_seconds".to_string());
        }

        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be > 0".to_string());
        }

        if self.cache_directory.is_empty() {
            return Err("cache_directory cannot be empty".to_string());
        }

        let escapes = Path::new(&self.cache_directory)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(
                "cache_directory must be a relative path inside the data directory".to_string(),
            );
        }

        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".to_string());
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Serializable form of [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            use_exponential_backoff: true,
        }
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_initial_chunk_bytes() -> usize {
    2048
}

fn default_chunk_seconds() -> u32 {
    5
}

fn default_min_buffer_seconds() -> f32 {
    5.0
}

fn default_critical_buffer_seconds() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_cache_directory() -> String {
    "stream_cache".to_string()
}

fn default_tick_interval_ms() -> u64 {
    20
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

// ============================================================================
// Stream Phase
// ============================================================================

/// Lifecycle phase of a stream controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamPhase {
    /// Created, `start` not yet called.
    #[default]
    Idle,
    /// First chunk requested, header not parsed yet.
    FetchingHeader,
    /// Header parsed, samples are being buffered.
    Ready,
    /// The consumer has pulled samples.
    Playing,
    /// Every sample has been delivered.
    Ended,
    /// Header fetch or parse failed; the stream will not recover.
    Failed,
}

impl StreamPhase {
    /// Returns `true` once the header is known and until the stream ends.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Ready | Self::Playing)
    }

    /// Returns `true` if the controller will make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of a stream controller's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStats {
    /// Bytes received from the network.
    pub bytes_downloaded: u64,
    /// Bytes served from the disk cache.
    pub bytes_from_cache: u64,
    /// Ranged requests issued (retries inside the client count once).
    pub http_requests: u64,
    /// Ranged requests that failed after retries.
    pub fetch_failures: u64,
    /// Transitions into underrun.
    pub underrun_count: u32,
    /// Decoded samples accepted into the queues.
    pub values_read: u64,
    /// Samples currently queued (minimum across channel groups).
    pub queued_samples: usize,
    /// Seconds of audio currently queued.
    pub buffered_seconds: f32,
}

impl StreamStats {
    /// Fraction of transferred bytes that came from the cache.
    pub fn cache_hit_ratio(&self) -> f32 {
        let total = self.bytes_downloaded + self.bytes_from_cache;
        if total == 0 {
            return 0.0;
        }
        self.bytes_from_cache as f32 / total as f32
    }
}
