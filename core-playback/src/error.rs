//! # Playback Error Types
//!
//! Error taxonomy for WAV streaming, decoding and caching.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur while streaming and decoding a WAV resource.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Format Errors
    // ========================================================================
    /// `fmt ` or `data` chunk not found within the scanned header window.
    #[error("WAV header not found: {0}")]
    HeaderNotFound(String),

    /// Format tag, bit depth or channel layout cannot be decoded.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    // ========================================================================
    // Network Errors
    // ========================================================================
    /// Ranged fetch failed after retries were exhausted.
    ///
    /// `status` is `None` when no HTTP response was received.
    #[error("Fetch failed (status {status:?}): {message}")]
    FetchFailure {
        status: Option<u16>,
        message: String,
    },

    // ========================================================================
    // Cache Errors
    // ========================================================================
    /// Cache file ended before the requested range was read.
    #[error("Cache read shortfall: expected {expected} bytes, got {actual}")]
    CacheReadShortfall { expected: usize, actual: usize },

    /// Cached file failed checksum verification.
    #[error("Cache integrity check failed: {0}")]
    CacheIntegrity(String),

    // ========================================================================
    // Streaming Errors
    // ========================================================================
    /// Consumer drained the queues before more samples arrived.
    #[error("Buffer underrun")]
    BufferUnderrun,

    /// Operation is not valid in the controller's current phase.
    #[error("Invalid stream state: {0}")]
    InvalidState(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host bridge (HTTP client, file system) reported an error.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Invalid stream configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::FetchFailure { status, .. } => {
                !matches!(status, Some(code) if (400..500).contains(code) && *code != 429)
            }
            PlaybackError::BufferUnderrun | PlaybackError::CacheReadShortfall { .. } => true,
            PlaybackError::Bridge(BridgeError::Timeout(_)) => true,
            _ => false,
        }
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::FetchFailure { .. }
                | PlaybackError::Bridge(BridgeError::Timeout(_))
        )
    }

    /// Returns `true` if this error is related to the WAV format.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::HeaderNotFound(_) | PlaybackError::UnsupportedFormat(_)
        )
    }

    /// Returns `true` if this error came from the disk cache.
    pub fn is_cache_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::CacheReadShortfall { .. } | PlaybackError::CacheIntegrity(_)
        )
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failure_classification() {
        let server = PlaybackError::FetchFailure {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        assert!(server.is_transient());
        assert!(server.is_network_error());
        assert!(!server.is_format_error());

        let missing = PlaybackError::FetchFailure {
            status: Some(404),
            message: "not found".to_string(),
        };
        assert!(!missing.is_transient());

        let throttled = PlaybackError::FetchFailure {
            status: Some(429),
            message: "slow down".to_string(),
        };
        assert!(throttled.is_transient());

        let transport = PlaybackError::FetchFailure {
            status: None,
            message: "connection reset".to_string(),
        };
        assert!(transport.is_transient());
    }

    #[test]
    fn test_format_and_cache_classification() {
        assert!(PlaybackError::HeaderNotFound("no fmt".into()).is_format_error());
        assert!(PlaybackError::UnsupportedFormat("tag 2".into()).is_format_error());

        let shortfall = PlaybackError::CacheReadShortfall {
            expected: 2048,
            actual: 100,
        };
        assert!(shortfall.is_cache_error());
        assert!(shortfall.is_transient());
        assert_eq!(
            shortfall.to_string(),
            "Cache read shortfall: expected 2048 bytes, got 100"
        );
    }

    #[test]
    fn test_bridge_conversion() {
        let err: PlaybackError = BridgeError::Timeout("30s".into()).into();
        assert!(err.is_network_error());
        assert!(err.is_transient());
    }
}
