//! # Stream Synchroniser
//!
//! Aggregates buffer health across every registered stream and the host media
//! player into a single shortage flag.

use std::sync::Arc;

use bridge_traits::playback::MediaPlayerControl;
use parking_lot::Mutex;
use tracing::debug;

/// Buffer state a stream exposes to the synchroniser.
pub trait BufferHealth: Send + Sync {
    /// Seconds of audio currently queued.
    fn buffered_seconds(&self) -> f32;

    /// Idle (not downloading) with less than the critical threshold queued.
    fn critical_shortage(&self) -> bool;

    /// Header parsed and samples are being buffered.
    fn is_ready(&self) -> bool;
}

/// Polls registered streams and reports whether playback should hold.
#[derive(Default)]
pub struct StreamSynchroniser {
    streams: Vec<Arc<dyn BufferHealth>>,
    media_player: Option<Arc<dyn MediaPlayerControl>>,
    buffer_shortage: Mutex<bool>,
}

impl std::fmt::Debug for StreamSynchroniser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSynchroniser")
            .field("streams", &self.streams.len())
            .field("media_player", &self.media_player.is_some())
            .field("buffer_shortage", &*self.buffer_shortage.lock())
            .finish()
    }
}

impl StreamSynchroniser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the host player's own buffering state.
    pub fn with_media_player(mut self, player: Arc<dyn MediaPlayerControl>) -> Self {
        self.media_player = Some(player);
        self
    }

    pub fn register(&mut self, stream: Arc<dyn BufferHealth>) {
        self.streams.push(stream);
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn media_player(&self) -> Option<&Arc<dyn MediaPlayerControl>> {
        self.media_player.as_ref()
    }

    /// Every registered stream has parsed its header.
    pub fn all_ready(&self) -> bool {
        self.streams.iter().all(|stream| stream.is_ready())
    }

    /// Smallest buffered duration across streams, `None` with no streams.
    pub fn min_buffered_seconds(&self) -> Option<f32> {
        self.streams
            .iter()
            .map(|stream| stream.buffered_seconds())
            .reduce(f32::min)
    }

    /// Recompute the shortage flag from scratch; returns the new value.
    pub fn tick(&self) -> bool {
        let streams_short = self.streams.iter().any(|stream| stream.critical_shortage());
        let player_buffering = self
            .media_player
            .as_ref()
            .is_some_and(|player| player.is_buffering());
        let shortage = streams_short || player_buffering;

        let mut current = self.buffer_shortage.lock();
        if *current != shortage {
            debug!(shortage, streams_short, player_buffering, "Buffer shortage changed");
        }
        *current = shortage;
        shortage
    }

    /// Value computed by the last `tick`.
    pub fn buffer_shortage(&self) -> bool {
        *self.buffer_shortage.lock()
    }
}
