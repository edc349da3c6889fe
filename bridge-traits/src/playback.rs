//! Playback bridge traits.
//!
//! The streaming core never renders audio or video itself. The host owns the
//! media player (typically a video surface the audio must stay aligned with)
//! and exposes a small polling surface so the core can gate and pause it.

/// Host media player polled by the stream synchroniser and transport.
///
/// All methods are expected to be cheap, non-blocking state queries or
/// fire-and-forget commands. They are invoked from the core's tick loop.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::playback::MediaPlayerControl;
///
/// fn hold_video(player: &dyn MediaPlayerControl) {
///     if player.is_playing() {
///         player.pause();
///     }
/// }
/// ```
pub trait MediaPlayerControl: Send + Sync {
    /// Player is stalled waiting on its own network buffer.
    fn is_buffering(&self) -> bool;

    /// Player is currently advancing.
    fn is_playing(&self) -> bool;

    /// First video frame has been decoded and presented.
    fn first_frame_ready(&self) -> bool;

    /// Start or resume playback.
    fn play(&self);

    /// Pause playback, keeping the current position.
    fn pause(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlagPlayer {
        playing: AtomicBool,
    }

    impl MediaPlayerControl for FlagPlayer {
        fn is_buffering(&self) -> bool {
            false
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        fn first_frame_ready(&self) -> bool {
            true
        }

        fn play(&self) {
            self.playing.store(true, Ordering::SeqCst);
        }

        fn pause(&self) {
            self.playing.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_player_is_object_safe() {
        let player: Box<dyn MediaPlayerControl> = Box::new(FlagPlayer::default());
        assert!(!player.is_playing());
        player.play();
        assert!(player.is_playing());
        player.pause();
        assert!(!player.is_playing());
    }
}
