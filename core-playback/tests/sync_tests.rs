//! Synchroniser and coordinator over live stream controllers.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use core_playback::{
    BufferHealth, ChannelRouting, CoordinatorConfig, PlaybackCoordinator, PlaybackTarget,
    StreamController, StreamSynchroniser, TransportCommand, TransportStage,
};

use common::*;

const RATE: u32 = 8000;
const SAMPLES: usize = 16_000;

fn controller(temp: &TempDir, server: Arc<RangeServer>) -> StreamController {
    StreamController::new(
        URL,
        ChannelRouting::Stereo,
        test_config(),
        server,
        temp.file_system(),
    )
    .unwrap()
}

#[derive(Default)]
struct Speaker {
    playing: AtomicBool,
}

impl PlaybackTarget for Speaker {
    fn play(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }
    fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_shortage_tracks_stream_buffers() {
    let temp = TempDir::new();
    let stream = controller(&temp, RangeServer::new(pcm16_wav(1, RATE, SAMPLES)));

    let mut sync = StreamSynchroniser::new();
    sync.register(Arc::new(stream.clone()));

    // Not started: nothing to wait for yet.
    assert!(!sync.all_ready());
    assert!(!sync.tick());

    // Header chunk alone is 1002 samples, 0.125 s at 16000 B/s.
    stream.start().await.unwrap();
    assert!(sync.all_ready());
    assert!(stream.critical_shortage());
    assert!(sync.tick());

    download_all(&stream).await;
    assert!(!sync.tick());
    assert_eq!(sync.min_buffered_seconds(), Some(2.0));
}

#[tokio::test]
async fn test_slowest_stream_sets_min_buffer() {
    let temp = TempDir::new();
    let long = controller(&temp, RangeServer::new(pcm16_wav(1, RATE, SAMPLES)));
    let short = controller(&temp, RangeServer::new(pcm16_wav(1, RATE, 4000)));

    let mut sync = StreamSynchroniser::new();
    sync.register(Arc::new(long.clone()));
    sync.register(Arc::new(short.clone()));

    long.start().await.unwrap();
    assert!(!sync.all_ready());
    short.start().await.unwrap();
    assert!(sync.all_ready());

    download_all(&long).await;
    download_all(&short).await;
    assert_eq!(sync.min_buffered_seconds(), Some(0.5));
    assert!(!sync.tick());
}

#[tokio::test]
async fn test_coordinator_starts_after_prebuffer() {
    let temp = TempDir::new();
    let stream = controller(&temp, RangeServer::new(pcm16_wav(1, RATE, SAMPLES)));

    let mut sync = StreamSynchroniser::new();
    sync.register(Arc::new(stream.clone()));

    let speaker = Arc::new(Speaker::default());
    let mut coordinator = PlaybackCoordinator::new(
        Arc::new(sync),
        CoordinatorConfig {
            start_buffer_seconds: 1.5,
        },
    );
    coordinator.add_target(speaker.clone());

    stream.start().await.unwrap();
    assert!(coordinator.tick().is_empty());
    assert_eq!(coordinator.stage(), TransportStage::WaitingForBuffer);

    download_all(&stream).await;
    assert_eq!(coordinator.tick(), vec![TransportCommand::StartMedia]);
    assert_eq!(coordinator.tick(), vec![TransportCommand::StartAudio]);
    assert!(speaker.is_playing());
    assert_eq!(coordinator.stage(), TransportStage::Running);
}
