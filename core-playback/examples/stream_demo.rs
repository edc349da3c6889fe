//! # Streaming Demo
//!
//! Streams a remote WAV file, pulling samples the way an audio callback would.
//!
//! Run with:
//! `cargo run --example stream_demo --package core-playback --features http-streaming -- <url>`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use core_playback::{Channel, ChannelRouting, FillOutcome, StreamConfig, StreamController};
use core_runtime::events::{CoreEvent, EventBus};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use tokio_util::sync::CancellationToken;

const BLOCK: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_filter("core_playback=debug,stream_demo=info"),
    )?;

    let url = std::env::args()
        .nth(1)
        .context("usage: stream_demo <wav-url>")?;

    let config = StreamConfig {
        use_cache: true,
        ..StreamConfig::default()
    };

    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let controller =
        StreamController::desktop(url, ChannelRouting::Stereo, config)?.with_event_bus(bus);

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let CoreEvent::Stream(event) = &event {
                tracing::info!(stream = event.stream(), "{:?}", event);
            }
        }
    });

    controller.start().await?;

    let cancel = CancellationToken::new();
    let runner = {
        let controller = controller.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { controller.run(cancel).await })
    };

    let reader = controller.reader(Channel::Stereo)?;
    let mut block = vec![0.0f32; BLOCK];
    let mut peak = 0.0f32;
    let mut blocks = 0u64;

    loop {
        match reader.fill(&mut block) {
            FillOutcome::Filled => {
                blocks += 1;
                peak = block.iter().fold(peak, |acc, v| acc.max(v.abs()));
            }
            FillOutcome::EndOfStream => break,
            FillOutcome::NotReady | FillOutcome::Underrun => {}
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    cancel.cancel();
    runner.await??;

    let stats = controller.stats();
    tracing::info!(
        blocks,
        peak,
        downloaded = stats.bytes_downloaded,
        from_cache = stats.bytes_from_cache,
        underruns = stats.underrun_count,
        "Playback finished"
    );
    Ok(())
}
