//! # Stream Controller
//!
//! Drives the progressive download of one WAV resource and feeds decoded
//! samples to pull-based audio callbacks.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │           StreamController (tick)          │
//! │                                            │
//! │  1. Check buffered seconds                 │
//! │  2. Request next range (network or cache)  │
//! │  3. Decode + route into channel queues     │
//! │  4. Append raw bytes to the disk cache     │
//! └─────────────┬──────────────────────────────┘
//!               │ f32 samples
//!               ▼
//! ┌────────────────────────────────────────────┐
//! │       AudioQueueManager (one per stream)   │
//! └─────────────┬──────────────────────────────┘
//!               │ fill(&mut [f32])
//!               ▼
//! ┌────────────────────────────────────────────┐
//! │      ClipReader (audio callback thread)    │
//! └────────────────────────────────────────────┘
//! ```
//!
//! Network fetches run as spawned tasks; at most one is in flight per stream.
//! The audio callback only takes the playback-buffer lock and never waits on
//! I/O.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use core_playback::{ChannelRouting, StreamConfig, StreamController};
//! use tokio_util::sync::CancellationToken;
//! # use bridge_traits::{HttpClient, FileSystemAccess};
//!
//! # async fn demo(http: Arc<dyn HttpClient>, fs: Arc<dyn FileSystemAccess>) -> core_playback::Result<()> {
//! let controller = StreamController::new(
//!     "https://cdn.example.com/forest.wav",
//!     ChannelRouting::Stereo,
//!     StreamConfig::default(),
//!     http,
//!     fs,
//! )?;
//! controller.start().await?;
//!
//! let reader = controller.reader(core_playback::Channel::Stereo)?;
//! let cancel = CancellationToken::new();
//! let driver = controller.clone();
//! tokio::spawn(async move { driver.run(cancel).await });
//!
//! let mut block = [0.0f32; 1024];
//! let _outcome = reader.fill(&mut block);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bridge_traits::http::HttpClient;
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, StreamEvent};
use core_runtime::logging::redact_url;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{cache_file_name, CacheMode, CacheSession};
use crate::config::{StreamConfig, StreamPhase, StreamStats};
use crate::decoder::PcmDecoder;
use crate::error::{PlaybackError, Result};
use crate::fetcher::RangeFetcher;
use crate::queue::{AudioQueueManager, Channel};
use crate::sync::BufferHealth;
use crate::wav::{parse_header, WavFormat};

// ============================================================================
// Public Types
// ============================================================================

/// How decoded samples are split across channel queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRouting {
    /// Any channel count, one interleaved queue.
    Stereo,
    /// Exactly four channels, split into 1/2 and 3/4 queues.
    Ambisonic,
}

impl ChannelRouting {
    /// Queues a reader may attach to under this routing.
    pub fn channels(self) -> &'static [Channel] {
        match self {
            ChannelRouting::Stereo => &[Channel::Stereo],
            ChannelRouting::Ambisonic => &[Channel::Ambisonics12, Channel::Ambisonics34],
        }
    }
}

/// One playable clip exposed to the host audio engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipSpec {
    pub name: String,
    /// Queue a reader for this clip drains.
    pub channel: Channel,
    pub channels: u16,
    /// Frames (samples per channel) in the clip.
    pub frames: u64,
    pub sample_rate: u32,
}

/// Clip layout derived from the parsed header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioInformation {
    pub format: WavFormat,
    pub total_samples: u64,
    pub clips: Vec<ClipSpec>,
}

impl AudioInformation {
    fn new(format: WavFormat, routing: ChannelRouting, name: &str) -> Self {
        let total_samples = format.total_samples();
        let clips = match routing {
            ChannelRouting::Stereo => vec![ClipSpec {
                name: name.to_string(),
                channel: Channel::Stereo,
                channels: format.channels,
                frames: format.total_frames(),
                sample_rate: format.sample_rate,
            }],
            ChannelRouting::Ambisonic => {
                let frames = total_samples / 4;
                vec![
                    ClipSpec {
                        name: "Channel12".to_string(),
                        channel: Channel::Ambisonics12,
                        channels: 2,
                        frames,
                        sample_rate: format.sample_rate,
                    },
                    ClipSpec {
                        name: "Channel34".to_string(),
                        channel: Channel::Ambisonics34,
                        channels: 2,
                        frames,
                        sample_rate: format.sample_rate,
                    },
                ]
            }
        };

        Self {
            format,
            total_samples,
            clips,
        }
    }
}

/// Result of a pull-callback fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Too few samples decoded yet; the buffer was left untouched.
    NotReady,
    /// Every slot received a sample.
    Filled,
    /// Queue ran dry before the stream finished; missing slots are silence.
    Underrun,
    /// Every sample has been delivered; missing slots are silence.
    EndOfStream,
}

// ============================================================================
// Internal State
// ============================================================================

#[derive(Debug, Default)]
struct StreamState {
    phase: StreamPhase,
    started: bool,
    downloading: bool,
    download_position: u64,
    format: Option<WavFormat>,
    info: Option<AudioInformation>,
    decoder: Option<PcmDecoder>,
    file_length: u64,
    shortage_reported: bool,
    fetch_task: Option<JoinHandle<()>>,
    bytes_downloaded: u64,
    bytes_from_cache: u64,
    http_requests: u64,
    fetch_failures: u64,
}

/// Everything the audio callback touches.
#[derive(Debug)]
struct PlaybackBuffer {
    queues: AudioQueueManager,
    started: bool,
    values_read: u64,
    total_samples: u64,
    bytes_per_sample: usize,
    effective_byte_rate: u32,
    consumed: bool,
    stalled: bool,
    ended: bool,
    underrun_count: u32,
}

impl PlaybackBuffer {
    fn new() -> Self {
        Self {
            queues: AudioQueueManager::stereo(),
            started: false,
            values_read: 0,
            total_samples: 0,
            bytes_per_sample: 0,
            effective_byte_rate: 0,
            consumed: false,
            stalled: false,
            ended: false,
            underrun_count: 0,
        }
    }

    fn buffered_seconds(&self) -> f32 {
        if self.effective_byte_rate == 0 {
            return 0.0;
        }
        (self.queues.count() * self.bytes_per_sample) as f32 / self.effective_byte_rate as f32
    }
}

struct Shared {
    url: String,
    key: String,
    routing: ChannelRouting,
    config: StreamConfig,
    fetcher: RangeFetcher,
    fs: Arc<dyn FileSystemAccess>,
    events: Option<Arc<EventBus>>,
    /// Live `StreamController` handles.
    handles: AtomicUsize,
    state: Mutex<StreamState>,
    playback: Mutex<PlaybackBuffer>,
    cache: tokio::sync::Mutex<CacheSession>,
}

// ============================================================================
// StreamController
// ============================================================================

/// Progressive downloader and decoder for one WAV URL.
///
/// Cloning is cheap and yields a handle to the same stream. Dropping the
/// last handle aborts any in-flight fetch and releases the cache files.
pub struct StreamController {
    shared: Arc<Shared>,
}

impl Clone for StreamController {
    fn clone(&self) -> Self {
        self.shared.handles.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("url", &redact_url(&self.shared.url))
            .field("routing", &self.shared.routing)
            .field("phase", &self.phase())
            .finish()
    }
}

impl StreamController {
    /// Create a controller; nothing is fetched until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Config` if `config` fails validation.
    pub fn new(
        url: impl Into<String>,
        routing: ChannelRouting,
        config: StreamConfig,
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::Config)?;

        let url = url.into();
        let fetcher = RangeFetcher::new(
            http,
            url.clone(),
            config.retry.to_policy(),
            config.http_timeout(),
        );

        Ok(Self {
            shared: Arc::new(Shared {
                key: cache_file_name(&url),
                cache: tokio::sync::Mutex::new(CacheSession::disabled(Arc::clone(&fs))),
                url,
                routing,
                config,
                fetcher,
                fs,
                events: None,
                handles: AtomicUsize::new(1),
                state: Mutex::new(StreamState::default()),
                playback: Mutex::new(PlaybackBuffer::new()),
            }),
        })
    }

    /// Create a controller from the bridges in a [`CoreConfig`].
    ///
    /// The disk cache is only used when both `config.use_cache` and the core
    /// `enable_disk_cache` feature are set.
    pub fn from_core(
        url: impl Into<String>,
        routing: ChannelRouting,
        mut config: StreamConfig,
        core: &CoreConfig,
    ) -> Result<Self> {
        config.use_cache = config.use_cache && core.features.enable_disk_cache;
        Self::new(
            url,
            routing,
            config,
            Arc::clone(&core.http_client),
            Arc::clone(&core.file_system),
        )
    }

    /// Create a controller backed by reqwest and the local file system.
    #[cfg(feature = "http-streaming")]
    pub fn desktop(
        url: impl Into<String>,
        routing: ChannelRouting,
        config: StreamConfig,
    ) -> Result<Self> {
        let http = bridge_desktop::ReqwestHttpClient::with_timeout(config.http_timeout());
        Self::new(
            url,
            routing,
            config,
            Arc::new(http),
            Arc::new(bridge_desktop::TokioFileSystem::new()),
        )
    }

    /// Publish stream events on `bus`. Must be called before `start`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.events = Some(bus);
        } else {
            warn!("Event bus attached after controller was shared; ignoring");
        }
        self
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Cache key used in events and cache file names.
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn routing(&self) -> ChannelRouting {
        self.shared.routing
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> StreamPhase {
        let phase = self.shared.state.lock().phase;
        let playback = self.shared.playback.lock();
        match phase {
            StreamPhase::Ready | StreamPhase::Playing if playback.ended => StreamPhase::Ended,
            StreamPhase::Ready if playback.consumed => StreamPhase::Playing,
            other => other,
        }
    }

    pub fn is_started(&self) -> bool {
        self.shared.state.lock().started
    }

    pub fn is_downloading(&self) -> bool {
        self.shared.state.lock().downloading
    }

    /// Next byte offset to request.
    pub fn download_position(&self) -> u64 {
        self.shared.state.lock().download_position
    }

    /// Bytes from the start of the resource to the end of the payload.
    pub fn file_length(&self) -> u64 {
        self.shared.state.lock().file_length
    }

    pub fn format(&self) -> Option<WavFormat> {
        self.shared.state.lock().format.clone()
    }

    pub fn audio_information(&self) -> Option<AudioInformation> {
        self.shared.state.lock().info.clone()
    }

    /// Decoded samples accepted into the queues so far.
    pub fn values_read(&self) -> u64 {
        self.shared.playback.lock().values_read
    }

    /// Samples available to every reader.
    pub fn queued_samples(&self) -> usize {
        self.shared.playback.lock().queues.count()
    }

    pub async fn cache_mode(&self) -> CacheMode {
        self.shared.cache.lock().await.mode()
    }

    pub fn stats(&self) -> StreamStats {
        let (bytes_downloaded, bytes_from_cache, http_requests, fetch_failures) = {
            let state = self.shared.state.lock();
            (
                state.bytes_downloaded,
                state.bytes_from_cache,
                state.http_requests,
                state.fetch_failures,
            )
        };
        let playback = self.shared.playback.lock();
        StreamStats {
            bytes_downloaded,
            bytes_from_cache,
            http_requests,
            fetch_failures,
            underrun_count: playback.underrun_count,
            values_read: playback.values_read,
            queued_samples: playback.queues.count(),
            buffered_seconds: playback.buffered_seconds(),
        }
    }

    /// Pull-callback handle for one queue.
    ///
    /// For ambisonic routing use `Ambisonics12` and `Ambisonics34`.
    ///
    /// # Errors
    ///
    /// `InvalidState` if `channel` is not one of the routing's queues.
    pub fn reader(&self, channel: Channel) -> Result<ClipReader> {
        let routing = self.shared.routing;
        if !routing.channels().contains(&channel) {
            warn!(?channel, ?routing, "Reader requested for a queue the stream does not fill");
            return Err(PlaybackError::InvalidState(format!(
                "{:?} reader on a {:?} stream",
                channel, routing
            )));
        }

        Ok(ClipReader {
            shared: Arc::clone(&self.shared),
            channel,
        })
    }

    /// Fetch the header chunk, parse it and ingest its payload.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if already started
    /// - `FetchFailure` if the first chunk cannot be downloaded
    /// - `HeaderNotFound` / `UnsupportedFormat` if the header is unusable
    #[instrument(skip(self), fields(stream = %self.shared.key))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.phase != StreamPhase::Idle {
                return Err(PlaybackError::InvalidState(format!(
                    "start called in phase {:?}",
                    state.phase
                )));
            }
            state.phase = StreamPhase::FetchingHeader;
        }

        let result = self.shared.start_inner().await;
        if let Err(err) = &result {
            error!(error = %err, "Stream failed to start");
            self.shared.state.lock().phase = StreamPhase::Failed;
        }
        result
    }

    /// Request the next range if the buffer is running low.
    ///
    /// Cache reads happen inline; network fetches are spawned and this
    /// returns immediately.
    pub async fn tick(&self) -> Result<()> {
        let result = Shared::tick(&self.shared).await;
        self.shared.refresh_shortage();
        result
    }

    /// Drive `tick` on the configured interval until `cancel` fires.
    #[instrument(skip(self, cancel), fields(stream = %self.shared.key))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.shared.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Stream tick loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stream tick loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "Tick failed");
                    }
                    if self.shared.state.lock().phase == StreamPhase::Failed {
                        warn!("Stream failed, leaving tick loop");
                        break;
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Abort any in-flight fetch and close the cache.
    #[instrument(skip(self), fields(stream = %self.shared.key))]
    pub async fn shutdown(&self) -> Result<()> {
        let task = {
            let mut state = self.shared.state.lock();
            state.downloading = false;
            state.fetch_task.take()
        };
        if let Some(task) = task {
            task.abort();
            debug!("Aborted in-flight fetch");
        }

        let mut cache = self.shared.cache.lock().await;
        if let Err(err) = cache.close().await {
            warn!(error = %err, "Failed to close cache cleanly");
        }
        Ok(())
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        // Readers and fetch tasks also hold the shared state; only the last
        // controller handle tears down.
        if self.shared.handles.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let task = {
            let mut state = self.shared.state.lock();
            state.downloading = false;
            state.fetch_task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        if let Ok(mut cache) = self.shared.cache.try_lock() {
            cache.release();
        }
    }
}

impl BufferHealth for StreamController {
    fn buffered_seconds(&self) -> f32 {
        self.shared.playback.lock().buffered_seconds()
    }

    fn critical_shortage(&self) -> bool {
        self.shared.critical_shortage()
    }

    fn is_ready(&self) -> bool {
        self.shared.state.lock().started
    }
}

// ============================================================================
// ClipReader
// ============================================================================

/// Pull-callback side of a stream, safe to call from the audio thread.
#[derive(Clone)]
pub struct ClipReader {
    shared: Arc<Shared>,
    channel: Channel,
}

impl std::fmt::Debug for ClipReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipReader")
            .field("stream", &self.shared.key)
            .field("channel", &self.channel)
            .finish()
    }
}

impl ClipReader {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Fill `out` with the next samples of this reader's queue.
    ///
    /// Returns `NotReady` without touching `out` while fewer than
    /// `out.len()` samples have been decoded and more are expected.
    pub fn fill(&self, out: &mut [f32]) -> FillOutcome {
        let (outcome, event) = {
            let mut playback = self.shared.playback.lock();

            let complete = playback.values_read >= playback.total_samples;
            if !playback.started || (playback.values_read < out.len() as u64 && !complete) {
                return FillOutcome::NotReady;
            }

            let mut dry = false;
            for slot in out.iter_mut() {
                match playback.queues.dequeue(self.channel) {
                    Some(value) => *slot = value,
                    None => {
                        *slot = 0.0;
                        dry = true;
                    }
                }
            }
            playback.consumed = true;

            if !dry {
                (FillOutcome::Filled, None)
            } else if complete {
                let first = !playback.ended;
                playback.ended = true;
                (FillOutcome::EndOfStream, first.then_some(FillOutcome::EndOfStream))
            } else {
                let first = !playback.stalled;
                if first {
                    playback.stalled = true;
                    playback.underrun_count += 1;
                }
                (FillOutcome::Underrun, first.then_some(FillOutcome::Underrun))
            }
        };

        match event {
            Some(FillOutcome::EndOfStream) => {
                self.shared.emit(StreamEvent::EndOfStream {
                    stream: self.shared.key.clone(),
                });
            }
            Some(FillOutcome::Underrun) => {
                self.shared.emit(StreamEvent::Underrun {
                    stream: self.shared.key.clone(),
                });
            }
            _ => {}
        }

        outcome
    }

    /// Like [`fill`](Self::fill) but reports underrun as an error.
    pub fn try_fill(&self, out: &mut [f32]) -> Result<FillOutcome> {
        match self.fill(out) {
            FillOutcome::Underrun => Err(PlaybackError::BufferUnderrun),
            other => Ok(other),
        }
    }
}

// ============================================================================
// Shared Internals
// ============================================================================

impl Shared {
    fn emit(&self, event: StreamEvent) {
        if let Some(bus) = &self.events {
            // No subscribers is not an error.
            let _ = bus.emit(CoreEvent::Stream(event));
        }
    }

    async fn start_inner(&self) -> Result<()> {
        let mut first: Option<Bytes> = None;

        if self.config.use_cache {
            self.open_cache().await;
            first = self.read_header_from_cache().await;
        }

        let from_cache = first.is_some();
        self.emit(StreamEvent::Started {
            stream: self.key.clone(),
            from_cache,
        });

        let first = match first {
            Some(bytes) => {
                self.state.lock().bytes_from_cache += bytes.len() as u64;
                bytes
            }
            None => {
                let want = self.config.initial_chunk_bytes as u64;
                self.state.lock().http_requests += 1;
                let bytes = self.fetcher.fetch(0, want).await?;
                self.state.lock().bytes_downloaded += bytes.len() as u64;
                bytes
            }
        };

        let format = parse_header(&first).into_format()?;
        if self.routing == ChannelRouting::Ambisonic && format.channels != 4 {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "ambisonic routing needs 4 channels, header has {}",
                format.channels
            )));
        }

        self.accept_format(&format, first.len() as u64);

        info!(
            url = %redact_url(&self.url),
            channels = format.channels,
            sample_rate = format.sample_rate,
            bit_depth = format.bit_depth,
            data_start = format.data_start,
            data_length = format.data_length,
            from_cache,
            "WAV header parsed"
        );
        self.emit(StreamEvent::HeaderParsed {
            stream: self.key.clone(),
            channels: format.channels,
            sample_rate: format.sample_rate,
            bit_depth: format.bit_depth,
            total_samples: format.total_samples(),
        });

        self.ingest(0, first).await
    }

    async fn open_cache(&self) {
        match CacheSession::open(
            Arc::clone(&self.fs),
            &self.config.cache_directory,
            &self.url,
            self.config.verify_cache_integrity,
        )
        .await
        {
            Ok(opened) => {
                if let Some(reason) = opened.discarded {
                    self.emit(StreamEvent::CacheDiscarded {
                        stream: self.key.clone(),
                        reason,
                    });
                }
                *self.cache.lock().await = opened.session;
            }
            Err(err) => {
                warn!(error = %err, "Disk cache unavailable, streaming from network only");
            }
        }
    }

    /// Header chunk from a cached copy, or `None` to use the network.
    async fn read_header_from_cache(&self) -> Option<Bytes> {
        let mut cache = self.cache.lock().await;
        if cache.mode() != CacheMode::Read {
            return None;
        }

        let size = cache.file_size().await.unwrap_or(0);
        let want = match usize::try_from(size) {
            Ok(size) if size > 0 => self.config.initial_chunk_bytes.min(size),
            _ => self.config.initial_chunk_bytes,
        };

        let read = cache.read_next(want).await;
        let failure = match read {
            Ok(bytes) => {
                let header = parse_header(&bytes);
                match header.format() {
                    // A file shorter than the header chunk is only whole if
                    // the resource itself is that short.
                    Some(format)
                        if bytes.len() < self.config.initial_chunk_bytes
                            && (bytes.len() as u64) < format.file_length() =>
                    {
                        PlaybackError::CacheReadShortfall {
                            expected: self.config.initial_chunk_bytes,
                            actual: bytes.len(),
                        }
                    }
                    Some(_) => return Some(bytes),
                    None => PlaybackError::HeaderNotFound(
                        header
                            .failure_reason()
                            .map(|reason| reason.to_string())
                            .unwrap_or_default(),
                    ),
                }
            }
            Err(err) => err,
        };

        warn!(error = %failure, "Cached header unusable, refetching from network");
        cache.restart_write().await;
        drop(cache);

        self.emit(StreamEvent::CacheDiscarded {
            stream: self.key.clone(),
            reason: failure.to_string(),
        });
        None
    }

    fn accept_format(&self, format: &WavFormat, received: u64) {
        let total_samples = format.total_samples();
        let info = AudioInformation::new(format.clone(), self.routing, &self.key);

        {
            let mut playback = self.playback.lock();
            let queues = match self.routing {
                ChannelRouting::Stereo => AudioQueueManager::stereo(),
                ChannelRouting::Ambisonic => AudioQueueManager::ambisonic(),
            };
            playback.queues = queues.with_limit(total_samples);
            playback.total_samples = total_samples;
            playback.bytes_per_sample = format.bytes_per_sample();
            playback.effective_byte_rate = match self.routing {
                ChannelRouting::Stereo => format.byte_rate,
                ChannelRouting::Ambisonic => format.byte_rate / 2,
            };
            playback.started = true;
        }

        let mut state = self.state.lock();
        state.decoder = Some(PcmDecoder::new(format, self.config.eight_bit_scaling));
        state.file_length = format.file_length();
        state.download_position = received;
        state.format = Some(format.clone());
        state.info = Some(info);
        state.started = true;
        state.phase = StreamPhase::Ready;
    }

    /// Cache, decode and route a chunk that starts at byte `start`.
    async fn ingest(&self, start: u64, chunk: Bytes) -> Result<()> {
        self.append_to_cache(&chunk).await;

        let samples = {
            let mut state = self.state.lock();
            let data_start = state
                .format
                .as_ref()
                .map(|format| format.data_start as u64)
                .unwrap_or(0);
            let file_length = state.file_length;
            let len = chunk.len() as u64;

            let from = data_start.saturating_sub(start).min(len) as usize;
            let to = file_length.saturating_sub(start).min(len) as usize;
            if from >= to {
                return Ok(());
            }

            let decoder = state
                .decoder
                .as_mut()
                .ok_or_else(|| PlaybackError::InvalidState("chunk before header".to_string()))?;
            decoder.push(&chunk[from..to])?
        };

        let accepted = {
            let mut playback = self.playback.lock();
            let accepted = playback.queues.route_interleaved(&samples);
            playback.values_read += accepted as u64;
            if accepted > 0 {
                playback.stalled = false;
            }
            accepted
        };

        debug!(
            start,
            end = start + chunk.len() as u64,
            samples = accepted,
            "Chunk ingested"
        );
        self.emit(StreamEvent::ChunkIngested {
            stream: self.key.clone(),
            start,
            end: start + chunk.len() as u64,
            samples: accepted as u64,
        });
        Ok(())
    }

    async fn append_to_cache(&self, chunk: &[u8]) {
        let mut cache = self.cache.lock().await;
        if cache.mode() != CacheMode::Write {
            return;
        }

        let file_length = self.state.lock().file_length;
        let appended = cache.append(chunk).await;
        let event = match appended {
            Ok(cached) if cached >= file_length => {
                let completed = cache.complete().await;
                match completed {
                    Ok(checksum) => Some(StreamEvent::CacheCompleted {
                        stream: self.key.clone(),
                        checksum,
                    }),
                    Err(err) => {
                        warn!(error = %err, "Failed to finalise cache");
                        cache.abandon().await;
                        Some(StreamEvent::CacheDiscarded {
                            stream: self.key.clone(),
                            reason: err.to_string(),
                        })
                    }
                }
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "Cache write failed, caching disabled for this stream");
                cache.abandon().await;
                Some(StreamEvent::CacheDiscarded {
                    stream: self.key.clone(),
                    reason: err.to_string(),
                })
            }
        };
        drop(cache);

        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// Claim the next range if the buffer needs topping up.
    fn claim_next_range(&self) -> Option<(u64, u64)> {
        let buffered = self.playback.lock().buffered_seconds();

        let mut state = self.state.lock();
        if !state.started || state.downloading || state.phase.is_terminal() {
            return None;
        }
        if buffered >= self.config.min_buffer_seconds || state.download_position >= state.file_length {
            return None;
        }

        let byte_rate = state.format.as_ref().map(|f| f.byte_rate).unwrap_or(0);
        let wanted = u64::from(self.config.chunk_seconds) * u64::from(byte_rate);
        let chunk = wanted.min(state.file_length - state.download_position);
        if chunk == 0 {
            return None;
        }

        state.downloading = true;
        let start = state.download_position;
        Some((start, start + chunk))
    }

    async fn tick(shared: &Arc<Shared>) -> Result<()> {
        let Some((start, end)) = shared.claim_next_range() else {
            return Ok(());
        };

        let mut cache = shared.cache.lock().await;
        if cache.mode() == CacheMode::Read {
            let len = (end - start) as usize;
            let read = cache.read_next(len).await;
            match read {
                Ok(bytes) => {
                    drop(cache);
                    {
                        let mut state = shared.state.lock();
                        state.download_position = end;
                        state.bytes_from_cache += bytes.len() as u64;
                    }
                    let result = shared.ingest(start, bytes).await;
                    shared.state.lock().downloading = false;
                    return result;
                }
                Err(err) => {
                    warn!(start, end, error = %err, "Cache read failed, switching to network");
                    cache.abandon().await;
                    drop(cache);
                    shared.state.lock().downloading = false;
                    shared.emit(StreamEvent::CacheDiscarded {
                        stream: shared.key.clone(),
                        reason: err.to_string(),
                    });
                    return Ok(());
                }
            }
        }
        drop(cache);

        let mut state = shared.state.lock();
        state.download_position = end;
        state.http_requests += 1;
        state.fetch_task = Some(Self::spawn_fetch(shared, start, end));
        debug!(start, end, "Range fetch spawned");
        Ok(())
    }

    fn spawn_fetch(shared: &Arc<Shared>, start: u64, end: u64) -> JoinHandle<()> {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            let result = shared.fetcher.fetch(start, end).await;
            shared.finish_fetch(start, end, result).await;
        })
    }

    async fn finish_fetch(&self, start: u64, end: u64, result: Result<Bytes>) {
        let result = result.and_then(|bytes| {
            if bytes.is_empty() {
                Err(PlaybackError::FetchFailure {
                    status: None,
                    message: "empty response body".to_string(),
                })
            } else {
                Ok(bytes)
            }
        });

        match result {
            Ok(bytes) => {
                {
                    let mut state = self.state.lock();
                    // Servers may return less than requested near the end.
                    state.download_position = start + bytes.len() as u64;
                    state.bytes_downloaded += bytes.len() as u64;
                }
                if let Err(err) = self.ingest(start, bytes).await {
                    error!(start, end, error = %err, "Failed to ingest chunk");
                    self.state.lock().phase = StreamPhase::Failed;
                }
            }
            Err(err) => {
                let recoverable = err.is_transient();
                {
                    let mut state = self.state.lock();
                    state.download_position = start;
                    state.fetch_failures += 1;
                    if !recoverable {
                        state.phase = StreamPhase::Failed;
                    }
                }
                warn!(start, end, error = %err, recoverable, "Range fetch failed");
                self.emit(StreamEvent::FetchFailed {
                    stream: self.key.clone(),
                    start,
                    end,
                    message: err.to_string(),
                    recoverable,
                });
            }
        }

        let mut state = self.state.lock();
        state.downloading = false;
        state.fetch_task = None;
    }

    fn critical_shortage(&self) -> bool {
        let (idle, pending) = {
            let state = self.state.lock();
            (
                state.started && !state.downloading,
                state.download_position < state.file_length,
            )
        };
        if !idle || !pending {
            return false;
        }
        self.playback.lock().buffered_seconds() < self.config.critical_buffer_seconds
    }

    fn refresh_shortage(&self) {
        let critical = self.critical_shortage();
        let changed = {
            let mut state = self.state.lock();
            let changed = state.shortage_reported != critical;
            state.shortage_reported = critical;
            changed
        };
        if changed {
            debug!(critical, "Buffer shortage changed");
            self.emit(StreamEvent::ShortageChanged {
                stream: self.key.clone(),
                critical,
            });
        }
    }
}
