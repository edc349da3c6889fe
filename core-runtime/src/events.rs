//! # Event Bus System
//!
//! Broadcasts typed stream and transport events using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Stream controllers emit progress (header parsed, chunks ingested, cache
//! completion, fetch failures, shortage transitions) and the playback
//! coordinator emits transport changes. Hosts subscribe to drive UI or
//! telemetry without polling the controllers.
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ StreamController ├────────>│           ├────────────>│ Subscriber │
//! └──────────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────────┐  emit   │           │  subscribe  ┌────────────┐
//! │ Coordinator      ├────────>│           ├────────────>│ Subscriber │
//! └──────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, StreamEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Stream(StreamEvent::EndOfStream {
//!         stream: "forest".to_string(),
//!     }))
//!     .ok();
//!
//! let received = stream.recv().await.unwrap();
//! assert_eq!(received.description(), "Stream ended");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving newer events.
//! - **`RecvError::Closed`**: All senders have been dropped.
//!
//! `ChunkIngested` fires once per chunk, so subscribers that only care about
//! transitions should filter with [`EventStream::filter`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Events from a single stream controller
    Stream(StreamEvent),
    /// Events from the playback coordinator
    Transport(TransportEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Stream(e) => e.description(),
            CoreEvent::Transport(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Stream(StreamEvent::FetchFailed {
                recoverable: false,
                ..
            }) => EventSeverity::Error,
            CoreEvent::Stream(StreamEvent::FetchFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Stream(StreamEvent::CacheDiscarded { .. }) => EventSeverity::Warning,
            CoreEvent::Stream(StreamEvent::Underrun { .. }) => EventSeverity::Warning,
            CoreEvent::Stream(StreamEvent::ShortageChanged { critical: true, .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Stream(StreamEvent::HeaderParsed { .. }) => EventSeverity::Info,
            CoreEvent::Stream(StreamEvent::CacheCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Stream(StreamEvent::EndOfStream { .. }) => EventSeverity::Info,
            CoreEvent::Transport(TransportEvent::Paused { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Stream Events
// ============================================================================

/// Events emitted by a stream controller.
///
/// `stream` is the cache key of the resource, never the full URL, so signed
/// query strings stay out of event payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StreamEvent {
    /// First chunk requested.
    Started {
        stream: String,
        /// Header chunk is served from the disk cache.
        from_cache: bool,
    },
    /// WAV header parsed and format accepted.
    HeaderParsed {
        stream: String,
        channels: u16,
        sample_rate: u32,
        bit_depth: u16,
        total_samples: u64,
    },
    /// A byte range was decoded into the channel queues.
    ChunkIngested {
        stream: String,
        start: u64,
        end: u64,
        samples: u64,
    },
    /// Whole file written to the disk cache and checksum marker created.
    CacheCompleted { stream: String, checksum: String },
    /// Cached file was unusable and has been deleted.
    CacheDiscarded { stream: String, reason: String },
    /// Ranged fetch failed after retries.
    FetchFailed {
        stream: String,
        start: u64,
        end: u64,
        message: String,
        /// Range will be requested again on a later tick.
        recoverable: bool,
    },
    /// Critical buffer shortage raised or cleared.
    ShortageChanged { stream: String, critical: bool },
    /// Audio thread drained the queues before the stream finished.
    Underrun { stream: String },
    /// Every sample has been delivered.
    EndOfStream { stream: String },
}

impl StreamEvent {
    fn description(&self) -> &str {
        match self {
            StreamEvent::Started { .. } => "Stream started",
            StreamEvent::HeaderParsed { .. } => "WAV header parsed",
            StreamEvent::ChunkIngested { .. } => "Chunk ingested",
            StreamEvent::CacheCompleted { .. } => "Cache completed",
            StreamEvent::CacheDiscarded { .. } => "Cache discarded",
            StreamEvent::FetchFailed { .. } => "Fetch failed",
            StreamEvent::ShortageChanged { .. } => "Buffer shortage changed",
            StreamEvent::Underrun { .. } => "Buffer underrun",
            StreamEvent::EndOfStream { .. } => "Stream ended",
        }
    }

    /// Cache key of the stream that emitted this event.
    pub fn stream(&self) -> &str {
        match self {
            StreamEvent::Started { stream, .. }
            | StreamEvent::HeaderParsed { stream, .. }
            | StreamEvent::ChunkIngested { stream, .. }
            | StreamEvent::CacheCompleted { stream, .. }
            | StreamEvent::CacheDiscarded { stream, .. }
            | StreamEvent::FetchFailed { stream, .. }
            | StreamEvent::ShortageChanged { stream, .. }
            | StreamEvent::Underrun { stream }
            | StreamEvent::EndOfStream { stream } => stream,
        }
    }
}

// ============================================================================
// Transport Events
// ============================================================================

/// Events emitted by the playback coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TransportEvent {
    /// Host media player started after the audio prebuffer filled.
    MediaStarted,
    /// Audio targets started once the first frame was ready.
    AudioStarted,
    /// Everything paused for a buffer shortage.
    Paused { reason: String },
    /// Shortage cleared and playback resumed.
    Resumed,
}

impl TransportEvent {
    fn description(&self) -> &str {
        match self {
            TransportEvent::MediaStarted => "Media player started",
            TransportEvent::AudioStarted => "Audio started",
            TransportEvent::Paused { .. } => "Playback paused",
            TransportEvent::Resumed => "Playback resumed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream, StreamEvent};
///
/// let event_bus = EventBus::new(100);
/// let shortages = EventStream::new(event_bus.subscribe()).filter(|event| {
///     matches!(event, CoreEvent::Stream(StreamEvent::ShortageChanged { .. }))
/// });
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match the predicate will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
