//! # Transport Coordination
//!
//! Starts and pauses audio targets and the host media player together based
//! on the synchroniser's shortage flag.
//!
//! ## Start Sequence
//!
//! 1. Wait until every stream has parsed its header and the smallest buffer
//!    holds at least `start_buffer_seconds`.
//! 2. Start the media player.
//! 3. Wait for its first frame and for the shortage flag to clear.
//! 4. Start every registered [`PlaybackTarget`].
//!
//! After that, each tick pauses everything on shortage and resumes once it
//! clears.

use std::sync::Arc;

use core_runtime::events::{CoreEvent, EventBus, TransportEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::sync::StreamSynchroniser;

/// An audio sink the coordinator starts and pauses.
pub trait PlaybackTarget: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn is_playing(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Buffered seconds required before the media player is started.
    #[serde(default = "default_start_buffer_seconds")]
    pub start_buffer_seconds: f32,
}

fn default_start_buffer_seconds() -> f32 {
    3.0
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            start_buffer_seconds: default_start_buffer_seconds(),
        }
    }
}

/// Action taken by a coordinator tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    StartMedia,
    StartAudio,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStage {
    WaitingForBuffer,
    WaitingForFirstFrame,
    Running,
}

pub struct PlaybackCoordinator {
    config: CoordinatorConfig,
    synchroniser: Arc<StreamSynchroniser>,
    targets: Vec<Arc<dyn PlaybackTarget>>,
    events: Option<Arc<EventBus>>,
    stage: Mutex<TransportStage>,
}

impl std::fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackCoordinator")
            .field("config", &self.config)
            .field("targets", &self.targets.len())
            .field("stage", &*self.stage.lock())
            .finish()
    }
}

impl PlaybackCoordinator {
    pub fn new(synchroniser: Arc<StreamSynchroniser>, config: CoordinatorConfig) -> Self {
        Self {
            config,
            synchroniser,
            targets: Vec::new(),
            events: None,
            stage: Mutex::new(TransportStage::WaitingForBuffer),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn add_target(&mut self, target: Arc<dyn PlaybackTarget>) {
        self.targets.push(target);
    }

    pub fn stage(&self) -> TransportStage {
        *self.stage.lock()
    }

    /// Advance the start sequence or apply shortage pausing.
    pub fn tick(&self) -> Vec<TransportCommand> {
        let mut commands = Vec::new();
        let mut stage = self.stage.lock();

        match *stage {
            TransportStage::WaitingForBuffer => {
                let buffered = self.synchroniser.min_buffered_seconds();
                let ready = self.synchroniser.all_ready()
                    && buffered.is_some_and(|seconds| seconds >= self.config.start_buffer_seconds);
                if ready {
                    if let Some(player) = self.synchroniser.media_player() {
                        player.play();
                    }
                    info!(buffered = ?buffered, "Prebuffer filled, starting media");
                    self.emit(TransportEvent::MediaStarted);
                    commands.push(TransportCommand::StartMedia);
                    *stage = TransportStage::WaitingForFirstFrame;
                }
            }
            TransportStage::WaitingForFirstFrame => {
                let shortage = self.synchroniser.tick();
                let frame_ready = self
                    .synchroniser
                    .media_player()
                    .map_or(true, |player| player.first_frame_ready());
                if frame_ready && !shortage {
                    self.targets.iter().for_each(|target| target.play());
                    info!(targets = self.targets.len(), "Audio started");
                    self.emit(TransportEvent::AudioStarted);
                    commands.push(TransportCommand::StartAudio);
                    *stage = TransportStage::Running;
                }
            }
            TransportStage::Running => {
                let shortage = self.synchroniser.tick();
                let player = self.synchroniser.media_player();
                let any_paused = self.targets.iter().any(|target| !target.is_playing())
                    || player.is_some_and(|player| !player.is_playing());

                if shortage {
                    let playing = self.targets.iter().any(|target| target.is_playing())
                        || player.is_some_and(|player| player.is_playing());
                    if playing {
                        self.targets.iter().for_each(|target| target.pause());
                        if let Some(player) = player {
                            player.pause();
                        }
                        debug!("Buffer shortage, transport paused");
                        self.emit(TransportEvent::Paused {
                            reason: "buffer shortage".to_string(),
                        });
                        commands.push(TransportCommand::Pause);
                    }
                } else if any_paused {
                    self.targets.iter().for_each(|target| target.play());
                    if let Some(player) = player {
                        player.play();
                    }
                    debug!("Shortage cleared, transport resumed");
                    self.emit(TransportEvent::Resumed);
                    commands.push(TransportCommand::Resume);
                }
            }
        }

        commands
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(CoreEvent::Transport(event));
        }
    }
}
