//! # Channel Queues
//!
//! Per-channel-group FIFO buffers between the decoder and the pull callback.
//!
//! A stereo (or any plain interleaved) stream uses a single queue. A
//! four-channel ambisonic stream is split into two queues of interleaved
//! stereo pairs: channels 1/2 and channels 3/4.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Queue selector used by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Stereo,
    Ambisonics12,
    Ambisonics34,
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Channel::Stereo | Channel::Ambisonics12 => 0,
            Channel::Ambisonics34 => 1,
        }
    }
}

/// Unbounded FIFO of normalised samples.
#[derive(Debug, Default, Clone)]
pub struct ChannelQueue {
    samples: VecDeque<f32>,
}

impl ChannelQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, value: f32) {
        self.samples.push_back(value);
    }

    pub fn dequeue(&mut self) -> Option<f32> {
        self.samples.pop_front()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Stereo,
    Ambisonic,
}

/// Owns the channel queues of one stream and routes decoded samples into them.
#[derive(Debug, Clone)]
pub struct AudioQueueManager {
    layout: Layout,
    queues: Vec<ChannelQueue>,
    /// Running interleaved sample index across all routed chunks.
    routed: u64,
    /// Upper bound on samples ever accepted.
    limit: Option<u64>,
}

impl AudioQueueManager {
    /// One queue, samples kept in arrival order.
    pub fn stereo() -> Self {
        Self {
            layout: Layout::Stereo,
            queues: vec![ChannelQueue::new()],
            routed: 0,
            limit: None,
        }
    }

    /// Two queues: channels 1/2 and channels 3/4 of a 4-channel stream.
    pub fn ambisonic() -> Self {
        Self {
            layout: Layout::Ambisonic,
            queues: vec![ChannelQueue::new(), ChannelQueue::new()],
            routed: 0,
            limit: None,
        }
    }

    /// Stop accepting samples once `limit` have been routed.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn enqueue(&mut self, value: f32, channel: Channel) {
        if let Some(queue) = self.queues.get_mut(channel.index()) {
            queue.enqueue(value);
        }
    }

    pub fn dequeue(&mut self, channel: Channel) -> Option<f32> {
        self.queues.get_mut(channel.index())?.dequeue()
    }

    /// Samples available to every reader (minimum across queues).
    pub fn count(&self) -> usize {
        self.queues.iter().map(ChannelQueue::len).min().unwrap_or(0)
    }

    pub fn len(&self, channel: Channel) -> usize {
        self.queues
            .get(channel.index())
            .map(ChannelQueue::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, channel: Channel) -> bool {
        self.len(channel) == 0
    }

    /// Samples routed so far, including those already drained.
    pub fn routed(&self) -> u64 {
        self.routed
    }

    /// Route a chunk of interleaved samples.
    ///
    /// Returns how many samples were accepted; the rest exceed the limit.
    pub fn route_interleaved(&mut self, samples: &[f32]) -> usize {
        let accepted = match self.limit {
            Some(limit) => {
                let room = limit.saturating_sub(self.routed);
                samples.len().min(usize::try_from(room).unwrap_or(usize::MAX))
            }
            None => samples.len(),
        };

        for &value in &samples[..accepted] {
            let channel = match self.layout {
                Layout::Stereo => Channel::Stereo,
                Layout::Ambisonic if self.routed % 4 < 2 => Channel::Ambisonics12,
                Layout::Ambisonic => Channel::Ambisonics34,
            };
            self.enqueue(value, channel);
            self.routed += 1;
        }

        accepted
    }

    pub fn clear(&mut self) {
        self.queues.iter_mut().for_each(ChannelQueue::clear);
    }
}
