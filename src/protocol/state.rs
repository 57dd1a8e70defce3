use crate::core::{Hop, Ticks};

/// Synchronization state of a node as reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Waiting for `resynchronize()`
    Unsynchronized,
    /// Following the flood
    Synchronized,
}

impl NodeState {
    pub fn is_synchronized(&self) -> bool {
        matches!(self, NodeState::Synchronized)
    }
}

/// Per-round bookkeeping of a flooder
///
/// `measured_frame_start` and `computed_frame_start` are raw ticks;
/// `theoretical_frame_start` is the ideal grid in the corrected domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchedule {
    /// Nominal ticks between frames
    pub sync_period: Ticks,
    /// When the last sync packet actually arrived
    pub measured_frame_start: Ticks,
    /// When the last sync packet was expected
    pub computed_frame_start: Ticks,
    /// Where the last frame sits on the ideal grid
    pub theoretical_frame_start: Ticks,
    /// Consecutive rounds without a packet
    pub miss_count: u32,
    /// This node's distance from the root
    pub hop: Hop,
}

impl FrameSchedule {
    /// Creates an empty schedule for a node at `hop`
    pub fn new(sync_period: Ticks, hop: Hop) -> Self {
        FrameSchedule {
            sync_period,
            measured_frame_start: 0,
            computed_frame_start: 0,
            theoretical_frame_start: 0,
            miss_count: 0,
            hop,
        }
    }

    /// Anchors all three frame starts on an observed packet
    pub fn anchor(&mut self, timestamp: Ticks) {
        self.measured_frame_start = timestamp;
        self.computed_frame_start = timestamp;
        self.theoretical_frame_start = timestamp;
        self.miss_count = 0;
    }

    /// Moves the expected frame start one period ahead, stretched by `correction`
    pub fn advance(&mut self, correction: i32) {
        self.computed_frame_start += self.sync_period + i64::from(correction);
    }

    /// Moves the ideal grid one period ahead
    pub fn advance_theoretical(&mut self) {
        self.theoretical_frame_start += self.sync_period;
    }

    /// Records a round without a usable packet; returns the new miss count
    pub fn record_miss(&mut self) -> u32 {
        self.miss_count = self.miss_count.saturating_add(1);
        self.miss_count
    }

    /// Whether more than `max_miss_packets` rounds were missed in a row
    pub fn lost(&self, max_miss_packets: u32) -> bool {
        self.miss_count > max_miss_packets
    }

    /// Error of the last round
    pub fn error(&self) -> Ticks {
        self.measured_frame_start - self.computed_frame_start
    }
}
