//! Protocol implementation module
//!
//! This module defines the sync packet wire format, the LedBar code used by
//! ranging replies and the per-round frame schedule.

pub mod ledbar;
pub mod packet;
pub mod state;

pub use self::ledbar::{LedBar, MAX_CORRUPTED_NIBBLES, RANGING_REPLY_SIZE};
pub use self::packet::{SyncPacket, SYNC_PACKET_SIZE};
pub use self::state::{FrameSchedule, NodeState};

/// LedBar sized for a ranging reply
pub type RangingReply = LedBar<RANGING_REPLY_SIZE>;

/// Receive buffer large enough for any frame this protocol exchanges
pub const MAX_FRAME_SIZE: usize = RANGING_REPLY_SIZE;
