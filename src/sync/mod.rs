//! Synchronization controllers
//!
//! A synchronizer turns the error observed on each received sync packet into
//! a clock correction for the next period and a receiver window sized to the
//! observed jitter.

pub mod flopsync2;
pub mod flopsync_vht;

pub use self::flopsync2::Flopsync2;
pub use self::flopsync_vht::FlopsyncVht;

/// Output of one controller step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Correction {
    /// Ticks to add to the next sync period
    pub clock_correction: i32,
    /// Half-width of the next receive window, in ticks
    pub receiver_window: i32,
}

/// A discrete-time controller driven once per synchronization round
pub trait Synchronizer {
    /// Feeds the error `measured - expected` of a received packet
    fn compute_correction(&mut self, error: i32) -> Correction;

    /// Produces a correction for a round in which no packet was received
    fn on_packet_lost(&mut self) -> Correction;

    /// Returns the controller to its freshly constructed state
    fn reset(&mut self);

    /// Error passed to the last `compute_correction`
    fn sync_error(&self) -> i32;

    /// Correction currently in effect
    fn clock_correction(&self) -> i32;

    /// Receiver window currently in effect
    fn receiver_window(&self) -> i32;
}

/// The controllers a flooder can be built with
#[derive(Debug, Clone)]
pub enum SyncController {
    Flopsync2(Flopsync2),
    FlopsyncVht(FlopsyncVht),
}

impl From<Flopsync2> for SyncController {
    fn from(controller: Flopsync2) -> Self {
        SyncController::Flopsync2(controller)
    }
}

impl From<FlopsyncVht> for SyncController {
    fn from(controller: FlopsyncVht) -> Self {
        SyncController::FlopsyncVht(controller)
    }
}

impl Synchronizer for SyncController {
    fn compute_correction(&mut self, error: i32) -> Correction {
        match self {
            SyncController::Flopsync2(c) => c.compute_correction(error),
            SyncController::FlopsyncVht(c) => c.compute_correction(error),
        }
    }

    fn on_packet_lost(&mut self) -> Correction {
        match self {
            SyncController::Flopsync2(c) => c.on_packet_lost(),
            SyncController::FlopsyncVht(c) => c.on_packet_lost(),
        }
    }

    fn reset(&mut self) {
        match self {
            SyncController::Flopsync2(c) => c.reset(),
            SyncController::FlopsyncVht(c) => c.reset(),
        }
    }

    fn sync_error(&self) -> i32 {
        match self {
            SyncController::Flopsync2(c) => c.sync_error(),
            SyncController::FlopsyncVht(c) => c.sync_error(),
        }
    }

    fn clock_correction(&self) -> i32 {
        match self {
            SyncController::Flopsync2(c) => c.clock_correction(),
            SyncController::FlopsyncVht(c) => c.clock_correction(),
        }
    }

    fn receiver_window(&self) -> i32 {
        match self {
            SyncController::Flopsync2(c) => c.receiver_window(),
            SyncController::FlopsyncVht(c) => c.receiver_window(),
        }
    }
}
