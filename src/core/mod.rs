//! Core types and traits for the flooding time synchronization stack
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{
    FloodingConfig,
    Hop,
    RadioTiming,
    RangingConfig,
    Ticks,
};

/// Hard upper bound on hop counts, the hop field is a single byte
pub const MAX_HOPS_LIMIT: u8 = u8::MAX;

/// Default number of consecutive misses tolerated before sync is lost
pub const DEFAULT_MAX_MISS_PACKETS: u32 = 3;
