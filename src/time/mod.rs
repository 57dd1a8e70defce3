//! Time keeping and clock-domain transforms
//!
//! This module provides:
//!
//! - the [`HardwareTimer`] interface consumed by the flooders
//! - 32.32 fixed-point arithmetic for tick scaling
//! - [`ClockDomain`], the anchor-and-factor transform between raw and corrected ticks
//! - [`VhtTracker`], which keeps a fast timer aligned to a slow reference
//!
//! Transforms compose: a raw fast-timer tick goes through the VHT domain and
//! then through the synchronization domain maintained by a relay flooder.
//!
//! # Examples
//!
//! ```
//! use flopsync::time::{ClockDomain, TimeTransform};
//!
//! let clock = ClockDomain::new();
//! // 1 ms period that actually lasted 1_000_050 raw ticks
//! clock.update(0, 0, 1_000_000, 50).unwrap();
//! assert_eq!(clock.corrected(1_000_050), 1_000_000);
//! assert_eq!(clock.uncorrected(1_000_000), 1_000_050);
//! ```

mod clock_domain;
mod fixed;
mod vht;

use async_trait::async_trait;

use crate::core::Ticks;

pub use self::clock_domain::{Anchors, ClockDomain, ComposedClock, TimeTransform};
pub use self::fixed::{mul_fixed, mul_ratio, Fixed32};
pub use self::vht::VhtTracker;

/// Which timescale a timestamp or deadline is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Correct {
    /// Synchronized time
    Corrected,
    /// Raw oscillator ticks
    Uncorrected,
}

/// The node's 64-bit monotonic hardware timer
///
/// Waiting primitives suspend the caller until the deadline or event; they
/// cannot be cancelled by this crate.
#[async_trait]
pub trait HardwareTimer: Send + Sync {
    /// Current raw tick count
    fn now(&self) -> Ticks;

    /// Timer frequency in Hz
    fn frequency(&self) -> u64;

    /// Suspends until `when`; returns immediately if it already passed
    async fn wait_until(&self, when: Ticks);

    /// Suspends until an input-capture event or `timeout`; true on timeout
    async fn wait_for_event_or_timeout(&self, timeout: Ticks) -> bool;

    /// Timestamp of the last captured event in the requested timescale
    fn last_event_timestamp(&self, correction: Correct) -> Ticks;

    /// Converts ticks to nanoseconds
    fn tick_to_ns(&self, ticks: Ticks) -> i64 {
        let ns = i128::from(ticks) * 1_000_000_000 / i128::from(self.frequency().max(1));
        i64::try_from(ns).unwrap_or(if ns < 0 { i64::MIN } else { i64::MAX })
    }

    /// Converts nanoseconds to ticks
    fn ns_to_tick(&self, ns: i64) -> Ticks {
        let ticks = i128::from(ns) * i128::from(self.frequency()) / 1_000_000_000;
        Ticks::try_from(ticks).unwrap_or(if ticks < 0 { Ticks::MIN } else { Ticks::MAX })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTimer(u64);

    #[async_trait]
    impl HardwareTimer for FixedTimer {
        fn now(&self) -> Ticks {
            0
        }

        fn frequency(&self) -> u64 {
            self.0
        }

        async fn wait_until(&self, _when: Ticks) {}

        async fn wait_for_event_or_timeout(&self, _timeout: Ticks) -> bool {
            true
        }

        fn last_event_timestamp(&self, _correction: Correct) -> Ticks {
            0
        }
    }

    #[test]
    fn test_tick_conversions() {
        let rtc = FixedTimer(32_768);
        assert_eq!(rtc.tick_to_ns(32_768), 1_000_000_000);
        assert_eq!(rtc.ns_to_tick(500_000_000), 16_384);
        assert_eq!(rtc.tick_to_ns(-32_768), -1_000_000_000);

        let fast = FixedTimer(48_000_000);
        assert_eq!(fast.ns_to_tick(1_000), 48);
        assert_eq!(fast.tick_to_ns(48), 1_000);
        assert_eq!(rtc.tick_to_ns(i64::MAX), i64::MAX);
    }
}
