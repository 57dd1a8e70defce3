use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{Result, Ticks};
use crate::sync::{FlopsyncVht, Synchronizer};
use crate::util::saturate_i32;
use super::clock_domain::ClockDomain;

/// Keeps a fast, power-hungry timer aligned with a slow always-on reference
///
/// Each reference period the fast timer's value is captured at a reference
/// edge. The capture is compared with where the fast timer was expected to
/// be, the error drives a [`FlopsyncVht`] controller and the resulting
/// correction re-anchors the VHT [`ClockDomain`].
#[derive(Debug)]
pub struct VhtTracker {
    controller: FlopsyncVht,
    clock: Arc<ClockDomain>,
    /// Nominal fast ticks per reference period
    period: Ticks,
    /// Ideal fast-timer value at the last reference edge
    theoretical: Ticks,
    /// Fast-timer value expected at the last reference edge
    expected: Ticks,
    correction: i32,
    started: bool,
}

impl VhtTracker {
    /// Creates a tracker updating `clock` every `period` fast ticks
    pub fn new(clock: Arc<ClockDomain>, period: Ticks, state_quantization: bool) -> Self {
        VhtTracker {
            controller: FlopsyncVht::new(state_quantization),
            clock,
            period,
            theoretical: 0,
            expected: 0,
            correction: 0,
            started: false,
        }
    }

    /// The clock domain maintained by this tracker
    pub fn clock(&self) -> &Arc<ClockDomain> {
        &self.clock
    }

    /// Correction applied to the current reference period
    pub fn correction(&self) -> i32 {
        self.correction
    }

    /// Handles the fast-timer capture of a reference edge, returning the error
    pub fn on_reference_capture(&mut self, captured: Ticks) -> Result<i32> {
        if !self.started {
            self.theoretical = captured;
            self.expected = captured;
            self.started = true;
            self.clock.reset_to(captured);
            return Ok(0);
        }

        self.advance();
        let error = saturate_i32(captured - self.expected);
        let output = self.controller.compute_correction(error);
        self.apply(output.clock_correction)?;
        debug!(error, correction = self.correction, "VHT capture");
        Ok(error)
    }

    /// Handles a reference period without a capture
    pub fn on_capture_missed(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.advance();
        let output = self.controller.on_packet_lost();
        warn!(correction = output.clock_correction, "VHT capture missed");
        self.apply(output.clock_correction)
    }

    /// Forgets all history; the next capture becomes the new anchor
    pub fn resynchronize(&mut self) {
        self.controller.reset();
        self.correction = 0;
        self.started = false;
    }

    fn advance(&mut self) {
        self.theoretical += self.period;
        self.expected += self.period + i64::from(self.correction);
    }

    fn apply(&mut self, correction: i32) -> Result<()> {
        self.clock
            .update(self.theoretical, self.expected, self.period, correction)?;
        self.correction = correction;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeTransform;

    #[test]
    fn test_fast_timer_drift_is_tracked() {
        // Reference period of 1 ms on a 24 MHz timer running 40 ppm fast
        let period = 24_000;
        let clock = ClockDomain::shared();
        let mut tracker = VhtTracker::new(clock.clone(), period, true);

        let capture = |k: i64| 1_000 + k * period + (k * period * 40) / 1_000_000;
        let mut errors = Vec::new();
        for k in 0..200 {
            errors.push(tracker.on_reference_capture(capture(k)).unwrap());
        }

        assert!(errors.iter().rev().take(20).all(|e| e.abs() <= 1), "{:?}", errors);
        // A raw capture maps back onto the ideal reference grid
        let corrected = clock.corrected(capture(199));
        assert!((corrected - (1_000 + 199 * period)).abs() <= 2);
    }

    #[test]
    fn test_missed_capture_keeps_grid() {
        let clock = ClockDomain::shared();
        let mut tracker = VhtTracker::new(clock.clone(), 1_000, false);
        tracker.on_reference_capture(0).unwrap();
        tracker.on_reference_capture(1_002).unwrap();
        let correction = tracker.correction();

        tracker.on_capture_missed().unwrap();
        assert_eq!(tracker.correction(), correction);
        assert_eq!(clock.snapshot().base_theoretical, 2_000);
    }

    #[test]
    fn test_resynchronize_reanchors() {
        let clock = ClockDomain::shared();
        let mut tracker = VhtTracker::new(clock.clone(), 1_000, false);
        tracker.on_reference_capture(0).unwrap();
        tracker.on_reference_capture(1_010).unwrap();

        tracker.resynchronize();
        assert_eq!(tracker.on_reference_capture(50_000).unwrap(), 0);
        assert_eq!(clock.corrected(50_500), 50_500);
    }
}
