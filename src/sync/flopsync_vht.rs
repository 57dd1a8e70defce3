use crate::util::{round_div, saturate_i32};

use super::{Correction, Synchronizer};

/// Fixed-point base of the controller coefficients
const COEFF_BASE: i64 = 8;

/// Reduced FLOPSYNC controller for tracking a fast oscillator against a slow one
///
/// `u(k) = u(k-1) + 1.375e(k) - e(k-1)`, kept multiplied by 8. There is no
/// receiver window; corrections are reported with a zero window.
#[derive(Debug, Clone, Default)]
pub struct FlopsyncVht {
    /// u(k-1), scaled by 8
    u1: i64,
    /// e(k-1)
    e1: i64,
    last_error: i32,
    /// Snap the state to the quantized output whenever the error is zero
    state_quantization: bool,
}

impl FlopsyncVht {
    /// Creates the controller
    pub fn new(state_quantization: bool) -> Self {
        FlopsyncVht {
            state_quantization,
            ..Default::default()
        }
    }

    /// Whether adaptive state quantization is enabled
    pub fn state_quantization(&self) -> bool {
        self.state_quantization
    }
}

impl Synchronizer for FlopsyncVht {
    fn compute_correction(&mut self, error: i32) -> Correction {
        let e = i64::from(error);
        self.last_error = error;

        let u = self.u1 + 11 * e - 8 * self.e1;
        let quantized = round_div(u, COEFF_BASE);
        self.u1 = if self.state_quantization && e == 0 {
            quantized * COEFF_BASE
        } else {
            u
        };
        self.e1 = e;

        Correction {
            clock_correction: saturate_i32(quantized),
            receiver_window: 0,
        }
    }

    fn on_packet_lost(&mut self) -> Correction {
        Correction {
            clock_correction: self.clock_correction(),
            receiver_window: 0,
        }
    }

    fn reset(&mut self) {
        self.u1 = 0;
        self.e1 = 0;
        self.last_error = 0;
    }

    fn sync_error(&self) -> i32 {
        self.last_error
    }

    fn clock_correction(&self) -> i32 {
        saturate_i32(round_div(self.u1, COEFF_BASE))
    }

    fn receiver_window(&self) -> i32 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurrence() {
        let mut controller = FlopsyncVht::new(false);
        // u = 11*10 = 110 -> 13.75 -> 14
        assert_eq!(controller.compute_correction(10).clock_correction, 14);
        // u = 110 + 11*4 - 80 = 74 -> 9.25 -> 9
        assert_eq!(controller.compute_correction(4).clock_correction, 9);
        // u = 74 + 0 - 32 = 42 -> 5.25 -> 5
        assert_eq!(controller.compute_correction(0).clock_correction, 5);
        // u = 42 - 33 - 0 = 9 -> 1.125 -> 1
        assert_eq!(controller.compute_correction(-3).clock_correction, 1);
        assert_eq!(controller.sync_error(), -3);
        assert_eq!(controller.receiver_window(), 0);
    }

    #[test]
    fn test_state_quantization_snaps_on_zero_error() {
        let mut plain = FlopsyncVht::new(false);
        let mut snapped = FlopsyncVht::new(true);
        for e in [10, 4, 0] {
            plain.compute_correction(e);
            snapped.compute_correction(e);
        }
        // State after the zero sample: plain keeps 42, snapped keeps 5*8 = 40
        assert_eq!(plain.compute_correction(0).clock_correction, 5);
        assert_eq!(snapped.compute_correction(0).clock_correction, 5);
        assert_eq!(plain.compute_correction(1).clock_correction, 7);
        assert_eq!(snapped.compute_correction(1).clock_correction, 6);
    }

    #[test]
    fn test_packet_loss_reuses_last_correction() {
        let mut controller = FlopsyncVht::new(false);
        controller.compute_correction(10);
        let lost = controller.on_packet_lost();
        assert_eq!(lost.clock_correction, 14);
        assert_eq!(lost.receiver_window, 0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut controller = FlopsyncVht::new(true);
        controller.compute_correction(1000);
        controller.compute_correction(-50);
        controller.reset();

        let mut fresh = FlopsyncVht::new(true);
        for e in [7, -2, 0, 5] {
            assert_eq!(controller.compute_correction(e), fresh.compute_correction(e));
        }
    }
}
