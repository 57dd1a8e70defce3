use crate::core::{Error, FloodingConfig, Result};
use crate::util::{duration_to_ticks, round_div, saturate_i32};

use super::{Correction, Synchronizer};

/// Fixed-point base of the controller coefficients
const COEFF_BASE: i64 = 512;

/// Error samples per receiver window update
const NUM_SAMPLES: i64 = 8;

/// Fixed-point base of the variance accumulators
const VARIANCE_FP: i64 = 64;

/// Babylonian iterations used for the standard deviation
const SQRT_ITERATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitPhase {
    /// No sample seen since reset
    Cold,
    /// Deadbeat step done, history primed
    Primed,
    Running,
}

/// FLOPSYNC-2 controller with an adaptive receiver window
///
/// Cancels both step and ramp disturbances, so a constant frequency offset
/// between two oscillators is tracked with zero steady-state error. The
/// receiver window follows three standard deviations of the observed error.
#[derive(Debug, Clone)]
pub struct Flopsync2 {
    /// u(k-1) and u(k-2), scaled by 512
    u1: i64,
    u2: i64,
    /// e(k-1) and e(k-2)
    e1: i64,
    e2: i64,
    /// Running sum of scaled errors, times VARIANCE_FP
    sum: i64,
    /// Running sum of squared scaled errors, times VARIANCE_FP
    square_sum: i64,
    /// Samples accumulated in the current block
    count: i64,
    /// Current window, in scaled ticks
    window: i64,
    init: InitPhase,
    last_error: i32,
    w_min: i32,
    w_max: i32,
    scale_factor: i32,
}

impl Flopsync2 {
    /// Creates a controller with a receiver window bounded by `w_min..=w_max` ticks
    pub fn new(w_min: i32, w_max: i32) -> Result<Self> {
        Self::with_scale_factor(w_min, w_max, 1)
    }

    /// Creates a controller whose variance accumulation works on ticks divided
    /// by `scale_factor`, for timers fast enough to overflow the accumulators
    pub fn with_scale_factor(w_min: i32, w_max: i32, scale_factor: i32) -> Result<Self> {
        if w_min < 0 || w_min > w_max {
            return Err(Error::config(format!(
                "Invalid receiver window bounds {}..{}",
                w_min, w_max
            )));
        }
        if scale_factor < 1 {
            return Err(Error::config("Scale factor must be at least 1"));
        }
        let mut controller = Flopsync2 {
            u1: 0,
            u2: 0,
            e1: 0,
            e2: 0,
            sum: 0,
            square_sum: 0,
            count: 0,
            window: 0,
            init: InitPhase::Cold,
            last_error: 0,
            w_min,
            w_max,
            scale_factor,
        };
        controller.reset();
        Ok(controller)
    }

    /// Builds the controller from the configured window bounds for a timer at `frequency` Hz
    pub fn from_config(config: &FloodingConfig, frequency: u64) -> Result<Self> {
        let w_min = saturate_i32(duration_to_ticks(config.w_min, frequency));
        let w_max = saturate_i32(duration_to_ticks(config.w_max, frequency));
        Self::new(w_min, w_max)
    }

    /// Smallest window this controller will report
    pub fn w_min(&self) -> i32 {
        self.w_min
    }

    /// Largest window this controller will report
    pub fn w_max(&self) -> i32 {
        self.w_max
    }

    fn scaled_w_min(&self) -> i64 {
        i64::from(self.w_min / self.scale_factor)
    }

    fn scaled_w_max(&self) -> i64 {
        i64::from(self.w_max / self.scale_factor)
    }

    fn output(&self, correction: i64) -> Correction {
        Correction {
            clock_correction: saturate_i32(correction),
            receiver_window: saturate_i32(self.window * i64::from(self.scale_factor)),
        }
    }

    /// Folds one error sample into the variance block, updating the window
    /// when the block is full
    fn accumulate(&mut self, error: i64) {
        let e = error / i64::from(self.scale_factor);
        self.sum = self.sum.saturating_add(e * VARIANCE_FP);
        self.square_sum = self
            .square_sum
            .saturating_add(e.saturating_mul(e).saturating_mul(VARIANCE_FP));
        self.count += 1;
        if self.count < NUM_SAMPLES {
            return;
        }

        let average = self.sum / NUM_SAMPLES;
        let variance = (self.square_sum / NUM_SAMPLES - average * average / VARIANCE_FP).max(0);
        let stddev = babylonian_sqrt(variance.saturating_mul(VARIANCE_FP));
        let three_sigma = stddev.saturating_mul(3) / VARIANCE_FP;
        self.window = three_sigma.clamp(self.scaled_w_min(), self.scaled_w_max());

        self.sum = 0;
        self.square_sum = 0;
        self.count = 0;
    }
}

/// Square root by a fixed number of Babylonian iterations
///
/// The first guess is the power of two at half the bit length, which is
/// within a factor of two of the root and keeps three iterations accurate.
fn babylonian_sqrt(value: i64) -> i64 {
    if value <= 0 {
        return 0;
    }
    let bits = 64 - value.leading_zeros();
    let mut root = 1i64 << ((bits + 1) / 2);
    for _ in 0..SQRT_ITERATIONS {
        root = (root + value / root) / 2;
    }
    root
}

impl Synchronizer for Flopsync2 {
    fn compute_correction(&mut self, error: i32) -> Correction {
        let e = i64::from(error);
        self.last_error = error;

        match self.init {
            InitPhase::Cold => {
                // One deadbeat step for fast convergence at boot
                self.init = InitPhase::Primed;
                self.e1 = e;
                self.u1 = 2 * COEFF_BASE * e;
                self.u2 = COEFF_BASE * e;
                return Correction {
                    clock_correction: saturate_i32(2 * e),
                    receiver_window: self.w_max,
                };
            }
            InitPhase::Primed => {
                self.init = InitPhase::Running;
                self.e1 = 0;
                self.u1 /= 2;
            }
            InitPhase::Running => {}
        }

        // u(k)=2u(k-1)-u(k-2)+1.875e(k)-2.578125e(k-1)+0.947265625e(k-2), all times 512
        let u = 2 * self.u1 - self.u2 + 960 * e - 1320 * self.e1 + 485 * self.e2;
        self.u2 = self.u1;
        self.u1 = u;
        self.e2 = self.e1;
        self.e1 = e;

        self.accumulate(e);
        self.output(round_div(u, COEFF_BASE))
    }

    fn on_packet_lost(&mut self) -> Correction {
        self.window = (self.window * 4).min(self.scaled_w_max());
        self.output(round_div(self.u1, COEFF_BASE))
    }

    fn reset(&mut self) {
        self.u1 = 0;
        self.u2 = 0;
        self.e1 = 0;
        self.e2 = 0;
        self.sum = 0;
        self.square_sum = 0;
        self.count = 0;
        self.window = self.scaled_w_max();
        self.init = InitPhase::Cold;
        self.last_error = 0;
    }

    fn sync_error(&self) -> i32 {
        self.last_error
    }

    fn clock_correction(&self) -> i32 {
        saturate_i32(round_div(self.u1, COEFF_BASE))
    }

    fn receiver_window(&self) -> i32 {
        if self.init == InitPhase::Cold {
            return self.w_max;
        }
        saturate_i32(self.window * i64::from(self.scale_factor))
    }
}
