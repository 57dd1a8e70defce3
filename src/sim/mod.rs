//! Simulated peripherals
//!
//! A [`SimAir`] connects any number of simulated nodes. Each node gets a
//! [`SimClock`] driven by its own [`Oscillator`], a [`SimRadio`] and a
//! [`SimPower`], all implementing the peripheral traits the flooders consume.
//!
//! Time is virtual: one millisecond of the tokio clock stands for one
//! nanosecond on air, so the simulation must run on a runtime whose clock is
//! paused (`#[tokio::test(start_paused = true)]`). Frames then arrive at
//! exact nanoseconds and a 10 s sync period completes instantly.

mod clock;
mod radio;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::core::Ticks;
use crate::radio::Peripherals;

pub use self::clock::{SimClock, SimPower};
pub use self::radio::{SentFrame, SimRadio};

/// Nominal frequency of every simulated timer: one tick per nanosecond
pub const SIM_FREQUENCY: u64 = 1_000_000_000;

const NS_PER_S: i128 = 1_000_000_000;

/// Sender id of frames injected directly into the air
pub const INJECTED: usize = usize::MAX;

/// A node's crystal: local ticks as a function of real time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Oscillator {
    /// Local tick count at real time zero
    pub offset: Ticks,
    /// Frequency error in parts per billion, positive runs fast
    pub drift_ppb: i64,
}

impl Oscillator {
    /// A perfect oscillator starting at zero
    pub fn ideal() -> Self {
        Self::default()
    }

    pub fn new(offset: Ticks, drift_ppb: i64) -> Self {
        Oscillator { offset, drift_ppb }
    }

    fn rate(&self) -> i128 {
        NS_PER_S + i128::from(self.drift_ppb)
    }

    /// Local ticks at real nanosecond `real`
    pub fn local(&self, real: i64) -> Ticks {
        let scaled = (i128::from(real) * self.rate()).div_euclid(NS_PER_S);
        saturate(scaled + i128::from(self.offset))
    }

    /// Earliest real nanosecond at which the local timer reads at least `local`
    pub fn real(&self, local: Ticks) -> i64 {
        let elapsed = i128::from(local) - i128::from(self.offset);
        let rate = self.rate().max(1);
        let scaled = elapsed * NS_PER_S;
        let real = scaled.div_euclid(rate) + i128::from(scaled.rem_euclid(rate) != 0);
        saturate(real)
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// Propagation model of the simulated medium
#[derive(Debug, Clone, PartialEq)]
pub struct AirConfig {
    /// Flight time added to every frame, in ns
    pub propagation_ns: i64,
    /// Standard deviation of the timestamping jitter, in ns
    pub jitter_ns: f64,
    /// Seed of the jitter generator
    pub seed: u64,
}

impl Default for AirConfig {
    fn default() -> Self {
        AirConfig {
            propagation_ns: 100,
            jitter_ns: 0.0,
            seed: 0,
        }
    }
}

/// A frame travelling through the air
#[derive(Debug, Clone)]
pub(crate) struct AirFrame {
    pub sender: usize,
    /// Real nanosecond at which the start of frame reaches receivers
    pub arrival: i64,
    pub crc: bool,
    pub bytes: Bytes,
}

/// Shared medium and virtual time base
#[derive(Debug)]
pub struct SimAir {
    epoch: Instant,
    config: AirConfig,
    tx: broadcast::Sender<AirFrame>,
    jitter: Option<Normal<f64>>,
    rng: Mutex<StdRng>,
    next_id: AtomicUsize,
}

impl SimAir {
    /// Creates the medium; real time zero is the moment of this call
    pub fn new(config: AirConfig) -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        let jitter = if config.jitter_ns > 0.0 {
            Normal::new(0.0, config.jitter_ns).ok()
        } else {
            None
        };
        Arc::new(SimAir {
            epoch: Instant::now(),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            tx,
            jitter,
            next_id: AtomicUsize::new(0),
        })
    }

    /// Current real time in ns
    pub fn now(&self) -> i64 {
        let elapsed = Instant::now().saturating_duration_since(self.epoch);
        i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
    }

    /// Runtime instant standing for real nanosecond `real`
    pub(crate) fn instant(&self, real: i64) -> Instant {
        self.epoch + Duration::from_millis(u64::try_from(real).unwrap_or(0))
    }

    /// Creates a node whose timer follows `oscillator`
    pub fn node(self: &Arc<Self>, oscillator: Oscillator) -> SimNode {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let clock = Arc::new(SimClock::new(self.clone(), oscillator));
        let radio = Arc::new(SimRadio::new(id, self.clone(), clock.clone()));
        let power = Arc::new(SimPower::new(clock.clone()));
        SimNode { clock, radio, power }
    }

    /// Puts `bytes` on air so that they reach every radio at real time `arrival`
    pub fn inject(&self, bytes: &[u8], arrival: i64) {
        self.publish(AirFrame {
            sender: INJECTED,
            arrival,
            crc: true,
            bytes: Bytes::copy_from_slice(bytes),
        });
    }

    /// Transmits a frame whose start leaves its sender at real time `sent`
    pub(crate) fn transmit(&self, sender: usize, sent: i64, crc: bool, bytes: Bytes) {
        let jitter = match &self.jitter {
            Some(normal) => {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                normal.sample(&mut *rng).round() as i64
            }
            None => 0,
        };
        // Frames never reach anyone before they were sent
        let arrival = (sent + self.config.propagation_ns + jitter).max(sent + 1);
        self.publish(AirFrame {
            sender,
            arrival,
            crc,
            bytes,
        });
    }

    fn publish(&self, frame: AirFrame) {
        // No subscribed radio is not an error: nobody listens
        let _ = self.tx.send(frame);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AirFrame> {
        self.tx.subscribe()
    }
}

/// The peripherals of one simulated node
#[derive(Debug, Clone)]
pub struct SimNode {
    pub clock: Arc<SimClock>,
    pub radio: Arc<SimRadio>,
    pub power: Arc<SimPower>,
}

impl SimNode {
    /// Handles for a flooder running on this node
    pub fn peripherals(&self) -> Peripherals {
        Peripherals::new(self.clock.clone(), self.radio.clone(), self.power.clone())
    }
}
