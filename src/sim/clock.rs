use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::time::sleep_until;

use crate::core::Ticks;
use crate::radio::PowerManager;
use crate::time::{ClockDomain, Correct, HardwareTimer, TimeTransform};
use super::{Oscillator, SimAir, SIM_FREQUENCY};

#[derive(Debug, Default)]
struct ClockState {
    /// Real time of the last captured event
    last_event: Option<i64>,
    domain: Option<Arc<ClockDomain>>,
}

/// Simulated hardware timer of one node
#[derive(Debug)]
pub struct SimClock {
    air: Arc<SimAir>,
    oscillator: Oscillator,
    state: Mutex<ClockState>,
}

impl SimClock {
    pub(crate) fn new(air: Arc<SimAir>, oscillator: Oscillator) -> Self {
        SimClock {
            air,
            oscillator,
            state: Mutex::new(ClockState::default()),
        }
    }

    pub fn oscillator(&self) -> Oscillator {
        self.oscillator
    }

    /// Lets corrected timestamps go through `domain`
    pub fn attach_domain(&self, domain: Arc<ClockDomain>) {
        self.lock().domain = Some(domain);
    }

    /// Local ticks at real time `real`
    pub fn local_at(&self, real: i64) -> Ticks {
        self.oscillator.local(real)
    }

    /// Real time at which the timer reaches `local`
    pub fn real_at(&self, local: Ticks) -> i64 {
        self.oscillator.real(local)
    }

    /// Converts a raw tick to the requested timescale
    pub fn to_timescale(&self, tick: Ticks, correction: Correct) -> Ticks {
        match (correction, &self.lock().domain) {
            (Correct::Corrected, Some(domain)) => domain.corrected(tick),
            _ => tick,
        }
    }

    /// Converts a tick in the requested timescale to a raw tick
    pub fn from_timescale(&self, tick: Ticks, correction: Correct) -> Ticks {
        match (correction, &self.lock().domain) {
            (Correct::Corrected, Some(domain)) => domain.uncorrected(tick),
            _ => tick,
        }
    }

    pub(crate) fn capture(&self, real: i64) {
        self.lock().last_event = Some(real);
    }

    /// Sleeps until the real time at which the timer reads `when`
    pub(crate) async fn sleep_until_local(&self, when: Ticks) {
        let real = self.real_at(when);
        if real > self.air.now() {
            sleep_until(self.air.instant(real)).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HardwareTimer for SimClock {
    fn now(&self) -> Ticks {
        self.local_at(self.air.now())
    }

    fn frequency(&self) -> u64 {
        SIM_FREQUENCY
    }

    async fn wait_until(&self, when: Ticks) {
        self.sleep_until_local(when).await;
    }

    async fn wait_for_event_or_timeout(&self, timeout: Ticks) -> bool {
        // No capture input is wired to the simulated timer
        self.sleep_until_local(timeout).await;
        true
    }

    fn last_event_timestamp(&self, correction: Correct) -> Ticks {
        let last = self.lock().last_event;
        let raw = last.map_or(0, |real| self.local_at(real));
        self.to_timescale(raw, correction)
    }
}

/// Simulated power manager; deep sleep is a plain wait
#[derive(Debug)]
pub struct SimPower {
    clock: Arc<SimClock>,
    sleeps: AtomicU32,
}

impl SimPower {
    pub(crate) fn new(clock: Arc<SimClock>) -> Self {
        SimPower {
            clock,
            sleeps: AtomicU32::new(0),
        }
    }

    /// Number of deep sleeps entered so far
    pub fn sleeps(&self) -> u32 {
        self.sleeps.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PowerManager for SimPower {
    async fn deep_sleep_until(&self, when: Ticks) {
        self.sleeps.fetch_add(1, Ordering::Relaxed);
        self.clock.sleep_until_local(when).await;
    }
}
