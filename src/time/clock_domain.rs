use std::sync::{Arc, PoisonError, RwLock};

use crate::core::{Error, Result, Ticks};
use super::fixed::{mul_ratio, Fixed32};

/// Conversion between raw oscillator ticks and a corrected timescale
pub trait TimeTransform {
    /// Maps a raw tick to the corrected domain
    fn corrected(&self, tick: Ticks) -> Ticks;

    /// Maps a corrected tick back to the raw domain
    fn uncorrected(&self, tick: Ticks) -> Ticks;
}

/// One consistent set of anchors and factors
///
/// `base_theoretical` and `base_expected` describe the same real event in
/// the corrected and raw domains. Translations use the exact period ratio so
/// that a round trip stays within one tick over any span; `factor` and
/// `inverse` are the same slope in 32.32 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchors {
    /// Anchor in the corrected domain
    pub base_theoretical: Ticks,
    /// Anchor in the raw domain
    pub base_expected: Ticks,
    /// Corrected ticks per raw tick
    pub factor: Fixed32,
    /// Raw ticks per corrected tick
    pub inverse: Fixed32,
    /// Reference period in the corrected domain
    pub theoretical_period: Ticks,
    /// The same period measured in raw ticks
    pub expected_period: Ticks,
}

impl Anchors {
    /// The identity mapping
    pub fn identity() -> Self {
        Anchors {
            base_theoretical: 0,
            base_expected: 0,
            factor: Fixed32::ONE,
            inverse: Fixed32::ONE,
            theoretical_period: 1,
            expected_period: 1,
        }
    }

    /// Anchors for a period of `period` ticks that lasted `period + correction` raw ticks
    pub fn for_correction(
        base_theoretical: Ticks,
        base_expected: Ticks,
        period: Ticks,
        correction: i32,
    ) -> Result<Self> {
        if period <= 0 {
            return Err(Error::timing(format!("Period {} is not positive", period)));
        }
        let expected_period = period
            .checked_add(i64::from(correction))
            .filter(|p| *p > 0)
            .ok_or_else(|| {
                Error::timing(format!(
                    "Correction {} does not fit period {}",
                    correction, period
                ))
            })?;
        Ok(Anchors {
            base_theoretical,
            base_expected,
            factor: Fixed32::from_ratio(period, expected_period)?,
            inverse: Fixed32::from_ratio(expected_period, period)?,
            theoretical_period: period,
            expected_period,
        })
    }
}

impl Default for Anchors {
    fn default() -> Self {
        Anchors::identity()
    }
}

impl TimeTransform for Anchors {
    fn corrected(&self, tick: Ticks) -> Ticks {
        let delta = tick.saturating_sub(self.base_expected);
        self.base_theoretical
            .saturating_add(mul_ratio(delta, self.theoretical_period, self.expected_period))
    }

    fn uncorrected(&self, tick: Ticks) -> Ticks {
        let delta = tick.saturating_sub(self.base_theoretical);
        self.base_expected
            .saturating_add(mul_ratio(delta, self.expected_period, self.theoretical_period))
    }
}

/// Clock domain shared between its owning flooder and timestamp readers
///
/// The anchor set is replaced as a whole under a write lock, so concurrent
/// translations see either the previous or the new anchors, never a mix.
#[derive(Debug, Default)]
pub struct ClockDomain {
    anchors: RwLock<Anchors>,
}

impl ClockDomain {
    /// Creates an identity clock domain
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an identity clock domain ready to be shared
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Copy of the anchors currently in effect
    pub fn snapshot(&self) -> Anchors {
        *self.anchors.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs a new anchor set atomically
    pub fn commit(&self, anchors: Anchors) {
        *self.anchors.write().unwrap_or_else(PoisonError::into_inner) = anchors;
    }

    /// Re-anchors after a round: `base_expected` in the raw domain corresponds
    /// to `base_theoretical`, and the next `period` corrected ticks will take
    /// `period + correction` raw ticks
    pub fn update(
        &self,
        base_theoretical: Ticks,
        base_expected: Ticks,
        period: Ticks,
        correction: i32,
    ) -> Result<()> {
        let anchors = Anchors::for_correction(base_theoretical, base_expected, period, correction)?;
        self.commit(anchors);
        Ok(())
    }

    /// Re-anchors with unit slope, so `base` maps to itself
    pub fn reset_to(&self, base: Ticks) {
        self.commit(Anchors {
            base_theoretical: base,
            base_expected: base,
            ..Anchors::identity()
        });
    }
}

impl TimeTransform for ClockDomain {
    fn corrected(&self, tick: Ticks) -> Ticks {
        self.snapshot().corrected(tick)
    }

    fn uncorrected(&self, tick: Ticks) -> Ticks {
        self.snapshot().uncorrected(tick)
    }
}

/// Nested transform: raw ticks first go through the VHT domain, then through
/// the synchronization domain
#[derive(Debug, Clone)]
pub struct ComposedClock {
    vht: Arc<ClockDomain>,
    sync: Arc<ClockDomain>,
}

impl ComposedClock {
    /// Composes `vht` (applied first) with `sync`
    pub fn new(vht: Arc<ClockDomain>, sync: Arc<ClockDomain>) -> Self {
        ComposedClock { vht, sync }
    }

    /// The inner, fast-timer transform
    pub fn vht(&self) -> &Arc<ClockDomain> {
        &self.vht
    }

    /// The outer, synchronization transform
    pub fn sync(&self) -> &Arc<ClockDomain> {
        &self.sync
    }
}

impl TimeTransform for ComposedClock {
    fn corrected(&self, tick: Ticks) -> Ticks {
        self.sync.corrected(self.vht.corrected(tick))
    }

    fn uncorrected(&self, tick: Ticks) -> Ticks {
        self.vht.uncorrected(self.sync.uncorrected(tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    const PERIOD: Ticks = 10_000_000_000;

    #[test]
    fn test_identity_by_default() {
        let clock = ClockDomain::new();
        assert_eq!(clock.corrected(123_456), 123_456);
        assert_eq!(clock.uncorrected(-42), -42);
    }

    #[test]
    fn test_anchor_maps_to_theoretical() {
        let clock = ClockDomain::new();
        clock.update(50_000, 50_700, PERIOD, 200_000).unwrap();

        assert_eq!(clock.corrected(50_700), 50_000);
        assert_eq!(clock.uncorrected(50_000), 50_700);
        // One full corrected period ahead
        let next = clock.uncorrected(50_000 + PERIOD);
        assert!((next - (50_700 + PERIOD + 200_000)).abs() <= 1);
    }

    #[test]
    fn test_negative_correction() {
        let clock = ClockDomain::new();
        clock.update(0, 0, 1_000_000, -1_000).unwrap();
        assert_eq!(clock.corrected(999_000), 1_000_000);
        assert_eq!(clock.uncorrected(1_000_000), 999_000);
    }

    #[test]
    fn test_correction_larger_than_period_is_rejected() {
        let clock = ClockDomain::new();
        clock.update(10, 20, 1_000, 5).unwrap();
        let before = clock.snapshot();
        assert!(clock.update(0, 0, 1_000, -1_000).is_err());
        assert_eq!(clock.snapshot(), before);
    }

    #[test]
    fn test_reset_to() {
        let clock = ClockDomain::new();
        clock.update(0, 100, PERIOD, 12_345).unwrap();
        clock.reset_to(777);
        assert_eq!(clock.corrected(1_777), 1_777);
        assert_eq!(clock.snapshot().factor, Fixed32::ONE);
    }

    #[test]
    fn test_composed_clock() {
        let vht = ClockDomain::shared();
        let sync = ClockDomain::shared();
        vht.update(0, 0, 1_000_000, 100).unwrap();
        sync.update(1_000, 0, 1_000_000, -200).unwrap();
        let composed = ComposedClock::new(vht.clone(), sync.clone());

        let raw = 500_000;
        assert_eq!(composed.corrected(raw), sync.corrected(vht.corrected(raw)));
        assert!((composed.uncorrected(composed.corrected(raw)) - raw).abs() <= 2);
    }

    #[test]
    fn test_readers_never_see_partial_updates() {
        let clock = ClockDomain::shared();
        let sets: Vec<Anchors> = (0..2)
            .map(|i| {
                Anchors::for_correction(i * 1_000, i * 2_000, PERIOD, i as i32 * 5_000).unwrap()
            })
            .collect();
        clock.commit(sets[0]);

        let writer = {
            let clock = clock.clone();
            let sets = sets.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    clock.commit(sets[i % 2]);
                }
            })
        };
        for _ in 0..10_000 {
            let seen = clock.snapshot();
            assert!(seen == sets[0] || seen == sets[1]);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_round_trip_late_in_a_long_period() {
        let clock = ClockDomain::new();
        clock.update(0, 0, PERIOD, 19_999_999).unwrap();
        let tick = 8_900_012_345;
        assert!((clock.uncorrected(clock.corrected(tick)) - tick).abs() <= 1);

        // Two full periods out in both directions
        for tick in [2 * PERIOD + 40_000_001, -2 * PERIOD - 17] {
            assert!((clock.uncorrected(clock.corrected(tick)) - tick).abs() <= 1);
        }
    }

    proptest! {
        #[test]
        fn test_round_trip_within_one_tick(
            base_theoretical in -1_000_000_000_000i64..1_000_000_000_000,
            skew in -10_000_000i64..10_000_000,
            correction in -20_000_000i32..20_000_000,
            offset in -4 * PERIOD..4 * PERIOD
        ) {
            let clock = ClockDomain::new();
            clock.update(base_theoretical, base_theoretical + skew, PERIOD, correction).unwrap();
            let tick = base_theoretical + skew + offset;
            let back = clock.uncorrected(clock.corrected(tick));
            prop_assert!((back - tick).abs() <= 1, "{} -> {}", tick, back);
        }
    }
}
