//! Utility module
//!
//! Integer helpers shared by the controllers and the clock transforms.

use crate::core::Ticks;

/// Divides rounding half away from zero, as `(value ± divisor/2) / divisor`
///
/// `divisor` must be positive.
pub fn round_div(value: i64, divisor: i64) -> i64 {
    debug_assert!(divisor > 0);
    let half = divisor / 2;
    if value >= 0 {
        value.saturating_add(half) / divisor
    } else {
        value.saturating_sub(half) / divisor
    }
}

/// Narrows to `i32`, saturating at the bounds
pub fn saturate_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Converts a duration to ticks of a timer running at `frequency` Hz
pub fn duration_to_ticks(duration: std::time::Duration, frequency: u64) -> Ticks {
    let ticks = duration.as_nanos() * u128::from(frequency) / 1_000_000_000;
    Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_round_div_is_sign_aware() {
        assert_eq!(round_div(99_200, 512), 194);
        assert_eq!(round_div(256, 512), 1);
        assert_eq!(round_div(255, 512), 0);
        assert_eq!(round_div(-256, 512), -1);
        assert_eq!(round_div(-255, 512), 0);
        assert_eq!(round_div(-32_800, 512), -64);
        assert_eq!(round_div(12, 8), 2);
        assert_eq!(round_div(-12, 8), -2);
    }

    #[test]
    fn test_saturate_i32() {
        assert_eq!(saturate_i32(42), 42);
        assert_eq!(saturate_i32(i64::MAX), i32::MAX);
        assert_eq!(saturate_i32(i64::MIN), i32::MIN);
    }

    #[test]
    fn test_duration_to_ticks() {
        assert_eq!(duration_to_ticks(Duration::from_micros(100), 1_000_000_000), 100_000);
        assert_eq!(duration_to_ticks(Duration::from_secs(10), 32_768), 327_680);
        assert_eq!(duration_to_ticks(Duration::from_millis(6), 48_000_000), 288_000);
    }
}
