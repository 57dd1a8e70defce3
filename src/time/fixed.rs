use crate::core::{Error, Result};

/// Unsigned 32.32 fixed-point number, stored as its integer and fractional halves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fixed32 {
    integer: u32,
    fraction: u32,
}

impl Fixed32 {
    /// Exactly one
    pub const ONE: Fixed32 = Fixed32 {
        integer: 1,
        fraction: 0,
    };

    /// Builds the value from its two halves
    pub fn new(integer: u32, fraction: u32) -> Self {
        Fixed32 { integer, fraction }
    }

    /// Builds the value from the raw 64-bit representation
    pub fn from_raw(raw: u64) -> Self {
        Fixed32 {
            integer: (raw >> 32) as u32,
            fraction: raw as u32,
        }
    }

    /// `numerator / denominator`, rounded to the nearest representable value
    pub fn from_ratio(numerator: i64, denominator: i64) -> Result<Self> {
        if numerator < 0 || denominator <= 0 {
            return Err(Error::timing(format!(
                "Ratio {}/{} is not a positive factor",
                numerator, denominator
            )));
        }
        let den = denominator as u128;
        let raw = (((numerator as u128) << 32) + den / 2) / den;
        let raw = u64::try_from(raw).map_err(|_| {
            Error::timing(format!("Ratio {}/{} overflows 32.32", numerator, denominator))
        })?;
        Ok(Self::from_raw(raw))
    }

    /// Integer half
    pub fn integer(&self) -> u32 {
        self.integer
    }

    /// Fractional half, in units of 2^-32
    pub fn fraction(&self) -> u32 {
        self.fraction
    }

    /// Raw 64-bit representation
    pub fn raw(&self) -> u64 {
        (u64::from(self.integer) << 32) | u64::from(self.fraction)
    }

    /// Approximate value, for diagnostics only
    pub fn to_f64(&self) -> f64 {
        self.raw() as f64 / 4_294_967_296.0
    }
}

impl Default for Fixed32 {
    fn default() -> Self {
        Fixed32::ONE
    }
}

/// Multiplies a tick count by a 32.32 factor, rounding half away from zero
///
/// Precondition: the exact product must fit in an `i64`. Products outside
/// that range saturate to `i64::MIN` / `i64::MAX` instead of wrapping.
pub fn mul_fixed(value: i64, factor: Fixed32) -> i64 {
    const HALF: i128 = 1 << 31;
    let product = i128::from(value) * i128::from(factor.raw());
    let rounded = if product >= 0 {
        (product + HALF) >> 32
    } else {
        -((-product + HALF) >> 32)
    };
    i64::try_from(rounded).unwrap_or(if rounded < 0 { i64::MIN } else { i64::MAX })
}

/// Computes `value * numerator / denominator` exactly, rounding half away
/// from zero
///
/// `denominator` must be positive. Results outside the `i64` range saturate.
pub fn mul_ratio(value: i64, numerator: i64, denominator: i64) -> i64 {
    debug_assert!(denominator > 0);
    let product = i128::from(value) * i128::from(numerator);
    let den = i128::from(denominator);
    let half = den / 2;
    let rounded = if product >= 0 {
        (product + half) / den
    } else {
        (product - half) / den
    };
    i64::try_from(rounded).unwrap_or(if rounded < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halves() {
        let half = Fixed32::from_ratio(1, 2).unwrap();
        assert_eq!(half.integer(), 0);
        assert_eq!(half.fraction(), 1 << 31);
        assert_eq!(Fixed32::new(3, 1 << 30).to_f64(), 3.25);
        assert_eq!(Fixed32::from_raw(Fixed32::ONE.raw()), Fixed32::ONE);
    }

    #[test]
    fn test_invalid_ratios() {
        assert!(Fixed32::from_ratio(1, 0).is_err());
        assert!(Fixed32::from_ratio(-1, 5).is_err());
        assert!(Fixed32::from_ratio(i64::MAX, 1).is_err());
        assert!(Fixed32::from_ratio(u32::MAX as i64, 1).is_ok());
    }

    #[test]
    fn test_mul_rounds_half_away_from_zero() {
        let half = Fixed32::from_ratio(1, 2).unwrap();
        assert_eq!(mul_fixed(3, half), 2);
        assert_eq!(mul_fixed(-3, half), -2);
        assert_eq!(mul_fixed(4, half), 2);
        assert_eq!(mul_fixed(0, half), 0);
    }

    #[test]
    fn test_mul_at_overflow_boundary() {
        assert_eq!(mul_fixed(i64::MAX, Fixed32::ONE), i64::MAX);
        assert_eq!(mul_fixed(i64::MIN, Fixed32::ONE), i64::MIN);
        assert_eq!(mul_fixed(i64::MAX / 2, Fixed32::new(2, 0)), i64::MAX - 1);

        let two = Fixed32::new(2, 0);
        assert_eq!(mul_fixed(i64::MAX, two), i64::MAX);
        assert_eq!(mul_fixed(i64::MIN, two), i64::MIN);
        assert_eq!(mul_fixed(i64::MAX, Fixed32::new(u32::MAX, u32::MAX)), i64::MAX);
    }

    #[test]
    fn test_mul_by_ratio_close_to_one() {
        // 10 s period at 1 GHz with a 200 us correction
        let period = 10_000_000_000i64;
        let factor = Fixed32::from_ratio(period, period + 200_000).unwrap();
        assert_eq!(factor.integer(), 0);
        // Factor resolution is 2^-33, about one tick over a 2^33 tick span
        assert!((mul_fixed(period + 200_000, factor) - period).abs() <= 1);
        assert_eq!(mul_fixed(1_000_000, factor), 999_980);
    }

    #[test]
    fn test_mul_ratio_is_exact_over_long_spans() {
        let period = 10_000_000_000i64;
        let stretched = period + 19_999_999;
        assert_eq!(mul_ratio(stretched, period, stretched), period);
        assert_eq!(mul_ratio(-stretched, period, stretched), -period);
        assert_eq!(mul_ratio(3, 1, 2), 2);
        assert_eq!(mul_ratio(-3, 1, 2), -2);
        assert_eq!(mul_ratio(i64::MAX, 3, 2), i64::MAX);
        assert_eq!(mul_ratio(i64::MIN, 3, 2), i64::MIN);
    }
}
