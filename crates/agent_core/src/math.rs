//! Fixed-point math utilities.
//!
//! The engine never uses floating point: fractional quantities (water income,
//! per-role power-usage estimates, candidate scores) use 64.32 fixed-point so
//! that identical snapshots always produce identical decisions.

use fixed::types::I96F32;

/// Fixed-point number used for all fractional engine math.
pub type Fixed = I96F32;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fx(n: i64) -> Fixed {
    Fixed::from_num(n)
}

/// Create a fixed-point ratio `num / den`.
///
/// # Panics
///
/// Panics if `den` is zero.
#[must_use]
pub fn ratio(num: i64, den: i64) -> Fixed {
    assert!(den != 0, "ratio denominator must be non-zero");
    Fixed::from_num(num) / Fixed::from_num(den)
}

/// Floor a fixed-point number to an integer.
#[must_use]
pub fn floor(x: Fixed) -> i64 {
    x.floor().to_num::<i64>()
}

/// Ceil a fixed-point number to an integer.
#[must_use]
pub fn ceil(x: Fixed) -> i64 {
    x.ceil().to_num::<i64>()
}

/// Integer ceiling division for non-negative operands.
#[must_use]
pub fn div_ceil(num: i64, den: i64) -> i64 {
    assert!(den > 0);
    (num + den - 1).max(0) / den
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_and_floor() {
        assert_eq!(floor(ratio(7, 2)), 3);
        assert_eq!(ceil(ratio(7, 2)), 4);
        assert_eq!(floor(fx(5)), 5);
    }

    #[test]
    fn test_div_ceil() {
        assert_eq!(div_ceil(0, 20), 0);
        assert_eq!(div_ceil(1, 20), 1);
        assert_eq!(div_ceil(20, 20), 1);
        assert_eq!(div_ceil(21, 20), 2);
    }

    #[test]
    fn test_fixed_determinism() {
        let a = ratio(1, 3) + ratio(1, 3) + ratio(1, 3);
        let b = ratio(1, 3) + ratio(1, 3) + ratio(1, 3);
        assert_eq!(a, b);
    }
}
