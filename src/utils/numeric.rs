//! Numeric helpers for commodity-denominated quantities
//!
//! Summation across splits is always exact; these helpers apply the final
//! half-up rounding at a commodity's smallest-unit denominator.

use bigdecimal::{BigDecimal, RoundingMode};

/// Round a quantity to the nearest multiple of `1 / fraction`, ties away
/// from zero. A non-positive fraction leaves the value untouched.
pub fn round_to_fraction(value: &BigDecimal, fraction: i64) -> BigDecimal {
    if fraction <= 0 {
        return value.clone();
    }
    let denom = BigDecimal::from(fraction);
    let scaled = (value * &denom).with_scale_round(0, RoundingMode::HalfUp);
    scaled / denom
}

/// Subtract `b` from `a`, rounding the result at `fraction`
pub fn sub_rounded(a: &BigDecimal, b: &BigDecimal, fraction: i64) -> BigDecimal {
    round_to_fraction(&(a - b), fraction)
}

/// Whether two quantities agree when both are rounded at `fraction`
pub fn same_at_fraction(a: &BigDecimal, b: &BigDecimal, fraction: i64) -> bool {
    round_to_fraction(a, fraction) == round_to_fraction(b, fraction)
}
