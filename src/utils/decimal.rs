//! Decimal-backed rounding for lot quantities.
//!
//! Lot steps such as 0.01 are not representable in binary floating point, so
//! quantities are snapped to their step in `Decimal` and converted back.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value)
}

/// Round to the nearest multiple of `step` (half away from zero).
pub fn round_to_step(value: f64, step: f64) -> f64 {
    snap(value, step, RoundingStrategy::MidpointAwayFromZero)
}

/// Round down to a multiple of `step`.
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    snap(value, step, RoundingStrategy::ToZero)
}

fn snap(value: f64, step: f64, strategy: RoundingStrategy) -> f64 {
    if !(step > 0.0) || !value.is_finite() {
        return value;
    }
    let (Some(value_dec), Some(step_dec)) = (to_decimal(value), to_decimal(step)) else {
        return value;
    };
    if step_dec.is_zero() {
        return value;
    }

    let units = (value_dec / step_dec).round_dp_with_strategy(0, strategy);
    (units * step_dec).to_f64().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_step() {
        assert_eq!(round_to_step(0.123, 0.01), 0.12);
        assert_eq!(round_to_step(0.125, 0.01), 0.13);
        assert_eq!(round_to_step(1.0, 0.01), 1.0);
        assert_eq!(round_to_step(7.4, 1.0), 7.0);
    }

    #[test]
    fn test_floor_to_step() {
        assert_eq!(floor_to_step(0.6079, 0.01), 0.6);
        assert_eq!(floor_to_step(0.3, 0.1), 0.3);
        assert_eq!(floor_to_step(1.999, 0.5), 1.5);
    }

    #[test]
    fn test_step_products_are_clean() {
        // 3 * 0.1 in binary floating point is 0.30000000000000004
        let snapped = round_to_step(0.1 * 3.0, 0.1);
        assert_eq!(to_decimal(snapped).unwrap(), dec!(0.3));
    }

    #[test]
    fn test_degenerate_step_passes_through() {
        assert_eq!(round_to_step(0.1234, 0.0), 0.1234);
        assert_eq!(floor_to_step(0.1234, -1.0), 0.1234);
    }
}
