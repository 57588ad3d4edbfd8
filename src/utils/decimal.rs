//! Decimal arithmetic utilities for price and quantity handling.

use rust_decimal::Decimal;

/// Round a price down to the nearest multiple of the tick size.
///
/// A zero or negative tick disables quantization.
pub fn round_down_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    (value / tick).floor() * tick
}

/// Round a price up to the nearest multiple of the tick size.
pub fn round_up_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    (value / tick).ceil() * tick
}

/// Truncate a quantity to `decimals` decimal places without rounding.
///
/// Exchanges reject quantities that exceed the symbol's step precision, and
/// rounding up can turn a valid balance into "insufficient funds".
pub fn truncate_dp(value: Decimal, decimals: u32) -> Decimal {
    value.trunc_with_scale(decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_down_to_tick() {
        assert_eq!(round_down_to_tick(dec!(61080.7), dec!(1)), dec!(61080));
        assert_eq!(
            round_down_to_tick(dec!(50123.456), dec!(0.01)),
            dec!(50123.45)
        );
        assert_eq!(round_down_to_tick(dec!(99.99), dec!(0)), dec!(99.99));
    }

    #[test]
    fn test_round_up_to_tick() {
        assert_eq!(round_up_to_tick(dec!(61080.1), dec!(1)), dec!(61081));
        assert_eq!(round_up_to_tick(dec!(61080), dec!(1)), dec!(61080));
        assert_eq!(round_up_to_tick(dec!(50123.451), dec!(0.01)), dec!(50123.46));
    }

    #[test]
    fn test_truncate_dp() {
        assert_eq!(truncate_dp(dec!(1.56789), 2), dec!(1.56));
        assert_eq!(truncate_dp(dec!(1.5), 4), dec!(1.5));
        assert_eq!(truncate_dp(dec!(0.0019), 3), dec!(0.001));
    }
}
