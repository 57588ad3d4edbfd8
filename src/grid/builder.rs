//! Geometric grid construction.
//!
//! Levels are multiplicatively spaced: each rung's buy price is the previous
//! one times `1 + margin/100`, which keeps the percentage profit target
//! constant across the whole range regardless of absolute price level.

use crate::error::GridError;
use crate::utils::decimal::{round_down_to_tick, round_up_to_tick};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Hard cap on generated levels. A misconfigured margin/range pair would
/// otherwise produce unbounded memory and database writes.
pub const MAX_GRID_LEVELS: usize = 10_000;

/// One ladder rung: a buy price and its paired sell target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridLevel {
    pub buy_price: Decimal,
    pub sell_price: Decimal,
}

/// Build grid levels from `entry` to `exit` using multiplicative margin steps.
///
/// Returns an empty vec (not an error) when the inputs cannot produce a grid:
/// non-positive entry/exit, inverted range, or a margin that would never
/// advance the cursor. Emitted buy prices round DOWN to the tick and sell
/// prices round UP, so the realized spread is never narrower than configured.
/// A tick of zero disables quantization.
pub fn build(
    entry_price: Decimal,
    exit_price: Decimal,
    margin_percent: Decimal,
    target_percent: Decimal,
    tick: Decimal,
) -> Result<Vec<GridLevel>, GridError> {
    let mut grid = Vec::new();

    if entry_price <= Decimal::ZERO || exit_price <= Decimal::ZERO || exit_price < entry_price {
        return Ok(grid);
    }
    // margin <= 0 would either loop forever or walk backwards
    if margin_percent <= Decimal::ZERO {
        return Ok(grid);
    }

    let hundred = dec!(100);
    let step = Decimal::ONE + margin_percent / hundred;
    let target = Decimal::ONE + target_percent / hundred;

    // The cursor stays unquantized; only emitted prices snap to the tick.
    let mut price = entry_price;
    while price <= exit_price {
        if grid.len() >= MAX_GRID_LEVELS {
            return Err(GridError::TooManyLevels {
                max: MAX_GRID_LEVELS,
                margin_percent,
            });
        }

        grid.push(GridLevel {
            buy_price: round_down_to_tick(price, tick),
            sell_price: round_up_to_tick(price * target, tick),
        });

        price *= step;
    }

    Ok(grid)
}
