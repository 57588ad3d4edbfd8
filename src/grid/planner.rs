//! Capital requirement planning for a built grid.
//!
//! Advisory output only: the planner tells the operator how much base asset
//! an up-trend needs (levels whose sell target sits above the current price
//! must already hold inventory) and how much quote currency a down-trend
//! reserves (one order's worth per level below the price).

use crate::grid::builder::GridLevel;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Capital requirements and per-cycle profit estimate for a grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapitalPlan {
    /// Base asset quantity needed to arm all levels above the current price.
    pub base_needed: Decimal,
    /// Quote value of `base_needed` at the current price.
    pub base_value_usd: Decimal,
    /// Worst-case quote reservation for the levels below the current price.
    pub quote_needed: Decimal,
    pub levels_above: usize,
    pub levels_below: usize,
    pub gross_profit_per_cycle: Decimal,
    pub fee_per_cycle: Decimal,
    pub net_profit_per_cycle: Decimal,
    /// Profit from buying `base_needed` today and selling it all at the exit
    /// price, i.e. the directional upside of arming the grid now.
    pub profit_if_sold_at_exit: Decimal,
}

/// Compute the capital plan for a grid at an assumed current price.
pub fn plan(
    grid: &[GridLevel],
    current_price: Decimal,
    exit_price: Decimal,
    usd_per_level: Decimal,
    target_percent: Decimal,
    fee_rate_per_side: Decimal,
    decimal_quantity: u32,
) -> CapitalPlan {
    let mut base_needed = Decimal::ZERO;
    let mut levels_above = 0usize;
    let mut levels_below = 0usize;

    for level in grid {
        if level.buy_price <= Decimal::ZERO {
            continue;
        }
        let quantity = (usd_per_level / level.buy_price).round_dp(decimal_quantity);
        if level.sell_price > current_price {
            base_needed += quantity;
            levels_above += 1;
        } else {
            levels_below += 1;
        }
    }

    let quote_needed = Decimal::from(levels_below as u64) * usd_per_level;
    let base_value_usd = base_needed * current_price;

    let gross_profit_per_cycle = usd_per_level * target_percent / dec!(100);
    let fee_per_cycle = usd_per_level * fee_rate_per_side * dec!(2);
    let net_profit_per_cycle = gross_profit_per_cycle - fee_per_cycle;

    let profit_if_sold_at_exit = base_needed * exit_price - base_value_usd;

    CapitalPlan {
        base_needed,
        base_value_usd,
        quote_needed,
        levels_above,
        levels_below,
        gross_profit_per_cycle,
        fee_per_cycle,
        net_profit_per_cycle,
        profit_if_sold_at_exit,
    }
}
