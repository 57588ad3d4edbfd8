//! Target-percent sweep over a fixed candle set.
//!
//! Rebuilds the grid for each candidate target percentage and replays the
//! same candles, reporting the percentage that maximises net profit.

use crate::backtest::data::Candle;
use crate::backtest::simulator::{simulate, SimulationConfig};
use crate::error::GridError;
use crate::grid;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

/// Parameters for one sweep run.
#[derive(Debug, Clone)]
pub struct SweepParams {
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub margin_percent: Decimal,
    pub tick: Decimal,
    pub from_percent: Decimal,
    pub to_percent: Decimal,
    pub step_percent: Decimal,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            entry_price: Decimal::ZERO,
            exit_price: Decimal::ZERO,
            margin_percent: Decimal::ZERO,
            tick: Decimal::ZERO,
            from_percent: dec!(1.0),
            to_percent: dec!(3.2),
            step_percent: dec!(0.1),
        }
    }
}

/// Best target percentage found by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub target_percent: Decimal,
    pub cycles: u64,
    pub total_profit: Decimal,
}

/// Sweep target percentages from `from_percent` to `to_percent` inclusive.
pub fn sweep_target_percent(
    params: &SweepParams,
    candles: &[Candle],
    sim: &SimulationConfig,
) -> Result<Option<SweepOutcome>, GridError> {
    let mut best: Option<SweepOutcome> = None;

    let mut percent = params.from_percent.round_dp(1);
    while percent <= params.to_percent {
        let levels = grid::build(
            params.entry_price,
            params.exit_price,
            params.margin_percent,
            percent,
            params.tick,
        )?;
        let result = simulate(&levels, candles, sim);

        info!(
            target_percent = %percent,
            cycles = result.cycles,
            profit = %result.total_profit.round_dp(2),
            "sweep step"
        );

        let better = match &best {
            Some(b) => result.total_profit > b.total_profit,
            None => true,
        };
        if better {
            best = Some(SweepOutcome {
                target_percent: percent,
                cycles: result.cycles,
                total_profit: result.total_profit,
            });
        }

        percent = (percent + params.step_percent).round_dp(1);
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(low: Decimal, high: Decimal) -> Candle {
        Candle {
            open_time: 0,
            open: low,
            high,
            low,
            close: high,
        }
    }

    #[test]
    fn test_sweep_prefers_wider_target_when_both_fill() {
        // Candles span the whole range, so every target percentage
        // completes its cycles; the widest spread earns the most.
        let candles = vec![candle(dec!(95), dec!(105)), candle(dec!(95), dec!(110))];
        let params = SweepParams {
            entry_price: dec!(100),
            exit_price: dec!(100),
            margin_percent: dec!(1),
            tick: Decimal::ZERO,
            from_percent: dec!(1.0),
            to_percent: dec!(2.0),
            step_percent: dec!(0.5),
        };
        let sim = SimulationConfig {
            usd_per_order: dec!(100),
            fee_rate_per_side: Decimal::ZERO,
        };

        let best = sweep_target_percent(&params, &candles, &sim)
            .unwrap()
            .unwrap();
        assert_eq!(best.target_percent, dec!(2.0));
        assert!(best.cycles >= 1);
    }

    #[test]
    fn test_sweep_over_empty_candles_yields_zero_profit_best() {
        let params = SweepParams {
            entry_price: dec!(100),
            exit_price: dec!(110),
            margin_percent: dec!(1),
            tick: Decimal::ZERO,
            from_percent: dec!(1.0),
            to_percent: dec!(1.2),
            step_percent: dec!(0.1),
        };
        let sim = SimulationConfig {
            usd_per_order: dec!(100),
            fee_rate_per_side: Decimal::ZERO,
        };

        let best = sweep_target_percent(&params, &[], &sim).unwrap().unwrap();
        assert_eq!(best.cycles, 0);
        assert_eq!(best.total_profit, Decimal::ZERO);
        assert_eq!(best.target_percent, dec!(1.0));
    }
}
