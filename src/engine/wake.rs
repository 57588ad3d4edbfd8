//! Price-triggered early wakeups.
//!
//! Consumes the live trade stream, keeps the shared price cache current, and
//! pokes a market's gate when a trade crosses its active range. A breached
//! range means a grid order is likely filling, so waiting out the idle
//! cadence would leave the opposite order unplaced for minutes.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::state::EngineState;
use crate::exchange::types::TradeTick;

pub struct PriceWakeTrigger {
    state: Arc<EngineState>,
}

impl PriceWakeTrigger {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    /// Drain the trade stream until it closes or shutdown is requested.
    pub async fn run(self, mut ticks: mpsc::Receiver<TradeTick>) {
        while let Some(tick) = ticks.recv().await {
            if self.state.is_shutdown() {
                return;
            }
            self.handle(&tick).await;
        }
        debug!("Trade stream closed");
    }

    /// Process one tick. Returns whether a wakeup was issued.
    async fn handle(&self, tick: &TradeTick) -> bool {
        self.state.update_price(&tick.symbol, tick.price).await;

        let Some(runtime) = self.state.market(&tick.symbol) else {
            return false;
        };
        let Some(range) = *runtime.active_range.read().await else {
            return false;
        };
        if range.contains(tick.price) {
            return false;
        }

        let woke = runtime.gate.wake_early();
        if woke {
            debug!(
                symbol = %tick.symbol,
                price = %tick.price,
                min = %range.min,
                max = %range.max,
                "Price crossed active range, waking market"
            );
        }
        woke
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::{ActiveRange, MarketRuntime};
    use rust_decimal_macros::dec;

    async fn state_with_market() -> Arc<EngineState> {
        let mut state = EngineState::new(1);
        let runtime = Arc::new(MarketRuntime::new(1, "BTC/USDC", "BTCUSDC"));
        *runtime.active_range.write().await = Some(ActiveRange {
            min: dec!(59000),
            max: dec!(61000),
        });
        state.insert_market(runtime);
        Arc::new(state)
    }

    fn tick(price: rust_decimal::Decimal) -> TradeTick {
        TradeTick {
            symbol: "BTCUSDC".to_string(),
            price,
        }
    }

    #[tokio::test]
    async fn test_tick_inside_range_does_not_wake() {
        let state = state_with_market().await;
        let trigger = PriceWakeTrigger::new(state.clone());

        assert!(!trigger.handle(&tick(dec!(60000))).await);
        // Price cache still updated.
        assert_eq!(state.price("BTCUSDC").await, Some(dec!(60000)));
    }

    #[tokio::test]
    async fn test_tick_at_bound_wakes_idle_market() {
        let state = state_with_market().await;
        let trigger = PriceWakeTrigger::new(state.clone());

        assert!(trigger.handle(&tick(dec!(61000))).await);
        assert!(trigger.handle(&tick(dec!(58500))).await);
    }

    #[tokio::test]
    async fn test_tick_does_not_wake_busy_market() {
        let state = state_with_market().await;
        state.market("BTCUSDC").unwrap().gate.begin_pass();

        let trigger = PriceWakeTrigger::new(state.clone());
        assert!(!trigger.handle(&tick(dec!(62000))).await);
    }

    #[tokio::test]
    async fn test_unknown_symbol_only_updates_cache() {
        let state = state_with_market().await;
        let trigger = PriceWakeTrigger::new(state.clone());

        let unknown = TradeTick {
            symbol: "ETHUSDC".to_string(),
            price: dec!(2500),
        };
        assert!(!trigger.handle(&unknown).await);
        assert_eq!(state.price("ETHUSDC").await, Some(dec!(2500)));
    }

    #[tokio::test]
    async fn test_no_range_means_no_wake() {
        let state = state_with_market().await;
        *state
            .market("BTCUSDC")
            .unwrap()
            .active_range
            .write()
            .await = None;

        let trigger = PriceWakeTrigger::new(state.clone());
        assert!(!trigger.handle(&tick(dec!(70000))).await);
    }
}
