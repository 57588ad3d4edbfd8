//! Profit recycling.
//!
//! Cycle profits accumulate per market; once the accumulator clears the
//! threshold, a market buy converts that quote amount back into the base
//! asset. The remainder stays in the accumulator for the next cycle.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::exchange::types::{normalize_symbol, OrderRequest, Side};
use crate::exchange::ExchangeGateway;
use crate::persistence::MarketConfig;

pub struct RebuyManager {
    gateway: Arc<dyn ExchangeGateway>,
    /// Accumulated profit needed before a rebuy fires; also the quote
    /// notional spent per rebuy.
    threshold: Decimal,
}

impl RebuyManager {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, threshold: Decimal) -> Self {
        Self { gateway, threshold }
    }

    /// Credit a cycle profit and fire the rebuy it unlocks, if any.
    ///
    /// Mutates the accumulator fields on `config`; the caller persists the
    /// row. A failed market buy leaves the accumulator intact so the amount
    /// is retried on the next profit.
    pub async fn on_profit(&self, config: &mut MarketConfig, profit: Decimal) {
        if !config.rebuy_enabled || profit <= Decimal::ZERO {
            return;
        }

        config.rebuy_value += profit;
        if config.rebuy_value < self.threshold {
            return;
        }

        let symbol = normalize_symbol(&config.pair);
        let spend = self.threshold;
        let request = OrderRequest::market_quote(symbol, Side::Buy, spend);
        match self.gateway.place_order(request).await {
            Ok(placed) => {
                // Venue-reported notional when the ack carries one; market
                // fills can come in under the requested amount.
                let spent = if placed.cumulative_quote_qty > Decimal::ZERO {
                    placed.cumulative_quote_qty
                } else {
                    spend
                };
                config.rebuy_value -= spent;
                config.rebought_value += spent;
                config.rebought_coin += placed.executed_qty;
                info!(
                    pair = %config.pair,
                    spent = %spent,
                    acquired = %placed.executed_qty,
                    remaining = %config.rebuy_value,
                    "Rebuy executed"
                );
            }
            Err(e) => {
                warn!(pair = %config.pair, error = %e, "Rebuy order failed, keeping accumulator");
            }
        }
    }
}
