//! Order-block capital reservation.
//!
//! Spare quote balance is parked in a deep limit buy so it cannot be spent
//! by anything else, and is released (cancelled) whenever the scheduler
//! needs it for a grid order. The reservation is re-established at the end
//! of every pass from whatever balance is left.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ExchangeError};
use crate::exchange::types::{normalize_symbol, OrderRequest, Side};
use crate::exchange::ExchangeGateway;
use crate::persistence::{ConfigRepository, MarketConfig};
use crate::utils::decimal::truncate_dp;

pub struct CapitalReservation {
    gateway: Arc<dyn ExchangeGateway>,
    repo: Arc<dyn ConfigRepository>,
    quote_asset: String,
    /// Quote amount always left free.
    buffer: Decimal,
    /// Settle time before reading balances after cancels.
    sync_delay: Duration,
    balance_timeout: Duration,
}

impl CapitalReservation {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        repo: Arc<dyn ConfigRepository>,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            gateway,
            repo,
            quote_asset: engine.quote_asset.clone(),
            buffer: engine.block_usd_buffer,
            sync_delay: Duration::from_millis(engine.balance_sync_ms),
            balance_timeout: Duration::from_secs(engine.balance_timeout_secs),
        }
    }

    /// Release the reservation so its quote is spendable.
    ///
    /// An order the venue no longer knows about is treated as already
    /// released; id cleanup still happens.
    pub async fn cancel(&self, config: &mut MarketConfig) {
        let Some(order_id) = config.order_block_id.take() else {
            return;
        };

        let symbol = normalize_symbol(&config.pair);
        match self.gateway.cancel_order(&symbol, &order_id).await {
            Ok(()) => debug!(pair = %config.pair, order_id, "Reservation released"),
            Err(ExchangeError::OrderNotFound { .. }) => {
                debug!(pair = %config.pair, order_id, "Reservation already gone")
            }
            Err(e) => warn!(pair = %config.pair, order_id, error = %e, "Failed to cancel reservation"),
        }

        if let Err(e) = self.repo.set_order_block(config.id, None) {
            warn!(pair = %config.pair, error = %e, "Failed to clear reservation id");
        }
    }

    /// Park the spendable quote balance back into a reservation order.
    pub async fn ensure(&self, config: &mut MarketConfig) -> Result<(), EngineError> {
        self.cancel(config).await;

        // Let the cancel settle before reading balances.
        tokio::time::sleep(self.sync_delay).await;

        let balances = tokio::time::timeout(self.balance_timeout, self.gateway.get_balances())
            .await
            .map_err(|_| ExchangeError::Timeout(self.balance_timeout))??;

        let free = balances
            .iter()
            .find(|b| b.asset == self.quote_asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO);

        let spendable = free - self.buffer;
        if spendable <= Decimal::ZERO {
            debug!(pair = %config.pair, %free, "No spare quote to reserve");
            return Ok(());
        }

        if config.order_block_price <= Decimal::ZERO {
            warn!(pair = %config.pair, price = %config.order_block_price, "Invalid reservation price, skipping");
            return Ok(());
        }

        let quantity = truncate_dp(spendable / config.order_block_price, config.decimal_quantity);
        if quantity <= Decimal::ZERO {
            return Ok(());
        }

        let symbol = normalize_symbol(&config.pair);
        let placed = self
            .gateway
            .place_order(OrderRequest::limit(
                symbol,
                Side::Buy,
                config.order_block_price,
                quantity,
            ))
            .await?;

        info!(
            pair = %config.pair,
            order_id = %placed.order_id,
            price = %config.order_block_price,
            %quantity,
            "Reservation placed"
        );

        config.order_block_id = Some(placed.order_id.clone());
        if let Err(e) = self.repo.set_order_block(config.id, Some(&placed.order_id)) {
            warn!(pair = %config.pair, error = %e, "Failed to persist reservation id");
        }
        Ok(())
    }
}
