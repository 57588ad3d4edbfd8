//! Exchange gateway abstraction.
//!
//! Everything the engine needs from a venue sits behind [`ExchangeGateway`],
//! so the scheduler can run against the live REST client or the in-process
//! mock without changing code.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::ExchangeError;
use crate::exchange::types::{
    AssetBalance, OpenOrder, OrderRequest, OrderSnapshot, PlacedOrder,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Latest prices keyed by normalized symbol.
    async fn get_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// Place an order and return the venue's acknowledgement.
    async fn place_order(&self, request: OrderRequest) -> Result<PlacedOrder, ExchangeError>;

    /// Cancel a single order by id.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    /// Cancel every resting order for the symbol. Returns the count cancelled.
    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32, ExchangeError>;

    /// Look up the lifecycle status of a single order.
    async fn get_order(&self, symbol: &str, order_id: &str)
        -> Result<OrderSnapshot, ExchangeError>;

    /// Account balances.
    async fn get_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError>;

    /// Resting orders for the symbol.
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;
}
