//! In-process mock exchange for scheduler and integration tests.
//!
//! Keeps a real order book lifecycle (open, filled, gone) behind the
//! [`ExchangeGateway`] trait, with test controls to move prices, fill resting
//! orders, and make orders vanish the way an external cancel would.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::traits::ExchangeGateway;
use crate::exchange::types::{
    AssetBalance, GatewayOrderStatus, OpenOrder, OrderKind, OrderRequest, OrderSnapshot,
    PlacedOrder, Side,
};

/// A single order held by the mock.
#[derive(Debug, Clone)]
pub struct MockOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: GatewayOrderStatus,
}

#[derive(Debug, Default)]
struct MockState {
    prices: HashMap<String, Decimal>,
    balances: HashMap<String, AssetBalance>,
    orders: HashMap<String, MockOrder>,
    rejected_prices: Vec<Decimal>,
}

/// Mock exchange with scriptable fills.
pub struct MockExchange {
    state: Arc<RwLock<MockState>>,
    order_id_counter: AtomicU64,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            order_id_counter: AtomicU64::new(1),
        }
    }

    fn next_order_id(&self) -> String {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    // ==================== Test controls ====================

    /// Set the current price for a symbol.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    /// Set the free balance for an asset (locked left at zero).
    pub async fn set_balance(&self, asset: &str, free: Decimal) {
        self.state.write().await.balances.insert(
            asset.to_string(),
            AssetBalance {
                asset: asset.to_string(),
                free,
                locked: Decimal::ZERO,
            },
        );
    }

    /// Mark a resting order as fully filled.
    pub async fn fill_order(&self, order_id: &str) {
        if let Some(order) = self.state.write().await.orders.get_mut(order_id) {
            order.status = GatewayOrderStatus::Filled;
        }
    }

    /// Make an order disappear without a fill, as an external cancel would.
    pub async fn vanish_order(&self, order_id: &str) {
        if let Some(order) = self.state.write().await.orders.get_mut(order_id) {
            order.status = GatewayOrderStatus::NotOpenNoFill;
        }
    }

    /// Snapshot of a single order for assertions.
    pub async fn order(&self, order_id: &str) -> Option<MockOrder> {
        self.state.read().await.orders.get(order_id).cloned()
    }

    /// All orders ever placed, in placement order.
    pub async fn placed_orders(&self) -> Vec<MockOrder> {
        let state = self.state.read().await;
        let mut orders: Vec<MockOrder> = state.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.order_id.parse::<u64>().unwrap_or(u64::MAX));
        orders
    }

    /// Reject limit orders at this exact price until cleared.
    pub async fn reject_orders_at(&self, price: Decimal) {
        self.state.write().await.rejected_prices.push(price);
    }

    /// Accept orders at every price again.
    pub async fn clear_rejections(&self) {
        self.state.write().await.rejected_prices.clear();
    }

    /// Count of orders still resting for a symbol.
    pub async fn open_order_count(&self, symbol: &str) -> usize {
        self.state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.status == GatewayOrderStatus::Open)
            .count()
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn get_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        Ok(self.state.read().await.prices.clone())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        let order_id = self.next_order_id();
        let (price, quantity, status) = match request.kind {
            OrderKind::Limit => {
                let price = request.price.ok_or_else(|| {
                    ExchangeError::Rejected("limit order without a price".to_string())
                })?;
                let quantity = request.quantity.ok_or_else(|| {
                    ExchangeError::Rejected("limit order without a quantity".to_string())
                })?;
                if self.state.read().await.rejected_prices.contains(&price) {
                    return Err(ExchangeError::Rejected("insufficient balance".to_string()));
                }
                (price, quantity, GatewayOrderStatus::Open)
            }
            OrderKind::Market => {
                // Market orders fill immediately at the current price.
                let price = self
                    .state
                    .read()
                    .await
                    .prices
                    .get(&request.symbol)
                    .copied()
                    .ok_or_else(|| {
                        ExchangeError::Rejected(format!("no price for {}", request.symbol))
                    })?;
                let quantity = match (request.quantity, request.quote_notional) {
                    (Some(q), _) => q,
                    (None, Some(quote)) => quote / price,
                    (None, None) => {
                        return Err(ExchangeError::Rejected(
                            "market order without a size".to_string(),
                        ))
                    }
                };
                (price, quantity, GatewayOrderStatus::Filled)
            }
        };

        debug!(order_id, symbol = %request.symbol, side = %request.side, %price, %quantity, "mock order placed");

        let order = MockOrder {
            order_id: order_id.clone(),
            symbol: request.symbol,
            side: request.side,
            kind: request.kind,
            price,
            quantity,
            status,
        };
        let executed = if status == GatewayOrderStatus::Filled {
            quantity
        } else {
            Decimal::ZERO
        };
        // Quote-sized market fills report the requested notional, as the
        // venue does; everything else reports executed * price.
        let quote_spent = match (status, request.quote_notional) {
            (GatewayOrderStatus::Filled, Some(quote)) => quote,
            _ => executed * price,
        };
        let placed = PlacedOrder {
            order_id: order_id.clone(),
            executed_qty: executed,
            cumulative_quote_qty: quote_spent,
        };
        self.state.write().await.orders.insert(order_id, order);
        Ok(placed)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(order_id) {
            Some(order) if order.status == GatewayOrderStatus::Open => {
                order.status = GatewayOrderStatus::NotOpenNoFill;
                Ok(())
            }
            Some(_) | None => Err(ExchangeError::OrderNotFound {
                order_id: order_id.to_string(),
            }),
        }
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32, ExchangeError> {
        let mut state = self.state.write().await;
        let mut cancelled = 0;
        for order in state.orders.values_mut() {
            if order.symbol == symbol && order.status == GatewayOrderStatus::Open {
                order.status = GatewayOrderStatus::NotOpenNoFill;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn get_order(
        &self,
        _symbol: &str,
        order_id: &str,
    ) -> Result<OrderSnapshot, ExchangeError> {
        let state = self.state.read().await;
        match state.orders.get(order_id) {
            Some(order) => Ok(OrderSnapshot {
                order_id: order.order_id.clone(),
                status: order.status,
            }),
            // Unknown ids read as cancelled-without-fill, matching the live
            // client's handling of the venue's not-found error.
            None => Ok(OrderSnapshot {
                order_id: order_id.to_string(),
                status: GatewayOrderStatus::NotOpenNoFill,
            }),
        }
    }

    async fn get_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        Ok(self.state.read().await.balances.values().cloned().collect())
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.status == GatewayOrderStatus::Open)
            .map(|o| OpenOrder {
                order_id: o.order_id.clone(),
                symbol: o.symbol.clone(),
                side: o.side,
                price: o.price,
                quantity: o.quantity,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_limit_order_lifecycle() {
        let exchange = MockExchange::new();
        let placed = exchange
            .place_order(OrderRequest::limit(
                "BTCUSDC",
                Side::Buy,
                dec!(60000),
                dec!(0.001),
            ))
            .await
            .unwrap();

        let snapshot = exchange.get_order("BTCUSDC", &placed.order_id).await.unwrap();
        assert_eq!(snapshot.status, GatewayOrderStatus::Open);

        exchange.fill_order(&placed.order_id).await;
        let snapshot = exchange.get_order("BTCUSDC", &placed.order_id).await.unwrap();
        assert_eq!(snapshot.status, GatewayOrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_cancel_removes_from_open_orders() {
        let exchange = MockExchange::new();
        let placed = exchange
            .place_order(OrderRequest::limit(
                "BTCUSDC",
                Side::Sell,
                dec!(61000),
                dec!(0.001),
            ))
            .await
            .unwrap();
        assert_eq!(exchange.open_order_count("BTCUSDC").await, 1);

        exchange.cancel_order("BTCUSDC", &placed.order_id).await.unwrap();
        assert_eq!(exchange.open_order_count("BTCUSDC").await, 0);

        let snapshot = exchange.get_order("BTCUSDC", &placed.order_id).await.unwrap();
        assert_eq!(snapshot.status, GatewayOrderStatus::NotOpenNoFill);
    }

    #[tokio::test]
    async fn test_unknown_order_reads_as_no_fill() {
        let exchange = MockExchange::new();
        let snapshot = exchange.get_order("BTCUSDC", "does-not-exist").await.unwrap();
        assert_eq!(snapshot.status, GatewayOrderStatus::NotOpenNoFill);
    }

    #[tokio::test]
    async fn test_market_order_fills_at_current_price() {
        let exchange = MockExchange::new();
        exchange.set_price("BTCUSDC", dec!(50000)).await;

        let placed = exchange
            .place_order(OrderRequest::market_quote("BTCUSDC", Side::Buy, dec!(100)))
            .await
            .unwrap();
        assert_eq!(placed.executed_qty, dec!(0.002));
        assert_eq!(placed.cumulative_quote_qty, dec!(100));
    }

    #[tokio::test]
    async fn test_cancel_all_counts_only_open() {
        let exchange = MockExchange::new();
        for price in [dec!(59000), dec!(58000), dec!(57000)] {
            exchange
                .place_order(OrderRequest::limit("BTCUSDC", Side::Buy, price, dec!(0.001)))
                .await
                .unwrap();
        }
        let first = exchange.placed_orders().await[0].order_id.clone();
        exchange.fill_order(&first).await;

        let cancelled = exchange.cancel_all_orders("BTCUSDC").await.unwrap();
        assert_eq!(cancelled, 2);
        assert_eq!(exchange.open_order_count("BTCUSDC").await, 0);
    }
}
