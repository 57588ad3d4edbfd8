//! Exchange-facing type definitions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Limit,
    Market,
}

/// A new-order request for the gateway.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    /// Limit price. Required for LIMIT orders.
    pub price: Option<Decimal>,
    /// Base-asset quantity. Required for LIMIT orders.
    pub quantity: Option<Decimal>,
    /// Quote-notional sizing for MARKET orders (buy exactly N quote units).
    pub quote_notional: Option<Decimal>,
}

impl OrderRequest {
    /// Convenience constructor for a LIMIT order.
    pub fn limit(symbol: impl Into<String>, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit,
            price: Some(price),
            quantity: Some(quantity),
            quote_notional: None,
        }
    }

    /// Convenience constructor for a quote-sized MARKET order.
    pub fn market_quote(symbol: impl Into<String>, side: Side, quote_notional: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            price: None,
            quantity: None,
            quote_notional: Some(quote_notional),
        }
    }
}

/// Acknowledgement of a placed order.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    /// Base quantity executed so far (immediate for MARKET orders).
    pub executed_qty: Decimal,
    /// Quote notional spent so far.
    pub cumulative_quote_qty: Decimal,
}

/// Normalized lifecycle status of an order on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOrderStatus {
    /// Resting on the book (includes partial fills).
    Open,
    /// Fully filled.
    Filled,
    /// Not on the book and never filled (cancelled externally or expired).
    NotOpenNoFill,
}

/// Snapshot of a single order.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub status: GatewayOrderStatus,
}

/// One asset's balance.
#[derive(Debug, Clone)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// A resting order, as listed by the open-orders endpoint.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// One trade from the price stream.
#[derive(Debug, Clone)]
pub struct TradeTick {
    /// Normalized symbol (see [`normalize_symbol`]).
    pub symbol: String,
    pub price: Decimal,
}

/// Normalize a pair string to the key used by the price cache and the
/// market map: separators stripped, uppercased ("btc/usdc" -> "BTCUSDC").
pub fn normalize_symbol(pair: &str) -> String {
    pair.chars()
        .filter(|c| !matches!(c, '/' | '-' | '_'))
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("BTC/USDC"), "BTCUSDC");
        assert_eq!(normalize_symbol("eth-usdt"), "ETHUSDT");
        assert_eq!(normalize_symbol("SOL_USDC"), "SOLUSDC");
        assert_eq!(normalize_symbol("BTCUSDT"), "BTCUSDT");
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
