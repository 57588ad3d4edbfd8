//! Exchange integration: gateway trait, Binance spot REST client, trade
//! stream, and the in-process mock used by tests.

pub mod client;
pub mod mock;
pub mod traits;
pub mod types;
pub mod websocket;

pub use client::BinanceSpotClient;
pub use mock::MockExchange;
pub use traits::ExchangeGateway;
pub use types::{
    normalize_symbol, AssetBalance, GatewayOrderStatus, OpenOrder, OrderKind, OrderRequest,
    OrderSnapshot, PlacedOrder, Side, TradeTick,
};
pub use websocket::TradeStream;

#[cfg(test)]
pub use traits::MockExchangeGateway;
