//! Binance WebSocket trade stream.
//!
//! Feeds live trade prices into the engine's price cache and wake trigger.
//! The stream is advisory only: if it drops, the schedulers keep running on
//! their timer cadence and the supervisor reconnects after a short pause.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::exchange::types::{normalize_symbol, TradeTick};

const SPOT_WS_URL: &str = "wss://stream.binance.com:9443";
const SPOT_TESTNET_WS_URL: &str = "wss://testnet.binance.vision";

#[derive(Debug, Deserialize)]
struct AggTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
}

#[derive(Deserialize)]
struct StreamWrapper {
    data: AggTrade,
}

/// Combined aggTrade stream for a set of symbols.
pub struct TradeStream {
    base_url: String,
}

impl TradeStream {
    pub fn new(testnet: bool) -> Self {
        let base_url = if testnet {
            SPOT_TESTNET_WS_URL.to_string()
        } else {
            SPOT_WS_URL.to_string()
        };
        Self { base_url }
    }

    /// Connect to the combined stream and forward parsed ticks to `tx`.
    ///
    /// Returns once the connection is established; the reader runs in a
    /// spawned task until the socket closes or the receiver is dropped.
    pub async fn subscribe_trades(
        &self,
        symbols: Vec<String>,
        tx: mpsc::Sender<TradeTick>,
    ) -> Result<()> {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@aggTrade", normalize_symbol(s).to_lowercase()))
            .collect();
        let url = format!("{}/stream?streams={}", self.base_url, streams.join("/"));

        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .context("Failed to connect to WebSocket")?;

        let (_write, mut read) = ws_stream.split();

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(tick) = parse_trade(&text) {
                            if tx.send(tick).await.is_err() {
                                warn!("Trade tick receiver dropped");
                                return;
                            }
                        }
                    }
                    Ok(Message::Ping(_)) => {
                        debug!("Received ping");
                        // Pong is handled automatically by tungstenite
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed by server");
                        return;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        return;
                    }
                    _ => {}
                }
            }
        });

        Ok(())
    }
}

fn parse_trade(text: &str) -> Option<TradeTick> {
    let wrapper: StreamWrapper = serde_json::from_str(text).ok()?;
    let price = Decimal::from_str(&wrapper.data.price).ok()?;
    Some(TradeTick {
        symbol: normalize_symbol(&wrapper.data.symbol),
        price,
    })
}
