//! Binance spot REST client.
//!
//! Implements [`ExchangeGateway`] over the signed `/api/v3` endpoints. Every
//! request is wrapped in a hard timeout so a stalled venue surfaces as
//! [`ExchangeError::Timeout`] instead of hanging a scheduler pass.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::exchange::traits::ExchangeGateway;
use crate::exchange::types::{
    normalize_symbol, AssetBalance, GatewayOrderStatus, OpenOrder, OrderKind, OrderRequest,
    OrderSnapshot, PlacedOrder, Side,
};

const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Binance error code for "Order does not exist".
const CODE_ORDER_NOT_FOUND: i64 = -2013;

/// Binance spot API client.
pub struct BinanceSpotClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceTicker {
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: u64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    executed_qty: Option<Decimal>,
    // Binance spells this field with the double "m".
    #[serde(default, with = "rust_decimal::serde::str_option")]
    cummulative_quote_qty: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderStatusResponse {
    order_id: u64,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderResponse {
    order_id: u64,
    symbol: String,
    side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    orig_qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    locked: Decimal,
}

impl BinanceSpotClient {
    /// Create a client from configuration.
    pub fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        let base_url = if let Some(url) = &config.base_url {
            url.clone()
        } else if config.testnet {
            SPOT_TESTNET_URL.to_string()
        } else {
            SPOT_BASE_URL.to_string()
        };
        Self::with_base_url(&config.api_key, &config.secret_key, base_url)
    }

    /// Create a client pointed at an explicit base URL.
    pub fn with_base_url(
        api_key: &str,
        secret_key: &str,
        base_url: String,
    ) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            base_url,
            request_timeout: Duration::from_secs(10),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    fn query_string(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Execute a signed request and decode the JSON body, mapping Binance
    /// error payloads and deadline overruns to [`ExchangeError`].
    async fn signed_request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let mut signed = params.to_vec();
        let ts = Self::timestamp().to_string();
        signed.push(("timestamp", ts));
        let query = Self::query_string(&signed);
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let request = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send();

        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| ExchangeError::Timeout(self.request_timeout))??;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Self::map_api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ExchangeError::InvalidResponse(format!("{e}: {}", truncate_body(&body)))
        })
    }

    fn map_api_error(status: StatusCode, body: &str) -> ExchangeError {
        match serde_json::from_str::<ApiError>(body) {
            Ok(api) if api.code == CODE_ORDER_NOT_FOUND => ExchangeError::OrderNotFound {
                order_id: String::new(),
            },
            Ok(api) => ExchangeError::Rejected(format!("code {}: {}", api.code, api.msg)),
            Err(_) => {
                ExchangeError::InvalidResponse(format!("HTTP {status}: {}", truncate_body(body)))
            }
        }
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(256).collect()
}

fn map_status(status: &str) -> Result<GatewayOrderStatus, ExchangeError> {
    match status {
        "NEW" | "PARTIALLY_FILLED" => Ok(GatewayOrderStatus::Open),
        "FILLED" => Ok(GatewayOrderStatus::Filled),
        "CANCELED" | "PENDING_CANCEL" | "EXPIRED" | "REJECTED" | "EXPIRED_IN_MATCH" => {
            Ok(GatewayOrderStatus::NotOpenNoFill)
        }
        other => Err(ExchangeError::InvalidResponse(format!(
            "unknown order status {other}"
        ))),
    }
}

#[async_trait]
impl ExchangeGateway for BinanceSpotClient {
    #[instrument(skip(self))]
    async fn get_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let request = self.http.get(&url).send();
        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| ExchangeError::Timeout(self.request_timeout))??;

        let tickers: Vec<PriceTicker> = response.json().await?;
        Ok(tickers
            .into_iter()
            .map(|t| (normalize_symbol(&t.symbol), t.price))
            .collect())
    }

    #[instrument(skip(self), fields(symbol = %request.symbol, side = %request.side))]
    async fn place_order(&self, request: OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.as_str().to_string()),
        ];

        match request.kind {
            OrderKind::Limit => {
                let price = request.price.ok_or_else(|| {
                    ExchangeError::Rejected("limit order without a price".to_string())
                })?;
                let quantity = request.quantity.ok_or_else(|| {
                    ExchangeError::Rejected("limit order without a quantity".to_string())
                })?;
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "GTC".to_string()));
                params.push(("price", price.to_string()));
                params.push(("quantity", quantity.to_string()));
            }
            OrderKind::Market => {
                params.push(("type", "MARKET".to_string()));
                if let Some(quote) = request.quote_notional {
                    params.push(("quoteOrderQty", quote.to_string()));
                } else if let Some(quantity) = request.quantity {
                    params.push(("quantity", quantity.to_string()));
                } else {
                    return Err(ExchangeError::Rejected(
                        "market order without a size".to_string(),
                    ));
                }
            }
        }

        debug!(?request, "placing order");

        let ack: OrderAck = self
            .signed_request(Method::POST, "/api/v3/order", &params)
            .await?;

        Ok(PlacedOrder {
            order_id: ack.order_id.to_string(),
            executed_qty: ack.executed_qty.unwrap_or_default(),
            cumulative_quote_qty: ack.cummulative_quote_qty.unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let _: OrderStatusResponse = self
            .signed_request(Method::DELETE, "/api/v3/order", &params)
            .await
            .map_err(|e| match e {
                ExchangeError::OrderNotFound { .. } => ExchangeError::OrderNotFound {
                    order_id: order_id.to_string(),
                },
                other => other,
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32, ExchangeError> {
        let params = [("symbol", symbol.to_string())];
        let cancelled: Vec<OrderStatusResponse> = self
            .signed_request(Method::DELETE, "/api/v3/openOrders", &params)
            .await?;
        Ok(cancelled.len() as u32)
    }

    #[instrument(skip(self))]
    async fn get_order(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderSnapshot, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let response: Result<OrderStatusResponse, ExchangeError> = self
            .signed_request(Method::GET, "/api/v3/order", &params)
            .await;

        match response {
            Ok(order) => Ok(OrderSnapshot {
                order_id: order.order_id.to_string(),
                status: map_status(&order.status)?,
            }),
            // An order the venue no longer knows about is equivalent to
            // cancelled-without-fill for the caller.
            Err(ExchangeError::OrderNotFound { .. }) => Ok(OrderSnapshot {
                order_id: order_id.to_string(),
                status: GatewayOrderStatus::NotOpenNoFill,
            }),
            Err(other) => Err(other),
        }
    }

    #[instrument(skip(self))]
    async fn get_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        let account: AccountResponse = self
            .signed_request(Method::GET, "/api/v3/account", &[])
            .await?;
        Ok(account
            .balances
            .into_iter()
            .map(|b| AssetBalance {
                asset: b.asset,
                free: b.free,
                locked: b.locked,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let params = [("symbol", symbol.to_string())];
        let orders: Vec<OpenOrderResponse> = self
            .signed_request(Method::GET, "/api/v3/openOrders", &params)
            .await?;
        Ok(orders
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id.to_string(),
                symbol: o.symbol,
                side: o.side,
                price: o.price,
                quantity: o.orig_qty,
            })
            .collect())
    }
}
