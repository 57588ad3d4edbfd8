//! Error taxonomy for the grid engine.
//!
//! Per-market failures are never fatal to the process: the scheduler logs,
//! notifies, and retries on the next cadence. Only missing credentials or an
//! unreadable database abort startup.

use std::time::Duration;
use thiserror::Error;

/// Invalid or missing market parameters.
///
/// Fatal at startup when no market can be loaded; recoverable mid-run by
/// skipping the affected market.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no market configuration found for instance {instance_id}")]
    NoMarkets { instance_id: i64 },
    #[error("market {pair} missing from instance {instance_id}")]
    MarketMissing { pair: String, instance_id: i64 },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors surfaced by an [`crate::exchange::ExchangeGateway`] implementation.
///
/// Timeouts are a distinct variant so callers can tell a slow venue apart
/// from a rejection.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange request timed out after {0:?}")]
    Timeout(Duration),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid exchange response: {0}")]
    InvalidResponse(String),
    #[error("order {order_id} not found on exchange")]
    OrderNotFound { order_id: String },
}

impl ExchangeError {
    /// Whether this error is a timeout (treated like any other exchange
    /// error by the scheduler, but worth distinguishing in logs).
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExchangeError::Timeout(_))
    }
}

/// Repository write/read failure.
///
/// Writes are advisory for execution correctness: the scheduler advances its
/// in-memory state even when a write fails, accepting a known durability gap.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt stored value for {column}: {value}")]
    CorruptValue { column: &'static str, value: String },
}

/// Grid construction failure.
#[derive(Debug, Error)]
pub enum GridError {
    #[error(
        "grid construction exceeded {max} levels; margin {margin_percent}% is too small for the configured range"
    )]
    TooManyLevels {
        max: usize,
        margin_percent: rust_decimal::Decimal,
    },
}

/// Umbrella error for a scheduler pass.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("no price available for {pair}")]
    MissingPrice { pair: String },
}
