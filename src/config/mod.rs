//! Configuration management for the grid engine.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange API credentials
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Scheduler cadences and pacing delays
    #[serde(default)]
    pub engine: EngineConfig,
    /// Fee rates used by backtests and capital planning
    #[serde(default)]
    pub fees: FeeConfig,
    /// Telegram notifications
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// SQLite database
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Override the REST base URL (takes precedence over `testnet`)
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quote asset all markets trade against
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Quote amount left untouched when sizing the reservation order
    #[serde(default = "default_block_usd_buffer")]
    pub block_usd_buffer: Decimal,
    /// Accumulated profit needed before a rebuy fires
    #[serde(default = "default_rebuy_threshold")]
    pub rebuy_threshold: Decimal,
    /// Pass cadence right after a fill
    #[serde(default = "default_hot_cadence_secs")]
    pub hot_cadence_secs: u64,
    /// Pass cadence when nothing filled
    #[serde(default = "default_idle_cadence_secs")]
    pub idle_cadence_secs: u64,
    /// Cooldown after a pass error
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    /// Run the widened cleanup window every Nth pass
    #[serde(default = "default_cleanup_every")]
    pub cleanup_every: u64,
    /// Rows kept live per side on a normal pass
    #[serde(default = "default_orders_window")]
    pub orders_window: usize,
    /// Rows kept live per side on a cleanup pass
    #[serde(default = "default_orders_window_cleanup")]
    pub orders_window_cleanup: usize,
    /// Pause between rows within a pass
    #[serde(default = "default_row_pacing_ms")]
    pub row_pacing_ms: u64,
    /// Settle time after cancelling an order
    #[serde(default = "default_cancel_settle_ms")]
    pub cancel_settle_ms: u64,
    /// Settle time before reading balances for the reservation
    #[serde(default = "default_balance_sync_ms")]
    pub balance_sync_ms: u64,
    /// Hard deadline on the balance fetch
    #[serde(default = "default_balance_timeout_secs")]
    pub balance_timeout_secs: u64,
    /// Stagger between market task startups
    #[serde(default = "default_market_stagger_ms")]
    pub market_stagger_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Maker fee per side, as a fraction
    #[serde(default = "default_maker_fee")]
    pub maker_per_side: Decimal,
    /// Taker fee per side, as a fraction
    #[serde(default = "default_taker_fee")]
    pub taker_per_side: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

// Default value functions
fn default_quote_asset() -> String {
    "USDC".to_string()
}

fn default_block_usd_buffer() -> Decimal {
    Decimal::new(50, 0) // $50 kept free
}

fn default_rebuy_threshold() -> Decimal {
    Decimal::new(10, 0) // $10 of profit per rebuy
}

fn default_hot_cadence_secs() -> u64 {
    3
}

fn default_idle_cadence_secs() -> u64 {
    180
}

fn default_error_cooldown_secs() -> u64 {
    60
}

fn default_cleanup_every() -> u64 {
    100
}

fn default_orders_window() -> usize {
    70
}

fn default_orders_window_cleanup() -> usize {
    100
}

fn default_row_pacing_ms() -> u64 {
    100
}

fn default_cancel_settle_ms() -> u64 {
    120
}

fn default_balance_sync_ms() -> u64 {
    700
}

fn default_balance_timeout_secs() -> u64 {
    10
}

fn default_market_stagger_ms() -> u64 {
    500
}

fn default_maker_fee() -> Decimal {
    Decimal::new(384, 6) // 0.000384 per side
}

fn default_taker_fee() -> Decimal {
    Decimal::new(672, 6) // 0.000672 per side
}

fn default_db_path() -> String {
    "gridcycle.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("GRID"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.engine.block_usd_buffer >= Decimal::ZERO,
            "block_usd_buffer must not be negative"
        );

        anyhow::ensure!(
            self.engine.rebuy_threshold > Decimal::ZERO,
            "rebuy_threshold must be positive"
        );

        anyhow::ensure!(
            self.engine.orders_window > 0
                && self.engine.orders_window <= self.engine.orders_window_cleanup,
            "orders_window must be positive and no larger than orders_window_cleanup"
        );

        anyhow::ensure!(
            self.engine.hot_cadence_secs > 0 && self.engine.idle_cadence_secs > 0,
            "cadences must be positive"
        );

        anyhow::ensure!(
            self.fees.maker_per_side >= Decimal::ZERO
                && self.fees.taker_per_side >= Decimal::ZERO,
            "fee rates must not be negative"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            engine: EngineConfig::default(),
            fees: FeeConfig::default(),
            telegram: TelegramConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
            base_url: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quote_asset: default_quote_asset(),
            block_usd_buffer: default_block_usd_buffer(),
            rebuy_threshold: default_rebuy_threshold(),
            hot_cadence_secs: default_hot_cadence_secs(),
            idle_cadence_secs: default_idle_cadence_secs(),
            error_cooldown_secs: default_error_cooldown_secs(),
            cleanup_every: default_cleanup_every(),
            orders_window: default_orders_window(),
            orders_window_cleanup: default_orders_window_cleanup(),
            row_pacing_ms: default_row_pacing_ms(),
            cancel_settle_ms: default_cancel_settle_ms(),
            balance_sync_ms: default_balance_sync_ms(),
            balance_timeout_secs: default_balance_timeout_secs(),
            market_stagger_ms: default_market_stagger_ms(),
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            maker_per_side: default_maker_fee(),
            taker_per_side: default_taker_fee(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_id: String::new(),
            enabled: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}
