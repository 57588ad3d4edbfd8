//! # Gridcycle
//!
//! A grid trading engine for Binance Spot: geometric buy/sell ladders that
//! cycle perpetually per price rung, with capital reservation and profit
//! recycling.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Binance Spot API client (REST + WebSocket) behind a gateway trait
//! - `grid`: Ladder construction and capital planning
//! - `engine`: Per-market schedulers, capital reservation, rebuy, price wakeups
//! - `persistence`: SQLite-backed market, grid row, and profit storage
//! - `notify`: Fill and profit notifications (Telegram or log)
//! - `backtest`: Historical simulation and parameter sweeps
//! - `utils`: Shared decimal arithmetic

pub mod backtest;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod grid;
pub mod notify;
pub mod persistence;
pub mod utils;

pub use config::Config;
