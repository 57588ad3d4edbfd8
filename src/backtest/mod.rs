//! Deterministic backtesting against historical candles.

pub mod data;
pub mod simulator;
pub mod sweep;

pub use data::{Candle, CsvCandleLoader};
pub use simulator::{simulate, BacktestResult, SimulationConfig};
pub use sweep::{sweep_target_percent, SweepOutcome, SweepParams};
