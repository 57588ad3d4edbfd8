//! Gridcycle - Main Entry Point
//!
//! Grid trading engine for Binance Spot with backtesting and grid planning
//! subcommands.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gridcycle::backtest::{sweep_target_percent, CsvCandleLoader, SimulationConfig, SweepParams};
use gridcycle::config::Config;
use gridcycle::engine;
use gridcycle::exchange::types::normalize_symbol;
use gridcycle::exchange::{BinanceSpotClient, ExchangeGateway};
use gridcycle::grid;
use gridcycle::notify::{LogNotifier, NotificationSink, TelegramNotifier};
use gridcycle::persistence::{ConfigRepository, GridRow, SqliteConfigRepository};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Gridcycle CLI
#[derive(Parser)]
#[command(name = "gridcycle")]
#[command(version, about = "Perpetual grid trading on Binance Spot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live engine for all markets of an instance
    Start {
        /// Instance id whose markets to trade
        instance: i64,
    },

    /// Build the grid for a configured market and print the capital plan
    CreateGrid {
        /// Instance id the market belongs to
        instance: i64,

        /// Pair as configured, e.g. BTC/USDC
        pair: String,

        /// Assumed current price (default: live ticker, falling back to entry)
        #[arg(short, long)]
        current: Option<Decimal>,

        /// Replace the stored grid rows with the freshly built ladder
        #[arg(long)]
        save: bool,
    },

    /// Replay historical candles against a grid
    Backtest {
        /// Path to CSV candle file (timestamp,open,high,low,close)
        #[arg(short, long)]
        data: String,

        /// Grid entry price
        #[arg(long)]
        entry: Decimal,

        /// Grid exit price
        #[arg(long)]
        exit: Decimal,

        /// Margin between rungs, percent
        #[arg(long)]
        margin: Decimal,

        /// Profit target per rung, percent
        #[arg(long)]
        target: Decimal,

        /// Price tick (0 disables quantization)
        #[arg(long, default_value = "0")]
        tick: Decimal,

        /// Quote notional per grid order
        #[arg(long, default_value = "100")]
        usd_per_order: Decimal,

        /// Fee rate per side
        #[arg(long, default_value = "0.000384")]
        fee: Decimal,
    },

    /// Sweep target percentages over a candle file and report the best
    Sweep {
        /// Path to CSV candle file
        #[arg(short, long)]
        data: String,

        /// Grid entry price
        #[arg(long)]
        entry: Decimal,

        /// Grid exit price
        #[arg(long)]
        exit: Decimal,

        /// Margin between rungs, percent
        #[arg(long)]
        margin: Decimal,

        /// Price tick (0 disables quantization)
        #[arg(long, default_value = "0")]
        tick: Decimal,

        /// Quote notional per grid order
        #[arg(long, default_value = "100")]
        usd_per_order: Decimal,

        /// Fee rate per side
        #[arg(long, default_value = "0.000384")]
        fee: Decimal,

        /// Sweep start, percent
        #[arg(long, default_value = "1.0")]
        from: Decimal,

        /// Sweep end, percent
        #[arg(long, default_value = "3.2")]
        to: Decimal,

        /// Sweep step, percent
        #[arg(long, default_value = "0.1")]
        step: Decimal,
    },

    /// List open exchange orders for a market
    OpenOrders {
        /// Instance id the market belongs to
        instance: i64,

        /// Pair as configured, e.g. BTC/USDC
        pair: String,
    },

    /// Cancel all open exchange orders for a market
    CancelOrders {
        /// Instance id the market belongs to
        instance: i64,

        /// Pair as configured, e.g. BTC/USDC
        pair: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    match cli.command {
        Commands::Start { instance } => run_start(instance).await,
        Commands::CreateGrid {
            instance,
            pair,
            current,
            save,
        } => run_create_grid(instance, &pair, current, save).await,
        Commands::Backtest {
            data,
            entry,
            exit,
            margin,
            target,
            tick,
            usd_per_order,
            fee,
        } => run_backtest(&data, entry, exit, margin, target, tick, usd_per_order, fee),
        Commands::Sweep {
            data,
            entry,
            exit,
            margin,
            tick,
            usd_per_order,
            fee,
            from,
            to,
            step,
        } => run_sweep(&data, entry, exit, margin, tick, usd_per_order, fee, from, to, step),
        Commands::OpenOrders { instance, pair } => run_open_orders(instance, &pair).await,
        Commands::CancelOrders { instance, pair } => run_cancel_orders(instance, &pair).await,
    }
}

async fn run_start(instance: i64) -> Result<()> {
    let config = Config::load()?;
    config.validate()?;
    info!(version = env!("CARGO_PKG_VERSION"), instance, "Gridcycle starting");

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BinanceSpotClient::new(&config.exchange)?);
    let repo: Arc<dyn ConfigRepository> =
        Arc::new(SqliteConfigRepository::new(&config.database.path)?);
    let notifier: Arc<dyn NotificationSink> = if config.telegram.enabled {
        Arc::new(TelegramNotifier::new(&config.telegram)?)
    } else {
        Arc::new(LogNotifier)
    };

    engine::run_instance(instance, gateway, repo, notifier, &config).await?;
    Ok(())
}

async fn run_create_grid(
    instance: i64,
    pair: &str,
    current: Option<Decimal>,
    save: bool,
) -> Result<()> {
    let config = Config::load()?;
    let repo = SqliteConfigRepository::new(&config.database.path)?;
    let market = find_market(&repo, instance, pair)?;

    let tick = tick_from_decimals(market.decimal_price);
    let levels = grid::build(
        market.entry_price,
        market.exit_price,
        market.margin_percent,
        market.target_percent,
        tick,
    )?;
    if levels.is_empty() {
        bail!("market parameters produce an empty grid");
    }

    let current_price = match current {
        Some(price) => price,
        None => fetch_price(&config, &market.pair)
            .await
            .unwrap_or(market.entry_price),
    };

    println!("Grid for {} ({} levels, assumed price {})", market.pair, levels.len(), current_price);
    println!("{:>4}  {:>16}  {:>16}  {:>14}", "#", "buy", "sell", "quantity");
    for (i, level) in levels.iter().enumerate() {
        let quantity = (market.usd_per_level / level.buy_price).round_dp(market.decimal_quantity);
        println!(
            "{:>4}  {:>16}  {:>16}  {:>14}",
            i + 1,
            level.buy_price,
            level.sell_price,
            quantity
        );
    }

    let plan = grid::plan(
        &levels,
        current_price,
        market.exit_price,
        market.usd_per_level,
        market.target_percent,
        config.fees.maker_per_side,
        market.decimal_quantity,
    );
    println!();
    println!("Capital plan:");
    println!("  levels above price:   {}", plan.levels_above);
    println!("  levels below price:   {}", plan.levels_below);
    println!("  base needed:          {} ({} in quote)", plan.base_needed, plan.base_value_usd);
    println!("  quote needed:         {}", plan.quote_needed);
    println!("  gross/cycle:          {}", plan.gross_profit_per_cycle);
    println!("  fees/cycle:           {}", plan.fee_per_cycle);
    println!("  net/cycle:            {}", plan.net_profit_per_cycle);
    println!("  sold-at-exit profit:  {}", plan.profit_if_sold_at_exit);

    if save {
        let removed = repo.delete_grid_rows(&market.pair)?;
        if removed > 0 {
            info!(pair = %market.pair, removed, "Replaced existing grid rows");
        }
        for level in &levels {
            let quantity =
                (market.usd_per_level / level.buy_price).round_dp(market.decimal_quantity);
            repo.insert_grid_row(&GridRow {
                id: 0,
                pair: market.pair.clone(),
                buy_price: level.buy_price,
                sell_price: level.sell_price,
                quantity,
                entry_price: market.entry_price,
                buy_order_id: None,
                sell_order_id: None,
                last_side: None,
                last_operation: false,
                first_profit: None,
            })?;
        }
        println!();
        println!("Saved {} grid rows for {}", levels.len(), market.pair);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_backtest(
    data: &str,
    entry: Decimal,
    exit: Decimal,
    margin: Decimal,
    target: Decimal,
    tick: Decimal,
    usd_per_order: Decimal,
    fee: Decimal,
) -> Result<()> {
    let loader = CsvCandleLoader::new(data)?;
    let levels = grid::build(entry, exit, margin, target, tick)?;
    if levels.is_empty() {
        bail!("grid parameters produce an empty grid");
    }
    let sim = SimulationConfig {
        usd_per_order,
        fee_rate_per_side: fee,
    };
    let result = gridcycle::backtest::simulate(&levels, loader.candles(), &sim);

    println!("Backtest over {} candles, {} levels", loader.len(), levels.len());
    println!("  cycles:       {}", result.cycles);
    println!("  total profit: {}", result.total_profit);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_sweep(
    data: &str,
    entry: Decimal,
    exit: Decimal,
    margin: Decimal,
    tick: Decimal,
    usd_per_order: Decimal,
    fee: Decimal,
    from: Decimal,
    to: Decimal,
    step: Decimal,
) -> Result<()> {
    let loader = CsvCandleLoader::new(data)?;
    let params = SweepParams {
        entry_price: entry,
        exit_price: exit,
        margin_percent: margin,
        tick,
        from_percent: from,
        to_percent: to,
        step_percent: step,
    };
    let sim = SimulationConfig {
        usd_per_order,
        fee_rate_per_side: fee,
    };

    match sweep_target_percent(&params, loader.candles(), &sim)? {
        Some(best) => {
            println!("Best target over {} candles:", loader.len());
            println!("  target:       {}%", best.target_percent);
            println!("  cycles:       {}", best.cycles);
            println!("  total profit: {}", best.total_profit);
        }
        None => println!("No sweep point produced a grid"),
    }
    Ok(())
}

async fn run_open_orders(instance: i64, pair: &str) -> Result<()> {
    let config = Config::load()?;
    let repo = SqliteConfigRepository::new(&config.database.path)?;
    let market = find_market(&repo, instance, pair)?;

    let client = BinanceSpotClient::new(&config.exchange)?;
    let symbol = normalize_symbol(&market.pair);
    let orders = client.get_open_orders(&symbol).await?;

    println!("{} open orders on {}", orders.len(), market.pair);
    for order in orders {
        println!(
            "  {:>12}  {:>4}  {:>16} x {}",
            order.order_id, order.side, order.price, order.quantity
        );
    }
    Ok(())
}

async fn run_cancel_orders(instance: i64, pair: &str) -> Result<()> {
    let config = Config::load()?;
    let repo = SqliteConfigRepository::new(&config.database.path)?;
    let market = find_market(&repo, instance, pair)?;

    let client = BinanceSpotClient::new(&config.exchange)?;
    let symbol = normalize_symbol(&market.pair);
    let cancelled = client.cancel_all_orders(&symbol).await?;
    println!("Cancelled {} orders on {}", cancelled, market.pair);

    // Stored ids are now stale; clear them so the engine re-places cleanly.
    let mut cleared = 0usize;
    for mut row in repo.load_grid_rows(&market.pair)? {
        if row.buy_order_id.is_some() || row.sell_order_id.is_some() {
            row.buy_order_id = None;
            row.sell_order_id = None;
            repo.update_grid_row(&row)?;
            cleared += 1;
        }
    }
    if cleared > 0 {
        println!("Cleared {} stored order ids", cleared);
    }
    if market.order_block_id.is_some() {
        repo.set_order_block(market.id, None)?;
        println!("Cleared reservation order id");
    }
    Ok(())
}

fn find_market(
    repo: &SqliteConfigRepository,
    instance: i64,
    pair: &str,
) -> Result<gridcycle::persistence::MarketConfig> {
    let wanted = normalize_symbol(pair);
    repo.load_market_configs(instance)?
        .into_iter()
        .find(|m| normalize_symbol(&m.pair) == wanted)
        .with_context(|| format!("market {} not configured for instance {}", pair, instance))
}

/// Smallest representable price step for the market's price precision.
fn tick_from_decimals(decimal_price: u32) -> Decimal {
    Decimal::new(1, decimal_price)
}

async fn fetch_price(config: &Config, pair: &str) -> Option<Decimal> {
    let client = BinanceSpotClient::new(&config.exchange).ok()?;
    match client.get_prices().await {
        Ok(prices) => prices.get(&normalize_symbol(pair)).copied(),
        Err(e) => {
            warn!(error = %e, "Could not fetch live price, using entry price");
            None
        }
    }
}

/// Initialize logging with stdout and rolling file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "gridcycle.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("gridcycle=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_from_decimals() {
        assert_eq!(tick_from_decimals(2), dec!(0.01));
        assert_eq!(tick_from_decimals(0), dec!(1));
        assert_eq!(tick_from_decimals(8), dec!(0.00000001));
    }
}
