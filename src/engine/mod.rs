//! Live trading engine: one scheduler task per market, a shared price cache,
//! and a trade-stream wake trigger that pulls idle markets forward when price
//! leaves their active band.

pub mod rebuy;
pub mod reservation;
pub mod scheduler;
pub mod state;
pub mod wake;

pub use scheduler::MarketScheduler;
pub use state::{ActiveRange, EngineState, MarketGate, MarketRuntime};
pub use wake::PriceWakeTrigger;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ConfigError, EngineError};
use crate::exchange::types::normalize_symbol;
use crate::exchange::{ExchangeGateway, TradeStream};
use crate::notify::NotificationSink;
use crate::persistence::ConfigRepository;

/// Run all markets of one instance until SIGINT.
pub async fn run_instance(
    instance_id: i64,
    gateway: Arc<dyn ExchangeGateway>,
    repo: Arc<dyn ConfigRepository>,
    notifier: Arc<dyn NotificationSink>,
    config: &Config,
) -> Result<(), EngineError> {
    let markets = repo.load_market_configs(instance_id)?;
    if markets.is_empty() {
        return Err(ConfigError::NoMarkets { instance_id }.into());
    }
    info!(instance_id, markets = markets.len(), "Starting engine");

    let mut state = EngineState::new(instance_id);
    for market in &markets {
        let symbol = normalize_symbol(&market.pair);
        state.insert_market(Arc::new(MarketRuntime::new(market.id, &market.pair, &symbol)));
    }
    let state = Arc::new(state);

    {
        let state = state.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            state.request_shutdown();
            // Kick every scheduler so the flag is noticed without waiting
            // out a cadence; mid-pass tasks pick up the stored permit.
            for market in state.markets() {
                market.gate.wake_now();
            }
        });
    }

    // Trade stream feeds the price cache and wakes idle markets early.
    let symbols: Vec<String> = state.markets().map(|m| m.symbol.clone()).collect();
    let (tick_tx, tick_rx) = tokio::sync::mpsc::channel(256);
    let stream = TradeStream::new(config.exchange.testnet);
    if let Err(e) = stream.subscribe_trades(symbols, tick_tx).await {
        // The engine still works on pass cadence alone.
        warn!(error = %e, "Trade stream unavailable, price wakeups disabled");
    }
    let trigger = PriceWakeTrigger::new(state.clone());
    let wake_task = tokio::spawn(trigger.run(tick_rx));

    let mut tasks = Vec::new();
    for (position, runtime) in state.markets().cloned().enumerate() {
        let scheduler = MarketScheduler::new(
            gateway.clone(),
            repo.clone(),
            notifier.clone(),
            state.clone(),
            runtime,
            config,
        );
        let stagger = Duration::from_millis(config.engine.market_stagger_ms * position as u64);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(stagger).await;
            scheduler.run().await;
        }));
    }

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Scheduler task panicked");
        }
    }
    wake_task.abort();
    info!(instance_id, "Engine stopped");
    Ok(())
}
