//! Per-market order lifecycle scheduler.
//!
//! One task per market. Each pass reloads the market row, takes a fresh
//! price snapshot, walks the in-window grid rows sequentially, and reacts to
//! fills by placing the paired opposite order. Profit books only when a fill
//! completes a full alternation on its rung, so the opening leg is never
//! counted. The pass ends by re-parking spare quote in the reservation order
//! and publishing the active price range for the wake trigger.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::reservation::CapitalReservation;
use crate::engine::rebuy::RebuyManager;
use crate::engine::state::{ActiveRange, EngineState, MarketRuntime};
use crate::error::{ConfigError, EngineError};
use crate::exchange::types::{GatewayOrderStatus, OrderRequest, Side};
use crate::exchange::ExchangeGateway;
use crate::notify::NotificationSink;
use crate::persistence::{ConfigRepository, GridRow, MarketConfig, ProfitEvent};

/// What a pass did, for cadence selection.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassOutcome {
    /// A resting order was observed filled.
    pub any_fill: bool,
    /// A vanished order was healed or an initial order placed.
    pub any_change: bool,
}

impl PassOutcome {
    /// Only fills earn the short cadence; placements and heals wait out the
    /// idle interval like any quiet pass.
    fn is_hot(&self) -> bool {
        self.any_fill
    }
}

pub struct MarketScheduler {
    gateway: Arc<dyn ExchangeGateway>,
    repo: Arc<dyn ConfigRepository>,
    notifier: Arc<dyn NotificationSink>,
    state: Arc<EngineState>,
    runtime: Arc<MarketRuntime>,
    settings: crate::config::EngineConfig,
    fee_per_side: Decimal,
    reservation: CapitalReservation,
    rebuy: RebuyManager,
    passes: u64,
}

impl MarketScheduler {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        repo: Arc<dyn ConfigRepository>,
        notifier: Arc<dyn NotificationSink>,
        state: Arc<EngineState>,
        runtime: Arc<MarketRuntime>,
        config: &Config,
    ) -> Self {
        let reservation = CapitalReservation::new(gateway.clone(), repo.clone(), &config.engine);
        let rebuy = RebuyManager::new(gateway.clone(), config.engine.rebuy_threshold);
        Self {
            gateway,
            repo,
            notifier,
            state,
            runtime,
            settings: config.engine.clone(),
            fee_per_side: config.fees.maker_per_side,
            reservation,
            rebuy,
            passes: 0,
        }
    }

    /// Pass loop. Returns when shutdown is requested.
    pub async fn run(mut self) {
        info!(pair = %self.runtime.pair, "Market scheduler started");
        loop {
            if self.state.is_shutdown() {
                break;
            }

            self.runtime.gate.begin_pass();
            let outcome = self.run_pass().await;
            self.runtime.gate.end_pass();

            let cadence = match outcome {
                Ok(outcome) if outcome.is_hot() => {
                    Duration::from_secs(self.settings.hot_cadence_secs)
                }
                Ok(_) => Duration::from_secs(self.settings.idle_cadence_secs),
                Err(e) => {
                    error!(pair = %self.runtime.pair, error = %e, "Pass failed");
                    self.notifier
                        .notify(&format!("{}: pass failed: {}", self.runtime.pair, e))
                        .await;
                    Duration::from_secs(self.settings.error_cooldown_secs)
                }
            };

            self.runtime.gate.wait(cadence).await;
        }
        info!(pair = %self.runtime.pair, "Market scheduler stopped");
    }

    /// One full pass over the market.
    async fn run_pass(&mut self) -> Result<PassOutcome, EngineError> {
        self.passes += 1;

        let mut config = self
            .repo
            .load_market_config(self.runtime.market_id)?
            .ok_or_else(|| ConfigError::MarketMissing {
                pair: self.runtime.pair.clone(),
                instance_id: self.state.instance_id,
            })?;

        let prices = self.gateway.get_prices().await?;
        self.state.update_prices(&prices).await;
        let current = prices
            .get(&self.runtime.symbol)
            .copied()
            .ok_or_else(|| EngineError::MissingPrice {
                pair: self.runtime.pair.clone(),
            })?;

        let mut rows = self.repo.load_grid_rows(&config.pair)?;

        let cleanup_pass = self.passes == 1 || self.passes % self.settings.cleanup_every == 0;
        let window = if cleanup_pass {
            self.settings.orders_window_cleanup
        } else {
            self.settings.orders_window
        };

        let selected = filter_rows(
            &rows,
            current,
            window,
            config.execution_price_min,
            config.execution_price_max,
        );

        if cleanup_pass {
            self.cleanup_out_of_window(&mut rows, &selected).await?;
        }

        let mut outcome = PassOutcome::default();
        let mut released = false;
        for (position, index) in selected.iter().enumerate() {
            let row = &mut rows[*index];
            self.process_row(&mut config, row, current, &mut released, &mut outcome)
                .await?;
            if position + 1 < selected.len() {
                tokio::time::sleep(Duration::from_millis(self.settings.row_pacing_ms)).await;
            }
        }

        let range = compute_range(&rows, config.entry_price, config.exit_price);
        *self.runtime.active_range.write().await = Some(range);

        self.reservation.ensure(&mut config).await?;
        if let Err(e) = self.repo.update_market_config(&config) {
            warn!(pair = %config.pair, error = %e, "Failed to persist market state");
        }

        debug!(
            pair = %config.pair,
            pass = self.passes,
            rows = selected.len(),
            any_fill = outcome.any_fill,
            "Pass complete"
        );
        Ok(outcome)
    }

    /// Cancel still-open exchange orders on rows that fell out of the window
    /// and clear their ids.
    async fn cleanup_out_of_window(
        &self,
        rows: &mut [GridRow],
        selected: &[usize],
    ) -> Result<(), EngineError> {
        for index in 0..rows.len() {
            if selected.contains(&index) {
                continue;
            }
            let row = &mut rows[index];
            let order_id = match (&row.buy_order_id, &row.sell_order_id) {
                (Some(id), _) | (None, Some(id)) => id.clone(),
                (None, None) => continue,
            };

            let snapshot = self.gateway.get_order(&self.runtime.symbol, &order_id).await?;
            if snapshot.status == GatewayOrderStatus::Open {
                if let Err(e) = self.gateway.cancel_order(&self.runtime.symbol, &order_id).await {
                    warn!(pair = %row.pair, order_id, error = %e, "Cleanup cancel failed");
                    continue;
                }
                tokio::time::sleep(Duration::from_millis(self.settings.cancel_settle_ms)).await;
            }

            row.buy_order_id = None;
            row.sell_order_id = None;
            self.persist_row(row);
            debug!(pair = %row.pair, order_id, "Out-of-window order cleaned up");
        }
        Ok(())
    }

    async fn process_row(
        &self,
        config: &mut MarketConfig,
        row: &mut GridRow,
        current: Decimal,
        released: &mut bool,
        outcome: &mut PassOutcome,
    ) -> Result<(), EngineError> {
        if let Some(order_id) = row.sell_order_id.clone() {
            return self
                .check_resting(config, row, Side::Sell, &order_id, released, outcome)
                .await;
        }
        if let Some(order_id) = row.buy_order_id.clone() {
            return self
                .check_resting(config, row, Side::Buy, &order_id, released, outcome)
                .await;
        }
        self.place_initial(config, row, current, released, outcome)
            .await
    }

    /// A row with no live order gets one: the opposite of its last fill, or
    /// a synthetic first placement based on where price sits.
    async fn place_initial(
        &self,
        config: &mut MarketConfig,
        row: &mut GridRow,
        current: Decimal,
        released: &mut bool,
        outcome: &mut PassOutcome,
    ) -> Result<(), EngineError> {
        let side = match row.last_side {
            Some(Side::Buy) => Side::Sell,
            Some(Side::Sell) => Side::Buy,
            None => {
                let side = if current < row.sell_price && row.sell_price >= row.entry_price {
                    Side::Sell
                } else {
                    Side::Buy
                };
                // Synthetic last fill so the alternation holds from here on.
                row.last_side = Some(side.opposite());
                side
            }
        };

        self.place_grid_order(config, row, side, released).await?;
        self.persist_row(row);
        outcome.any_change = true;
        Ok(())
    }

    /// Check a resting order and react to its status.
    async fn check_resting(
        &self,
        config: &mut MarketConfig,
        row: &mut GridRow,
        side: Side,
        order_id: &str,
        released: &mut bool,
        outcome: &mut PassOutcome,
    ) -> Result<(), EngineError> {
        let snapshot = self.gateway.get_order(&self.runtime.symbol, order_id).await?;
        match snapshot.status {
            GatewayOrderStatus::Open => Ok(()),
            GatewayOrderStatus::Filled => {
                self.on_fill(config, row, side, released).await?;
                outcome.any_fill = true;
                Ok(())
            }
            GatewayOrderStatus::NotOpenNoFill => {
                // The order is gone without filling (cancelled externally or
                // expired). Drop the stale id; the next pass re-places.
                warn!(pair = %row.pair, order_id, %side, "Order vanished without fill, clearing");
                row.buy_order_id = None;
                row.sell_order_id = None;
                self.persist_row(row);
                outcome.any_change = true;
                Ok(())
            }
        }
    }

    /// A grid order filled: place the paired opposite and book profit when
    /// the fill completes an alternation.
    async fn on_fill(
        &self,
        config: &mut MarketConfig,
        row: &mut GridRow,
        filled_side: Side,
        released: &mut bool,
    ) -> Result<(), EngineError> {
        row.buy_order_id = None;
        row.sell_order_id = None;
        row.last_side = Some(filled_side);

        let completed_cycle = row.last_operation;
        row.last_operation = !row.last_operation;

        info!(
            pair = %row.pair,
            side = %filled_side,
            buy = %row.buy_price,
            sell = %row.sell_price,
            qty = %row.quantity,
            cycle = completed_cycle,
            "Grid order filled"
        );

        // Replacement first: if it cannot be placed, the pass aborts with
        // the fill still on the book and nothing booked, and the next pass
        // redetects the same fill cleanly. Booking before placing would
        // count the cycle again on that retry.
        self.place_grid_order(config, row, filled_side.opposite(), released)
            .await?;

        if completed_cycle {
            let profit = self.cycle_profit(row);
            self.note_first_profit(row, profit).await;
            self.persist_row(row);
            self.book_profit(config, row, profit).await;
        } else {
            self.persist_row(row);
            self.notifier
                .notify(&format!(
                    "{}: {} filled at {} (qty {})",
                    row.pair,
                    filled_side,
                    match filled_side {
                        Side::Buy => row.buy_price,
                        Side::Sell => row.sell_price,
                    },
                    row.quantity
                ))
                .await;
        }
        Ok(())
    }

    /// Opening-sell baseline, booked once per rung when price has held above
    /// the grid's entry.
    async fn note_first_profit(&self, row: &mut GridRow, profit: Decimal) {
        if row.first_profit.is_some() {
            return;
        }
        if let Some(price) = self.state.price(&self.runtime.symbol).await {
            if price >= row.entry_price {
                let baseline = row.quantity * (row.sell_price - row.entry_price);
                row.first_profit = Some(if baseline > Decimal::ZERO {
                    baseline
                } else {
                    profit
                });
            }
        }
    }

    /// Net profit for one completed cycle on this rung.
    fn cycle_profit(&self, row: &GridRow) -> Decimal {
        let gross = (row.sell_price - row.buy_price) * row.quantity;
        let fees = (row.buy_price + row.sell_price) * row.quantity * self.fee_per_side;
        gross - fees
    }

    async fn book_profit(&self, config: &mut MarketConfig, row: &GridRow, profit: Decimal) {
        if let Err(e) = self.repo.record_profit(&ProfitEvent {
            pair: row.pair.clone(),
            amount: profit,
            buy_price: row.buy_price,
            sell_price: row.sell_price,
            quantity: row.quantity,
        }) {
            warn!(pair = %row.pair, error = %e, "Failed to record profit");
        }

        self.rebuy.on_profit(config, profit).await;
        // The rebuy may have spent real quote; persist its accounting now
        // rather than at the end of the pass, which an error can skip.
        if config.rebuy_enabled {
            if let Err(e) = self.repo.update_market_config(config) {
                warn!(pair = %config.pair, error = %e, "Failed to persist rebuy state");
            }
        }

        info!(pair = %row.pair, %profit, "Cycle completed");
        self.notifier
            .notify(&format!(
                "{}: cycle profit {} (buy {} / sell {} / qty {})",
                row.pair, profit, row.buy_price, row.sell_price, row.quantity
            ))
            .await;
    }

    /// Place one side of a rung. The reservation is released ahead of the
    /// first placement of the pass, before any order mutation touches the
    /// book.
    async fn place_grid_order(
        &self,
        config: &mut MarketConfig,
        row: &mut GridRow,
        side: Side,
        released: &mut bool,
    ) -> Result<(), EngineError> {
        if !*released {
            self.reservation.cancel(config).await;
            tokio::time::sleep(Duration::from_millis(self.settings.cancel_settle_ms)).await;
            *released = true;
        }

        let price = match side {
            Side::Buy => row.buy_price,
            Side::Sell => row.sell_price,
        };
        let placed = self
            .gateway
            .place_order(OrderRequest::limit(
                self.runtime.symbol.clone(),
                side,
                price,
                row.quantity,
            ))
            .await?;

        match side {
            Side::Buy => row.buy_order_id = Some(placed.order_id),
            Side::Sell => row.sell_order_id = Some(placed.order_id),
        }
        debug!(pair = %row.pair, %side, %price, qty = %row.quantity, "Grid order placed");
        Ok(())
    }

    /// Writes are advisory: in-memory state advances even when one fails.
    fn persist_row(&self, row: &GridRow) {
        if let Err(e) = self.repo.update_grid_row(row) {
            warn!(pair = %row.pair, row_id = row.id, error = %e, "Failed to persist grid row");
        }
    }
}

/// Select the rows worth touching this pass: the nearest `window` sell rungs
/// at or above the current price and the nearest `window` buy rungs at or
/// below it. A rung straddling the price counts on both sides; the floor
/// bound applies to buy legs and the ceiling to sell legs. Returned indices
/// are ordered by sell price descending, top of the book first.
pub fn filter_rows(
    rows: &[GridRow],
    current: Decimal,
    window: usize,
    execution_min: Option<Decimal>,
    execution_max: Option<Decimal>,
) -> Vec<usize> {
    let mut sells: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.sell_price >= current && execution_max.map_or(true, |max| r.sell_price <= max)
        })
        .map(|(i, _)| i)
        .collect();
    sells.sort_by(|a, b| rows[*a].sell_price.cmp(&rows[*b].sell_price));
    sells.truncate(window);

    let mut buys: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.buy_price <= current && execution_min.map_or(true, |min| r.buy_price >= min)
        })
        .map(|(i, _)| i)
        .collect();
    buys.sort_by(|a, b| rows[*b].buy_price.cmp(&rows[*a].buy_price));
    buys.truncate(window);

    let mut selected = sells;
    for index in buys {
        if !selected.contains(&index) {
            selected.push(index);
        }
    }
    selected.sort_by(|a, b| rows[*b].sell_price.cmp(&rows[*a].sell_price));
    selected
}

/// Price band with live orders: a trade at or beyond either bound means a
/// fill is probably pending.
pub fn compute_range(rows: &[GridRow], entry_price: Decimal, exit_price: Decimal) -> ActiveRange {
    let min = rows
        .iter()
        .filter(|r| r.buy_order_id.is_some())
        .map(|r| r.buy_price)
        .max()
        .unwrap_or(entry_price);
    let max = rows
        .iter()
        .filter(|r| r.sell_order_id.is_some())
        .map(|r| r.sell_price)
        .min()
        .unwrap_or(exit_price);
    ActiveRange { min, max }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::OrderKind;
    use crate::exchange::MockExchange;
    use crate::notify::LogNotifier;
    use crate::persistence::SqliteConfigRepository;
    use rust_decimal_macros::dec;

    fn insert_market(repo: &SqliteConfigRepository, rebuy_enabled: bool) -> MarketConfig {
        let mut config = MarketConfig {
            id: 0,
            instance_id: 1,
            name: "btc".to_string(),
            pair: "BTC/USDC".to_string(),
            entry_price: dec!(60000),
            exit_price: dec!(66000),
            margin_percent: dec!(0.5),
            target_percent: dec!(1.8),
            usd_per_level: dec!(100),
            decimal_price: 2,
            decimal_quantity: 5,
            rebuy_enabled,
            rebuy_value: Decimal::ZERO,
            rebought_value: Decimal::ZERO,
            rebought_coin: Decimal::ZERO,
            order_block_id: None,
            order_block_price: dec!(55000),
            execution_price_min: None,
            execution_price_max: None,
        };
        config.id = repo.insert_market_config(&config).unwrap();
        config
    }

    fn insert_row(
        repo: &SqliteConfigRepository,
        buy: Decimal,
        sell: Decimal,
    ) -> GridRow {
        let mut row = GridRow {
            id: 0,
            pair: "BTC/USDC".to_string(),
            buy_price: buy,
            sell_price: sell,
            quantity: dec!(0.001),
            entry_price: dec!(60000),
            buy_order_id: None,
            sell_order_id: None,
            last_side: None,
            last_operation: false,
            first_profit: None,
        };
        row.id = repo.insert_grid_row(&row).unwrap();
        row
    }

    fn row(buy: Decimal, sell: Decimal) -> GridRow {
        GridRow {
            id: 0,
            pair: "BTC/USDC".to_string(),
            buy_price: buy,
            sell_price: sell,
            quantity: dec!(0.001),
            entry_price: dec!(60000),
            buy_order_id: None,
            sell_order_id: None,
            last_side: None,
            last_operation: false,
            first_profit: None,
        }
    }

    struct Harness {
        exchange: Arc<MockExchange>,
        repo: Arc<SqliteConfigRepository>,
        scheduler: MarketScheduler,
    }

    fn harness(config: &MarketConfig, fee_free: bool) -> Harness {
        harness_with(config, fee_free, Config::default())
    }

    fn harness_with(config: &MarketConfig, fee_free: bool, mut app: Config) -> Harness {
        let exchange = Arc::new(MockExchange::new());
        let repo = Arc::new(SqliteConfigRepository::in_memory().unwrap());
        if fee_free {
            app.fees.maker_per_side = Decimal::ZERO;
        }

        // The harness repo is separate from the one the market row was
        // inserted into, so re-insert.
        let mut stored = config.clone();
        stored.id = 0;
        let id = repo.insert_market_config(&stored).unwrap();

        let mut state = EngineState::new(1);
        let runtime = Arc::new(MarketRuntime::new(id, "BTC/USDC", "BTCUSDC"));
        state.insert_market(runtime.clone());
        let state = Arc::new(state);

        let scheduler = MarketScheduler::new(
            exchange.clone(),
            repo.clone(),
            Arc::new(LogNotifier),
            state,
            runtime,
            &app,
        );
        Harness {
            exchange,
            repo,
            scheduler,
        }
    }

    #[test]
    fn test_filter_rows_keeps_nearest_per_side() {
        let rows = vec![
            row(dec!(57000), dec!(58026)), // far below
            row(dec!(58000), dec!(59044)), // below
            row(dec!(59000), dec!(60062)), // below, nearest
            row(dec!(60000), dec!(61080)), // above, nearest
            row(dec!(61000), dec!(62098)), // above
            row(dec!(62000), dec!(63116)), // far above
        ];
        let selected = filter_rows(&rows, dec!(60500), 2, None, None);

        // Two nearest per side, ordered top-of-book first. The rung whose
        // buy sits below the price and sell above it holds a slot on both
        // sides but appears once.
        assert_eq!(selected, vec![4, 3, 2]);
    }

    #[test]
    fn test_filter_rows_respects_execution_bounds() {
        let rows = vec![
            row(dec!(58000), dec!(59044)),
            row(dec!(59000), dec!(60062)),
            row(dec!(60000), dec!(61080)),
        ];
        let selected = filter_rows(&rows, dec!(60500), 10, Some(dec!(58500)), Some(dec!(61000)));

        // The floor excludes the first row's buy leg; the ceiling drops the
        // last row's sell leg but its buy leg stays eligible.
        assert_eq!(selected, vec![2, 1]);
    }

    #[test]
    fn test_compute_range_falls_back_to_grid_bounds() {
        let mut rows = vec![row(dec!(59000), dec!(60062)), row(dec!(60000), dec!(61080))];
        let range = compute_range(&rows, dec!(60000), dec!(66000));
        assert_eq!(range.min, dec!(60000));
        assert_eq!(range.max, dec!(66000));

        rows[0].buy_order_id = Some("1".to_string());
        rows[1].sell_order_id = Some("2".to_string());
        let range = compute_range(&rows, dec!(60000), dec!(66000));
        assert_eq!(range.min, dec!(59000));
        assert_eq!(range.max, dec!(61080));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_pass_places_initial_orders() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let config = insert_market(&repo_seed, false);
        let mut h = harness(&config, true);

        // One rung below price, one above.
        insert_row(&h.repo, dec!(59000), dec!(60062));
        insert_row(&h.repo, dec!(60000), dec!(61080));
        h.exchange.set_price("BTCUSDC", dec!(60500)).await;

        let outcome = h.scheduler.run_pass().await.unwrap();
        assert!(outcome.any_change);
        assert!(!outcome.any_fill);

        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        // Rung below price holds a buy, rung above holds a sell.
        let below = rows.iter().find(|r| r.buy_price == dec!(59000)).unwrap();
        assert!(below.buy_order_id.is_some());
        assert_eq!(below.last_side, Some(Side::Sell));

        let above = rows.iter().find(|r| r.buy_price == dec!(60000)).unwrap();
        assert!(above.sell_order_id.is_some());
        assert_eq!(above.last_side, Some(Side::Buy));

        // Active range published from the live orders.
        let range = h.scheduler.runtime.active_range.read().await.unwrap();
        assert_eq!(range.min, dec!(59000));
        assert_eq!(range.max, dec!(61080));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_places_opposite_and_books_profit_on_alternation() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let config = insert_market(&repo_seed, false);
        let mut h = harness(&config, true);

        insert_row(&h.repo, dec!(60000), dec!(61080));
        h.exchange.set_price("BTCUSDC", dec!(60500)).await;

        // Pass 1: opening sell placed.
        h.scheduler.run_pass().await.unwrap();
        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        let sell_id = rows[0].sell_order_id.clone().unwrap();

        // Opening sell fills: no profit yet, paired buy placed.
        h.exchange.fill_order(&sell_id).await;
        let outcome = h.scheduler.run_pass().await.unwrap();
        assert!(outcome.any_fill);

        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        let buy_id = rows[0].buy_order_id.clone().unwrap();
        assert!(rows[0].sell_order_id.is_none());
        assert_eq!(rows[0].last_side, Some(Side::Sell));
        assert!(rows[0].last_operation);
        assert_eq!(h.repo.total_profit("BTC/USDC").unwrap(), Decimal::ZERO);

        // Paired buy fills: the alternation is complete, profit books.
        h.exchange.fill_order(&buy_id).await;
        h.scheduler.run_pass().await.unwrap();

        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        assert!(rows[0].sell_order_id.is_some());
        assert!(!rows[0].last_operation);
        // (61080 - 60000) * 0.001 with zero fees.
        assert_eq!(h.repo.total_profit("BTC/USDC").unwrap(), dec!(1.08));
        // First-profit baseline: 0.001 * (61080 - 60000).
        assert_eq!(rows[0].first_profit, Some(dec!(1.08)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_profit_is_fee_aware() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let config = insert_market(&repo_seed, false);
        let h = harness(&config, false);

        let mut r = row(dec!(60000), dec!(61080));
        // (1080 * 0.001) - (121080 * 0.001 * 0.000384)
        assert_eq!(h.scheduler.cycle_profit(&r), dec!(1.03350528));
        r.quantity = dec!(0.002);
        assert_eq!(h.scheduler.cycle_profit(&r), dec!(2.06701056));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_order_self_heals() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let config = insert_market(&repo_seed, false);
        let mut h = harness(&config, true);

        let mut seeded = insert_row(&h.repo, dec!(60000), dec!(61080));
        seeded.sell_order_id = Some("ghost".to_string());
        seeded.last_side = Some(Side::Buy);
        h.repo.update_grid_row(&seeded).unwrap();
        h.exchange.set_price("BTCUSDC", dec!(60500)).await;

        let outcome = h.scheduler.run_pass().await.unwrap();
        assert!(outcome.any_change);
        assert!(!outcome.any_fill);

        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        assert!(rows[0].sell_order_id.is_none());
        assert!(rows[0].buy_order_id.is_none());
        // State machine untouched, the next pass re-places a sell.
        assert_eq!(rows[0].last_side, Some(Side::Buy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_profit_feeds_rebuy() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let mut config = insert_market(&repo_seed, true);
        config.rebuy_value = dec!(9.5);
        let mut h = harness(&config, true);

        let mut seeded = insert_row(&h.repo, dec!(60000), dec!(61080));
        seeded.buy_order_id = Some("tofill".to_string());
        seeded.last_side = Some(Side::Sell);
        seeded.last_operation = true;
        h.repo.update_grid_row(&seeded).unwrap();

        h.exchange.set_price("BTCUSDC", dec!(60500)).await;
        // Mirror the resting order inside the mock, then fill it.
        let placed = h
            .exchange
            .place_order(OrderRequest::limit("BTCUSDC", Side::Buy, dec!(60000), dec!(0.001)))
            .await
            .unwrap();
        seeded.buy_order_id = Some(placed.order_id.clone());
        h.repo.update_grid_row(&seeded).unwrap();
        h.exchange.fill_order(&placed.order_id).await;

        h.scheduler.run_pass().await.unwrap();

        // Profit 1.08 pushes the 9.5 accumulator over 10: one market rebuy.
        let stored = h.repo.load_market_configs(1).unwrap().remove(0);
        assert_eq!(stored.rebuy_value, dec!(0.58));
        assert_eq!(stored.rebought_value, dec!(10));

        let market_buys: Vec<_> = h
            .exchange
            .placed_orders()
            .await
            .into_iter()
            .filter(|o| o.kind == OrderKind::Market)
            .collect();
        assert_eq!(market_buys.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_reestablishes_reservation() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let config = insert_market(&repo_seed, false);
        let mut h = harness(&config, true);

        insert_row(&h.repo, dec!(59000), dec!(60062));
        h.exchange.set_price("BTCUSDC", dec!(60500)).await;
        h.exchange.set_balance("USDC", dec!(1050)).await;

        h.scheduler.run_pass().await.unwrap();

        let stored = h.repo.load_market_configs(1).unwrap().remove(0);
        let block_id = stored.order_block_id.expect("reservation placed");
        let block = h.exchange.order(&block_id).await.unwrap();
        assert_eq!(block.status, GatewayOrderStatus::Open);
        assert_eq!(block.price, dec!(55000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_cancels_out_of_window_orders() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let config = insert_market(&repo_seed, false);
        let mut app = Config::default();
        app.engine.orders_window = 1;
        app.engine.orders_window_cleanup = 1;
        let mut h = harness_with(&config, true, app);

        // Two rungs below price with live buys; only the nearest stays.
        for buy in [dec!(58000), dec!(59000)] {
            let sell = buy + dec!(1000);
            let mut seeded = insert_row(&h.repo, buy, sell);
            let placed = h
                .exchange
                .place_order(OrderRequest::limit("BTCUSDC", Side::Buy, buy, dec!(0.001)))
                .await
                .unwrap();
            seeded.buy_order_id = Some(placed.order_id);
            seeded.last_side = Some(Side::Sell);
            h.repo.update_grid_row(&seeded).unwrap();
        }
        h.exchange.set_price("BTCUSDC", dec!(60500)).await;

        h.scheduler.run_pass().await.unwrap();

        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        let far = rows.iter().find(|r| r.buy_price == dec!(58000)).unwrap();
        assert!(far.buy_order_id.is_none());
        let near = rows.iter().find(|r| r.buy_price == dec!(59000)).unwrap();
        assert!(near.buy_order_id.is_some());
        assert_eq!(h.exchange.open_order_count("BTCUSDC").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_replacement_defers_profit_booking() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let config = insert_market(&repo_seed, false);
        let mut h = harness(&config, true);

        let mut seeded = insert_row(&h.repo, dec!(60000), dec!(61080));
        h.exchange.set_price("BTCUSDC", dec!(60500)).await;
        let placed = h
            .exchange
            .place_order(OrderRequest::limit("BTCUSDC", Side::Sell, dec!(61080), dec!(0.001)))
            .await
            .unwrap();
        seeded.sell_order_id = Some(placed.order_id.clone());
        seeded.last_side = Some(Side::Buy);
        seeded.last_operation = true;
        h.repo.update_grid_row(&seeded).unwrap();
        h.exchange.fill_order(&placed.order_id).await;

        // The paired buy is rejected: the pass aborts with nothing booked
        // and the fill still recorded on the row.
        h.exchange.reject_orders_at(dec!(60000)).await;
        let err = h.scheduler.run_pass().await.unwrap_err();
        assert!(matches!(err, EngineError::Exchange(_)));
        assert_eq!(h.repo.total_profit("BTC/USDC").unwrap(), Decimal::ZERO);

        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        assert_eq!(rows[0].sell_order_id, Some(placed.order_id.clone()));
        assert!(rows[0].last_operation);

        // The retry redetects the same fill and books the cycle once.
        h.exchange.clear_rejections().await;
        h.scheduler.run_pass().await.unwrap();
        assert_eq!(h.repo.total_profit("BTC/USDC").unwrap(), dec!(1.08));

        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        assert!(rows[0].buy_order_id.is_some());
        assert!(!rows[0].last_operation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuy_state_survives_a_pass_error() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let mut config = insert_market(&repo_seed, true);
        config.rebuy_value = dec!(9.5);
        let mut h = harness(&config, true);

        // One rung completes a cycle; a lower rung's placement then fails.
        let mut cycling = insert_row(&h.repo, dec!(60000), dec!(61080));
        let placed = h
            .exchange
            .place_order(OrderRequest::limit("BTCUSDC", Side::Buy, dec!(60000), dec!(0.001)))
            .await
            .unwrap();
        cycling.buy_order_id = Some(placed.order_id.clone());
        cycling.last_side = Some(Side::Sell);
        cycling.last_operation = true;
        h.repo.update_grid_row(&cycling).unwrap();

        insert_row(&h.repo, dec!(59000), dec!(60062));
        h.exchange.set_price("BTCUSDC", dec!(60500)).await;
        h.exchange.fill_order(&placed.order_id).await;
        h.exchange.reject_orders_at(dec!(59000)).await;

        h.scheduler.run_pass().await.unwrap_err();

        // The rebuy spent real quote before the pass died; its accounting
        // was written at the profit event, not at the end of the pass.
        let stored = h.repo.load_market_configs(1).unwrap().remove(0);
        assert_eq!(stored.rebuy_value, dec!(0.58));
        assert_eq!(stored.rebought_value, dec!(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservation_released_before_sell_placement() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let mut config = insert_market(&repo_seed, false);
        let mut h = harness(&config, true);

        // Park a live reservation order, then let the pass place a sell.
        let block = h
            .exchange
            .place_order(OrderRequest::limit("BTCUSDC", Side::Buy, dec!(55000), dec!(0.01)))
            .await
            .unwrap();
        config = h.repo.load_market_configs(1).unwrap().remove(0);
        config.order_block_id = Some(block.order_id.clone());
        h.repo.update_market_config(&config).unwrap();

        insert_row(&h.repo, dec!(60000), dec!(61080));
        h.exchange.set_price("BTCUSDC", dec!(60500)).await;

        h.scheduler.run_pass().await.unwrap();

        // The sell rested only after the block was pulled.
        let parked = h.exchange.order(&block.order_id).await.unwrap();
        assert_eq!(parked.status, GatewayOrderStatus::NotOpenNoFill);
        let rows = h.repo.load_grid_rows("BTC/USDC").unwrap();
        assert!(rows[0].sell_order_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_price_fails_the_pass() {
        let repo_seed = SqliteConfigRepository::in_memory().unwrap();
        let config = insert_market(&repo_seed, false);
        let mut h = harness(&config, true);
        insert_row(&h.repo, dec!(60000), dec!(61080));

        let err = h.scheduler.run_pass().await.unwrap_err();
        assert!(matches!(err, EngineError::MissingPrice { .. }));
    }
}
