//! Shared engine state: per-market runtimes, the price cache, and the gate
//! that coordinates timer wakeups with price-triggered ones.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

/// Price band that should wake the market early when breached.
///
/// `min` is the highest live buy, `max` the lowest live sell; a trade at or
/// past either bound means a fill is likely pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl ActiveRange {
    pub fn contains(&self, price: Decimal) -> bool {
        price > self.min && price < self.max
    }
}

/// Coordinates the scheduler's sleep with early wakeups.
///
/// The busy flag is owned by the scheduler task: set for the duration of a
/// pass, clear while sleeping. Wake requests are only honored while idle, so
/// a pass already in flight is never re-entered.
#[derive(Debug, Default)]
pub struct MarketGate {
    busy: AtomicBool,
    wake: Notify,
}

impl MarketGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_pass(&self) {
        self.busy.store(true, Ordering::SeqCst);
    }

    pub fn end_pass(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    pub fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
    }

    /// Request an early wakeup. Returns whether the request was accepted.
    pub fn wake_early(&self) -> bool {
        if self.is_idle() {
            self.wake.notify_one();
            true
        } else {
            false
        }
    }

    /// Wake regardless of the busy flag. `Notify` stores the permit, so a
    /// wake delivered mid-pass is consumed by the very next wait. Used for
    /// shutdown, where skipping one cadence is the point.
    pub fn wake_now(&self) {
        self.wake.notify_one();
    }

    /// Sleep for the cadence, returning early if a wakeup arrives.
    pub async fn wait(&self, cadence: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(cadence) => {}
            _ = self.wake.notified() => {}
        }
    }
}

/// Per-market runtime handles shared between the scheduler and the wake
/// trigger.
#[derive(Debug)]
pub struct MarketRuntime {
    pub market_id: i64,
    /// Pair as configured, e.g. "BTC/USDC".
    pub pair: String,
    /// Normalized symbol used as the price-cache key.
    pub symbol: String,
    pub gate: MarketGate,
    /// Updated by the scheduler at the end of each pass.
    pub active_range: RwLock<Option<ActiveRange>>,
}

impl MarketRuntime {
    pub fn new(market_id: i64, pair: &str, symbol: &str) -> Self {
        Self {
            market_id,
            pair: pair.to_string(),
            symbol: symbol.to_string(),
            gate: MarketGate::new(),
            active_range: RwLock::new(None),
        }
    }
}

/// Process-wide engine state.
#[derive(Debug)]
pub struct EngineState {
    pub instance_id: i64,
    /// Market runtimes keyed by normalized symbol.
    markets: HashMap<String, Arc<MarketRuntime>>,
    prices: RwLock<HashMap<String, Decimal>>,
    shutdown: AtomicBool,
}

impl EngineState {
    pub fn new(instance_id: i64) -> Self {
        Self {
            instance_id,
            markets: HashMap::new(),
            prices: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn insert_market(&mut self, runtime: Arc<MarketRuntime>) {
        self.markets.insert(runtime.symbol.clone(), runtime);
    }

    pub fn market(&self, symbol: &str) -> Option<&Arc<MarketRuntime>> {
        self.markets.get(symbol)
    }

    pub fn markets(&self) -> impl Iterator<Item = &Arc<MarketRuntime>> {
        self.markets.values()
    }

    pub async fn update_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    pub async fn update_prices(&self, prices: &HashMap<String, Decimal>) {
        let mut cache = self.prices.write().await;
        for (symbol, price) in prices {
            cache.insert(symbol.clone(), *price);
        }
    }

    pub async fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().await.get(symbol).copied()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wake_refused_while_busy() {
        let gate = MarketGate::new();
        assert!(gate.is_idle());

        gate.begin_pass();
        assert!(!gate.wake_early());

        gate.end_pass();
        assert!(gate.wake_early());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ends_early_on_wake() {
        let gate = Arc::new(MarketGate::new());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let started = tokio::time::Instant::now();
                gate.wait(Duration::from_secs(180)).await;
                started.elapsed()
            })
        };

        // Let the waiter register with the Notify before waking it.
        tokio::task::yield_now().await;
        assert!(gate.wake_early());

        let elapsed = waiter.await.unwrap();
        assert!(elapsed < Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_now_delivered_mid_pass_skips_the_next_wait() {
        let gate = MarketGate::new();

        gate.begin_pass();
        assert!(!gate.wake_early());
        gate.wake_now();
        gate.end_pass();

        // The stored permit makes the next wait return immediately.
        let started = tokio::time::Instant::now();
        gate.wait(Duration::from_secs(180)).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_expires_on_cadence() {
        let gate = MarketGate::new();
        let started = tokio::time::Instant::now();
        gate.wait(Duration::from_secs(3)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_active_range_contains() {
        let range = ActiveRange {
            min: dec!(59000),
            max: dec!(61000),
        };
        assert!(range.contains(dec!(60000)));
        assert!(!range.contains(dec!(59000)));
        assert!(!range.contains(dec!(61500)));
    }

    #[tokio::test]
    async fn test_price_cache() {
        let state = EngineState::new(1);
        assert_eq!(state.price("BTCUSDC").await, None);
        state.update_price("BTCUSDC", dec!(60000)).await;
        assert_eq!(state.price("BTCUSDC").await, Some(dec!(60000)));
    }
}
