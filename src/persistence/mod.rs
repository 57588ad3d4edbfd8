//! SQLite persistence for market configuration and grid state.
//!
//! The database is the source of truth across restarts: market parameters,
//! the generated grid rows with their live order ids, and the profit ledger.
//! Decimals are stored as TEXT to keep exact values.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::exchange::types::Side;

/// One market's configuration row.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub id: i64,
    /// Which bot instance owns this market.
    pub instance_id: i64,
    pub name: String,
    /// Pair as configured, e.g. "BTC/USDC".
    pub pair: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub margin_percent: Decimal,
    pub target_percent: Decimal,
    pub usd_per_level: Decimal,
    /// Price rounding, in decimal places.
    pub decimal_price: u32,
    /// Quantity rounding, in decimal places.
    pub decimal_quantity: u32,
    pub rebuy_enabled: bool,
    /// Accumulated profit awaiting conversion back into the base asset.
    pub rebuy_value: Decimal,
    /// Total quote spent on rebuys so far.
    pub rebought_value: Decimal,
    /// Total base asset acquired through rebuys.
    pub rebought_coin: Decimal,
    /// Live reservation order id, if one is resting.
    pub order_block_id: Option<String>,
    /// Price at which the reservation order parks spare quote.
    pub order_block_price: Decimal,
    /// Optional execution window bounds.
    pub execution_price_min: Option<Decimal>,
    pub execution_price_max: Option<Decimal>,
}

/// One rung of a market's grid.
#[derive(Debug, Clone)]
pub struct GridRow {
    pub id: i64,
    pub pair: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub quantity: Decimal,
    /// Market entry price at grid creation, kept for first-profit accounting.
    pub entry_price: Decimal,
    pub buy_order_id: Option<String>,
    pub sell_order_id: Option<String>,
    /// Side of the most recent fill on this rung.
    pub last_side: Option<Side>,
    /// True when the rung completed a full buy-then-sell alternation, so the
    /// next sell fill books profit.
    pub last_operation: bool,
    /// Profit from the opening sell above entry, booked once.
    pub first_profit: Option<Decimal>,
}

/// A booked cycle profit.
#[derive(Debug, Clone)]
pub struct ProfitEvent {
    pub pair: String,
    pub amount: Decimal,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub quantity: Decimal,
}

/// Storage seam between the engine and SQLite.
pub trait ConfigRepository: Send + Sync {
    fn load_market_configs(&self, instance_id: i64) -> Result<Vec<MarketConfig>, PersistenceError>;
    fn load_market_config(&self, id: i64) -> Result<Option<MarketConfig>, PersistenceError>;
    /// Insert a new market and return its id.
    fn insert_market_config(&self, config: &MarketConfig) -> Result<i64, PersistenceError>;
    /// Persist every mutable field of the market row.
    fn update_market_config(&self, config: &MarketConfig) -> Result<(), PersistenceError>;
    /// Set or clear the reservation order id without touching other fields.
    fn set_order_block(&self, market_id: i64, order_id: Option<&str>)
        -> Result<(), PersistenceError>;

    fn load_grid_rows(&self, pair: &str) -> Result<Vec<GridRow>, PersistenceError>;
    /// Insert a new grid row and return its id.
    fn insert_grid_row(&self, row: &GridRow) -> Result<i64, PersistenceError>;
    fn update_grid_row(&self, row: &GridRow) -> Result<(), PersistenceError>;
    /// Drop all rows for a pair. Used when regenerating a grid.
    fn delete_grid_rows(&self, pair: &str) -> Result<usize, PersistenceError>;

    fn record_profit(&self, event: &ProfitEvent) -> Result<(), PersistenceError>;
    fn total_profit(&self, pair: &str) -> Result<Decimal, PersistenceError>;
}

/// SQLite-backed repository.
pub struct SqliteConfigRepository {
    conn: Mutex<Connection>,
}

fn parse_dec(column: &'static str, value: &str) -> Result<Decimal, PersistenceError> {
    Decimal::from_str(value).map_err(|_| PersistenceError::CorruptValue {
        column,
        value: value.to_string(),
    })
}

fn parse_dec_opt(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<Decimal>, PersistenceError> {
    value.map(|v| parse_dec(column, &v)).transpose()
}

fn parse_side(column: &'static str, value: Option<String>) -> Result<Option<Side>, PersistenceError> {
    match value.as_deref() {
        None => Ok(None),
        Some("BUY") => Ok(Some(Side::Buy)),
        Some("SELL") => Ok(Some(Side::Sell)),
        Some(other) => Err(PersistenceError::CorruptValue {
            column,
            value: other.to_string(),
        }),
    }
}

/// Intermediate row with TEXT columns still unparsed.
struct RawMarketRow {
    id: i64,
    instance_id: i64,
    name: String,
    pair: String,
    entry_price: String,
    exit_price: String,
    margin_percent: String,
    target_percent: String,
    usd_per_level: String,
    decimal_price: u32,
    decimal_quantity: u32,
    rebuy_enabled: bool,
    rebuy_value: String,
    rebought_value: String,
    rebought_coin: String,
    order_block_id: Option<String>,
    order_block_price: String,
    execution_price_min: Option<String>,
    execution_price_max: Option<String>,
}

impl RawMarketRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            instance_id: row.get(1)?,
            name: row.get(2)?,
            pair: row.get(3)?,
            entry_price: row.get(4)?,
            exit_price: row.get(5)?,
            margin_percent: row.get(6)?,
            target_percent: row.get(7)?,
            usd_per_level: row.get(8)?,
            decimal_price: row.get(9)?,
            decimal_quantity: row.get(10)?,
            rebuy_enabled: row.get(11)?,
            rebuy_value: row.get(12)?,
            rebought_value: row.get(13)?,
            rebought_coin: row.get(14)?,
            order_block_id: row.get(15)?,
            order_block_price: row.get(16)?,
            execution_price_min: row.get(17)?,
            execution_price_max: row.get(18)?,
        })
    }

    fn into_config(self) -> Result<MarketConfig, PersistenceError> {
        Ok(MarketConfig {
            id: self.id,
            instance_id: self.instance_id,
            name: self.name,
            pair: self.pair,
            entry_price: parse_dec("entry_price", &self.entry_price)?,
            exit_price: parse_dec("exit_price", &self.exit_price)?,
            margin_percent: parse_dec("margin_percent", &self.margin_percent)?,
            target_percent: parse_dec("target_percent", &self.target_percent)?,
            usd_per_level: parse_dec("usd_per_level", &self.usd_per_level)?,
            decimal_price: self.decimal_price,
            decimal_quantity: self.decimal_quantity,
            rebuy_enabled: self.rebuy_enabled,
            rebuy_value: parse_dec("rebuy_value", &self.rebuy_value)?,
            rebought_value: parse_dec("rebought_value", &self.rebought_value)?,
            rebought_coin: parse_dec("rebought_coin", &self.rebought_coin)?,
            order_block_id: self.order_block_id,
            order_block_price: parse_dec("order_block_price", &self.order_block_price)?,
            execution_price_min: parse_dec_opt("execution_price_min", self.execution_price_min)?,
            execution_price_max: parse_dec_opt("execution_price_max", self.execution_price_max)?,
        })
    }
}

struct RawGridRow {
    id: i64,
    pair: String,
    buy_price: String,
    sell_price: String,
    quantity: String,
    entry_price: String,
    buy_order_id: Option<String>,
    sell_order_id: Option<String>,
    last_side: Option<String>,
    last_operation: bool,
    first_profit: Option<String>,
}

impl RawGridRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pair: row.get(1)?,
            buy_price: row.get(2)?,
            sell_price: row.get(3)?,
            quantity: row.get(4)?,
            entry_price: row.get(5)?,
            buy_order_id: row.get(6)?,
            sell_order_id: row.get(7)?,
            last_side: row.get(8)?,
            last_operation: row.get(9)?,
            first_profit: row.get(10)?,
        })
    }

    fn into_grid_row(self) -> Result<GridRow, PersistenceError> {
        Ok(GridRow {
            id: self.id,
            pair: self.pair,
            buy_price: parse_dec("buy_price", &self.buy_price)?,
            sell_price: parse_dec("sell_price", &self.sell_price)?,
            quantity: parse_dec("quantity", &self.quantity)?,
            entry_price: parse_dec("entry_price", &self.entry_price)?,
            buy_order_id: self.buy_order_id,
            sell_order_id: self.sell_order_id,
            last_side: parse_side("last_side", self.last_side)?,
            last_operation: self.last_operation,
            first_profit: parse_dec_opt("first_profit", self.first_profit)?,
        })
    }
}

const MARKET_COLUMNS: &str = "id, instance_id, name, pair, entry_price, exit_price, \
     margin_percent, target_percent, usd_per_level, decimal_price, decimal_quantity, \
     rebuy_enabled, rebuy_value, rebought_value, rebought_coin, order_block_id, \
     order_block_price, execution_price_min, execution_price_max";

const GRID_COLUMNS: &str = "id, pair, buy_price, sell_price, quantity, entry_price, \
     buy_order_id, sell_order_id, last_side, last_operation, first_profit";

impl SqliteConfigRepository {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path.as_ref())?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        info!("Database opened at {:?}", db_path.as_ref());
        Ok(repo)
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().expect("repository mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                pair TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                margin_percent TEXT NOT NULL,
                target_percent TEXT NOT NULL,
                usd_per_level TEXT NOT NULL,
                decimal_price INTEGER NOT NULL,
                decimal_quantity INTEGER NOT NULL,
                rebuy_enabled INTEGER NOT NULL DEFAULT 0,
                rebuy_value TEXT NOT NULL DEFAULT '0',
                rebought_value TEXT NOT NULL DEFAULT '0',
                rebought_coin TEXT NOT NULL DEFAULT '0',
                order_block_id TEXT,
                order_block_price TEXT NOT NULL DEFAULT '0',
                execution_price_min TEXT,
                execution_price_max TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_markets_instance ON markets(instance_id);

            CREATE TABLE IF NOT EXISTS grid_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                buy_price TEXT NOT NULL,
                sell_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                buy_order_id TEXT,
                sell_order_id TEXT,
                last_side TEXT,
                last_operation INTEGER NOT NULL DEFAULT 0,
                first_profit TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_grid_rows_pair ON grid_rows(pair);

            CREATE TABLE IF NOT EXISTS profits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                pair TEXT NOT NULL,
                amount TEXT NOT NULL,
                buy_price TEXT NOT NULL,
                sell_price TEXT NOT NULL,
                quantity TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_profits_pair ON profits(pair);
            "#,
        )?;
        debug!("Database schema initialized");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("repository mutex poisoned")
    }
}

impl ConfigRepository for SqliteConfigRepository {
    fn load_market_configs(&self, instance_id: i64) -> Result<Vec<MarketConfig>, PersistenceError> {
        let conn = self.lock();
        let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE instance_id = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<RawMarketRow> = stmt
            .query_map([instance_id], RawMarketRow::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(RawMarketRow::into_config).collect()
    }

    fn load_market_config(&self, id: i64) -> Result<Option<MarketConfig>, PersistenceError> {
        let conn = self.lock();
        let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE id = ?1");
        let raw = conn
            .query_row(&sql, [id], RawMarketRow::from_row)
            .optional()?;
        raw.map(RawMarketRow::into_config).transpose()
    }

    fn insert_market_config(&self, config: &MarketConfig) -> Result<i64, PersistenceError> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO markets (instance_id, name, pair, entry_price, exit_price,
                                 margin_percent, target_percent, usd_per_level,
                                 decimal_price, decimal_quantity, rebuy_enabled,
                                 rebuy_value, rebought_value, rebought_coin,
                                 order_block_id, order_block_price,
                                 execution_price_min, execution_price_max)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
            params![
                config.instance_id,
                config.name,
                config.pair,
                config.entry_price.to_string(),
                config.exit_price.to_string(),
                config.margin_percent.to_string(),
                config.target_percent.to_string(),
                config.usd_per_level.to_string(),
                config.decimal_price,
                config.decimal_quantity,
                config.rebuy_enabled,
                config.rebuy_value.to_string(),
                config.rebought_value.to_string(),
                config.rebought_coin.to_string(),
                config.order_block_id,
                config.order_block_price.to_string(),
                config.execution_price_min.map(|v| v.to_string()),
                config.execution_price_max.map(|v| v.to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_market_config(&self, config: &MarketConfig) -> Result<(), PersistenceError> {
        let conn = self.lock();
        conn.execute(
            r#"
            UPDATE markets SET
                instance_id = ?2, name = ?3, pair = ?4, entry_price = ?5, exit_price = ?6,
                margin_percent = ?7, target_percent = ?8, usd_per_level = ?9,
                decimal_price = ?10, decimal_quantity = ?11, rebuy_enabled = ?12,
                rebuy_value = ?13, rebought_value = ?14, rebought_coin = ?15,
                order_block_id = ?16, order_block_price = ?17,
                execution_price_min = ?18, execution_price_max = ?19
            WHERE id = ?1
            "#,
            params![
                config.id,
                config.instance_id,
                config.name,
                config.pair,
                config.entry_price.to_string(),
                config.exit_price.to_string(),
                config.margin_percent.to_string(),
                config.target_percent.to_string(),
                config.usd_per_level.to_string(),
                config.decimal_price,
                config.decimal_quantity,
                config.rebuy_enabled,
                config.rebuy_value.to_string(),
                config.rebought_value.to_string(),
                config.rebought_coin.to_string(),
                config.order_block_id,
                config.order_block_price.to_string(),
                config.execution_price_min.map(|v| v.to_string()),
                config.execution_price_max.map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    fn set_order_block(
        &self,
        market_id: i64,
        order_id: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE markets SET order_block_id = ?2 WHERE id = ?1",
            params![market_id, order_id],
        )?;
        Ok(())
    }

    fn load_grid_rows(&self, pair: &str) -> Result<Vec<GridRow>, PersistenceError> {
        let conn = self.lock();
        let sql = format!("SELECT {GRID_COLUMNS} FROM grid_rows WHERE pair = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<RawGridRow> = stmt
            .query_map([pair], RawGridRow::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(RawGridRow::into_grid_row).collect()
    }

    fn insert_grid_row(&self, row: &GridRow) -> Result<i64, PersistenceError> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO grid_rows (pair, buy_price, sell_price, quantity, entry_price,
                                   buy_order_id, sell_order_id, last_side, last_operation,
                                   first_profit)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                row.pair,
                row.buy_price.to_string(),
                row.sell_price.to_string(),
                row.quantity.to_string(),
                row.entry_price.to_string(),
                row.buy_order_id,
                row.sell_order_id,
                row.last_side.map(Side::as_str),
                row.last_operation,
                row.first_profit.map(|v| v.to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_grid_row(&self, row: &GridRow) -> Result<(), PersistenceError> {
        let conn = self.lock();
        conn.execute(
            r#"
            UPDATE grid_rows SET
                pair = ?2, buy_price = ?3, sell_price = ?4, quantity = ?5, entry_price = ?6,
                buy_order_id = ?7, sell_order_id = ?8, last_side = ?9, last_operation = ?10,
                first_profit = ?11
            WHERE id = ?1
            "#,
            params![
                row.id,
                row.pair,
                row.buy_price.to_string(),
                row.sell_price.to_string(),
                row.quantity.to_string(),
                row.entry_price.to_string(),
                row.buy_order_id,
                row.sell_order_id,
                row.last_side.map(Side::as_str),
                row.last_operation,
                row.first_profit.map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    fn delete_grid_rows(&self, pair: &str) -> Result<usize, PersistenceError> {
        let conn = self.lock();
        let deleted = conn.execute("DELETE FROM grid_rows WHERE pair = ?1", [pair])?;
        Ok(deleted)
    }

    fn record_profit(&self, event: &ProfitEvent) -> Result<(), PersistenceError> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO profits (created_at, pair, amount, buy_price, sell_price, quantity)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                Utc::now().to_rfc3339(),
                event.pair,
                event.amount.to_string(),
                event.buy_price.to_string(),
                event.sell_price.to_string(),
                event.quantity.to_string(),
            ],
        )?;
        Ok(())
    }

    fn total_profit(&self, pair: &str) -> Result<Decimal, PersistenceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT amount FROM profits WHERE pair = ?1")?;
        let amounts: Vec<String> = stmt
            .query_map([pair], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        let mut total = Decimal::ZERO;
        for amount in amounts {
            total += parse_dec("amount", &amount)?;
        }
        Ok(total)
    }
}
