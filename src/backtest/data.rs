//! Historical candle loading for backtesting.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;

/// One OHLC candle. `open_time` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// CSV candle loader.
///
/// Expected CSV format (kline export, extra trailing columns ignored):
/// ```csv
/// open_time,open,high,low,close
/// 1764547200000,60012.1,60530.0,59875.5,60411.2
/// ```
#[derive(Clone)]
pub struct CsvCandleLoader {
    candles: Vec<Candle>,
}

impl CsvCandleLoader {
    /// Load candles from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read candle file: {}", path.display()))?;
        Self::from_csv_content(&content)
    }

    /// Parse candles from CSV content, sorting chronologically and dropping
    /// duplicate open times. The simulator requires strict ordering.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut candles = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line_num == 0 && line.starts_with("open_time") {
                continue;
            }

            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 5 {
                anyhow::bail!(
                    "Line {}: expected at least 5 fields, got {}",
                    line_num + 1,
                    fields.len()
                );
            }

            let parse = |idx: usize, name: &str| -> Result<Decimal> {
                Decimal::from_str(fields[idx].trim())
                    .with_context(|| format!("Line {}: invalid {name}: {}", line_num + 1, fields[idx]))
            };

            candles.push(Candle {
                open_time: fields[0]
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("Line {}: invalid open_time", line_num + 1))?,
                open: parse(1, "open")?,
                high: parse(2, "high")?,
                low: parse(3, "low")?,
                close: parse(4, "close")?,
            });
        }

        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);

        Ok(Self { candles })
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// First and last open times, if any candles were loaded.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        match (self.candles.first(), self.candles.last()) {
            (Some(first), Some(last)) => Some((first.open_time, last.open_time)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_csv_parsing() {
        let csv = "open_time,open,high,low,close\n\
                   1000,100.0,105.0,99.0,104.0\n\
                   2000,104.0,110.0,103.0,108.0\n";
        let loader = CsvCandleLoader::from_csv_content(csv).unwrap();
        assert_eq!(loader.len(), 2);
        assert_eq!(loader.candles()[0].high, dec!(105));
        assert_eq!(loader.time_range(), Some((1000, 2000)));
    }

    #[test]
    fn test_unordered_and_duplicate_rows_are_normalized() {
        let csv = "2000,104,110,103,108\n\
                   1000,100,105,99,104\n\
                   2000,104,110,103,108\n";
        let loader = CsvCandleLoader::from_csv_content(csv).unwrap();
        assert_eq!(loader.len(), 2);
        assert_eq!(loader.candles()[0].open_time, 1000);
        assert_eq!(loader.candles()[1].open_time, 2000);
    }

    #[test]
    fn test_extra_columns_are_ignored() {
        let csv = "1000,100,105,99,104,123456.78,42\n";
        let loader = CsvCandleLoader::from_csv_content(csv).unwrap();
        assert_eq!(loader.len(), 1);
        assert_eq!(loader.candles()[0].close, dec!(104));
    }

    #[test]
    fn test_short_row_is_rejected() {
        let csv = "1000,100,105\n";
        assert!(CsvCandleLoader::from_csv_content(csv).is_err());
    }
}
