//! CSV candle files for offline replays
//!
//! Layout: `{data_dir}/{PAIR}_{timeframe}.csv` with a header row and the
//! columns `datetime,open,high,low,close,volume`. Datetimes are RFC 3339 or
//! `YYYY-MM-DD HH:MM:SS` (UTC).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{FeedError, MarketDataProvider};
use crate::types::{Candle, Symbol};

#[derive(Debug, Deserialize)]
struct CsvRow {
    datetime: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, FeedError> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .map_err(|_| FeedError::Malformed(format!("unparseable datetime: {}", raw)))
}

/// Parse candles from CSV text. Rows that fail OHLC validation are dropped.
pub fn parse_csv(data: &[u8]) -> Result<Vec<Candle>, FeedError> {
    let mut reader = ::csv::Reader::from_reader(data);
    let mut candles = Vec::new();

    for (row_idx, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row?;
        let datetime = parse_datetime(&row.datetime)?;
        match Candle::new(datetime, row.open, row.high, row.low, row.close, row.volume) {
            Ok(candle) => candles.push(candle),
            Err(e) => warn!(row = row_idx + 1, error = %e, "Skipping invalid candle"),
        }
    }

    Ok(candles)
}

/// Load OHLCV data from a CSV file
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>, FeedError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| FeedError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_csv(&data)
}

/// Replays candles from CSV files with fixed balances
#[derive(Debug, Clone)]
pub struct CsvFeed {
    data_dir: PathBuf,
    balances: HashMap<String, f64>,
}

impl CsvFeed {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        CsvFeed {
            data_dir: data_dir.into(),
            balances: HashMap::new(),
        }
    }

    pub fn with_balance(mut self, currency: impl Into<String>, amount: f64) -> Self {
        self.balances.insert(currency.into(), amount);
        self
    }

    pub fn path_for(&self, symbol: &Symbol, timeframe: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.csv", symbol.to_pair(), timeframe))
    }
}

#[async_trait]
impl MarketDataProvider for CsvFeed {
    async fn fetch_candles(&self, symbol: &Symbol, timeframe: &str, limit: usize) -> Result<Vec<Candle>, FeedError> {
        let path = self.path_for(symbol, timeframe);
        let data = tokio::fs::read(&path).await.map_err(|source| FeedError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut candles = parse_csv(&data)?;
        let skip = candles.len().saturating_sub(limit);
        candles.drain(..skip);

        debug!(%symbol, timeframe, count = candles.len(), "Loaded candles from CSV");
        Ok(candles)
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, f64>, FeedError> {
        Ok(self.balances.clone())
    }
}
