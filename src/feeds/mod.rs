//! Market data and news collaborators
//!
//! The strategy loop consumes two capabilities:
//! - [`MarketDataProvider`]: candles per timeframe and account balances
//! - [`NewsGate`]: whether a high-impact economic event is close enough to stand aside
//!
//! Shipped implementations:
//! - [`BinanceFeed`]: public Binance klines, balances from a paper account
//! - [`CsvFeed`]: candles replayed from CSV files, fixed balances
//! - [`NewsCalendar`]: economic calendar loaded from a JSON file

pub mod binance;
pub mod csv;
pub mod news;

pub use self::binance::{BinanceClient, BinanceFeed, BinanceKline};
pub use self::csv::{load_csv, CsvFeed};
pub use self::news::{Impact, NewsCalendar, NewsEvent};

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{Candle, Symbol};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("balance unavailable: {0}")]
    Balance(String),
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Most recent `limit` candles, oldest first. May be empty.
    async fn fetch_candles(&self, symbol: &Symbol, timeframe: &str, limit: usize) -> Result<Vec<Candle>, FeedError>;

    /// Total balance per currency
    async fn fetch_balance(&self) -> Result<HashMap<String, f64>, FeedError>;
}

#[async_trait]
pub trait NewsGate: Send + Sync {
    /// True if a high-impact event falls within `minutes` before or after now
    async fn has_high_impact_event_within(&self, minutes: i64) -> bool;
}
