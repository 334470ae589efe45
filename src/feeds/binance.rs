//! Binance public kline feed
//!
//! No API key required: `/api/v3/klines` is a public market data endpoint.
//! Balances come from the paper account the orders are routed to.
//!
//! # Example
//! ```no_run
//! use pattern_trader::feeds::BinanceClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BinanceClient::new()?;
//!     let klines = client.get_klines("BTCUSDT", "1h", 100).await?;
//!     println!("Fetched {} klines", klines.len());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

use super::{FeedError, MarketDataProvider};
use crate::execution::PaperExchange;
use crate::types::{Candle, Symbol};

const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";

/// Maximum klines per request (Binance limit)
const MAX_KLINES_PER_REQUEST: usize = 1000;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One kline row.
/// The API returns an array: `[open_time, open, high, low, close, volume, close_time, ...]`
/// with prices and volume encoded as strings.
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceKline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl BinanceKline {
    pub fn from_raw(raw: &[serde_json::Value]) -> Option<Self> {
        if raw.len() < 7 {
            return None;
        }

        let num = |v: &serde_json::Value| v.as_str()?.parse::<f64>().ok();

        Some(BinanceKline {
            open_time: raw[0].as_i64()?,
            open: num(&raw[1])?,
            high: num(&raw[2])?,
            low: num(&raw[3])?,
            close: num(&raw[4])?,
            volume: num(&raw[5])?,
            close_time: raw[6].as_i64()?,
        })
    }

    pub fn to_candle(&self) -> Option<Candle> {
        let datetime = DateTime::<Utc>::from_timestamp_millis(self.open_time)?;
        Candle::new(datetime, self.open, self.high, self.low, self.close, self.volume).ok()
    }
}

#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new() -> Result<Self, FeedError> {
        Self::with_base_url(BINANCE_API_BASE)
    }

    /// Point at another deployment of the same API (testnet, regional mirror)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(BinanceClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the most recent `limit` klines (capped at 1000)
    pub async fn get_klines(&self, pair: &str, interval: &str, limit: usize) -> Result<Vec<BinanceKline>, FeedError> {
        let url = format!("{}/klines", self.base_url);
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);

        debug!(pair, interval, limit, "Fetching klines");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", pair.to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Api { status, body });
        }

        let raw: Vec<Vec<serde_json::Value>> = response.json().await?;
        let klines: Vec<BinanceKline> = raw.iter().filter_map(|row| BinanceKline::from_raw(row)).collect();

        if klines.len() < raw.len() {
            warn!(dropped = raw.len() - klines.len(), "Unparseable kline rows");
        }
        Ok(klines)
    }
}

/// Binance candles plus balances of a paper account
#[derive(Debug, Clone)]
pub struct BinanceFeed {
    client: BinanceClient,
    account: Arc<PaperExchange>,
}

impl BinanceFeed {
    pub fn new(client: BinanceClient, account: Arc<PaperExchange>) -> Self {
        BinanceFeed { client, account }
    }
}

#[async_trait]
impl MarketDataProvider for BinanceFeed {
    async fn fetch_candles(&self, symbol: &Symbol, timeframe: &str, limit: usize) -> Result<Vec<Candle>, FeedError> {
        let klines = self.client.get_klines(&symbol.to_pair(), timeframe, limit).await?;
        Ok(klines.iter().filter_map(BinanceKline::to_candle).collect())
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, f64>, FeedError> {
        self.account
            .balances()
            .map_err(|e| FeedError::Balance(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_row() -> Vec<serde_json::Value> {
        json!([
            1_704_067_200_000i64,
            "42000.10",
            "42500.00",
            "41800.50",
            "42300.00",
            "123.45",
            1_704_070_799_999i64,
            "5200000.0",
            1500,
            "60.0",
            "2500000.0",
            "0"
        ])
        .as_array()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_kline_from_raw() {
        let kline = BinanceKline::from_raw(&raw_row()).unwrap();
        assert_eq!(kline.open, 42000.10);
        assert_eq!(kline.close, 42300.0);
        assert_eq!(kline.volume, 123.45);

        let candle = kline.to_candle().unwrap();
        assert_eq!(candle.datetime.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(candle.high, 42500.0);
    }

    #[test]
    fn test_kline_rejects_malformed_rows() {
        let mut row = raw_row();
        row[2] = json!(42500.0); // number instead of string
        assert!(BinanceKline::from_raw(&row).is_none());
        assert!(BinanceKline::from_raw(&raw_row()[..4]).is_none());
    }

    #[test]
    fn test_kline_invalid_ohlc_has_no_candle() {
        let mut row = raw_row();
        row[3] = json!("43000.0"); // low above high
        let kline = BinanceKline::from_raw(&row).unwrap();
        assert!(kline.to_candle().is_none());
    }

    #[tokio::test]
    async fn test_feed_balance_from_account() {
        let account = Arc::new(PaperExchange::new().with_balance("USDT", 2500.0));
        let feed = BinanceFeed::new(BinanceClient::new().unwrap(), account);
        assert_eq!(feed.fetch_balance().await.unwrap().get("USDT"), Some(&2500.0));
    }
}
