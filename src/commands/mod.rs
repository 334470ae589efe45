//! CLI command implementations

pub mod run;
pub mod scan;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use pattern_trader::config::Config;
use pattern_trader::execution::{OrderExecutor, PaperExchange};
use pattern_trader::feeds::{BinanceClient, BinanceFeed, CsvFeed, MarketDataProvider, NewsCalendar, NewsGate};
use pattern_trader::PatternStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FeedKind {
    Binance,
    Csv,
}

/// Wire collaborators from the config. Orders always go to a paper account
/// seeded with `exchange.paper_balance`.
pub fn build_strategy(config: Config, feed: FeedKind, data_dir: Option<PathBuf>) -> Result<PatternStrategy> {
    let quote = config.exchange.quote_currency.clone();
    let account = Arc::new(PaperExchange::new().with_balance(quote.clone(), config.exchange.paper_balance));

    let provider: Arc<dyn MarketDataProvider> = match feed {
        FeedKind::Binance => {
            let client = match &config.exchange.base_url {
                Some(url) => BinanceClient::with_base_url(url.as_str()),
                None => BinanceClient::new(),
            }
            .context("Failed to build Binance client")?;
            Arc::new(BinanceFeed::new(client, account.clone()))
        }
        FeedKind::Csv => {
            let Some(dir) = data_dir else {
                bail!("--data-dir is required with --feed csv");
            };
            info!(data_dir = %dir.display(), "Replaying candles from CSV");
            Arc::new(CsvFeed::new(dir).with_balance(quote, config.exchange.paper_balance))
        }
    };

    let news: Arc<dyn NewsGate> = match &config.news.calendar_path {
        Some(path) => Arc::new(NewsCalendar::from_file(path, config.news.currency.clone())),
        None => Arc::new(NewsCalendar::disabled()),
    };

    let executor = OrderExecutor::new(config.trading.execution_mode, config.trading.order_type, account);

    Ok(PatternStrategy::new(config, provider, news, executor))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}
