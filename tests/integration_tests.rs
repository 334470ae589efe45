//! Integration tests for the pattern-trader system
//!
//! These tests drive the strategy loop end to end against in-memory
//! collaborators.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use pattern_trader::analysis::{majority_vote, PatternDetector, PatternKind, Trend};
use pattern_trader::execution::{ExecutionMode, OrderExecutor, OrderKind, OrderType, PaperExchange};
use pattern_trader::feeds::{FeedError, Impact, MarketDataProvider, NewsCalendar, NewsEvent};
use pattern_trader::risk::{
    is_size_allowed, BracketLevels, CloseReason, PositionSizerConfig, RiskManagerConfig, Trade, TradeDenial,
};
use pattern_trader::{Candle, Config, Money, OrderSide, PatternStrategy, Side, Symbol};

// =============================================================================
// Test Utilities
// =============================================================================

fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    let start = Utc::now() - Duration::hours(200);
    Candle::new(start + Duration::hours(i as i64), open, high, low, close, 1000.0).unwrap()
}

/// 95 bars ranging between 98 and 100, a breakout above 100, a pullback that
/// touches the broken level and a close more than 2% above it.
fn rectangle_breakout_candles() -> Vec<Candle> {
    let mut candles: Vec<Candle> = (0..95)
        .map(|i| {
            if i % 2 == 0 {
                candle(i, 99.0, 100.0, 98.0, 99.0)
            } else {
                candle(i, 99.0, 99.5, 98.5, 99.0)
            }
        })
        .collect();

    candles.push(candle(95, 99.5, 101.0, 99.2, 100.8));
    candles.push(candle(96, 100.8, 101.8, 100.5, 101.5));
    candles.push(candle(97, 101.5, 101.5, 100.2, 101.0));
    candles.push(candle(98, 101.0, 102.8, 100.9, 102.5));
    candles.push(candle(99, 102.5, 103.5, 102.0, 103.0));
    candles
}

struct MockFeed {
    candles: Vec<Candle>,
    balance: f64,
    fail_candles: bool,
}

#[async_trait]
impl MarketDataProvider for MockFeed {
    async fn fetch_candles(&self, _: &Symbol, _: &str, limit: usize) -> Result<Vec<Candle>, FeedError> {
        if self.fail_candles {
            return Err(FeedError::Malformed("connection reset".to_string()));
        }
        let skip = self.candles.len().saturating_sub(limit);
        Ok(self.candles[skip..].to_vec())
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, f64>, FeedError> {
        Ok(HashMap::from([("USDT".to_string(), self.balance)]))
    }
}

fn test_config() -> Config {
    Config::from_json(
        r#"{
            "exchange": {"quote_currency": "USDT"},
            "trading": {
                "symbol": "BTC/USDT",
                "timeframes": ["1h"],
                "allowed_patterns": ["RectangleBreakoutUp"],
                "risk_pct": 0.01,
                "take_profit_pips": 10,
                "stoploss_padding": 0,
                "poll_interval_seconds": 60
            }
        }"#,
    )
    .unwrap()
}

fn mock_feed(candles: Vec<Candle>) -> Arc<MockFeed> {
    Arc::new(MockFeed {
        candles,
        balance: 5000.0,
        fail_candles: false,
    })
}

fn simulated_strategy(config: Config, feed: Arc<MockFeed>, news: NewsCalendar) -> PatternStrategy {
    let executor = OrderExecutor::new(ExecutionMode::Simulate, OrderType::Market, Arc::new(PaperExchange::new()));
    PatternStrategy::new(config, feed, Arc::new(news), executor)
}

// =============================================================================
// End-to-End Strategy Tests
// =============================================================================

#[tokio::test]
async fn test_rectangle_breakout_opens_one_long_trade() {
    let mut strategy = simulated_strategy(
        test_config(),
        mock_feed(rectangle_breakout_candles()),
        NewsCalendar::disabled(),
    );

    let placed = strategy.run_iteration().await;
    assert_eq!(placed, 1);

    let risk = strategy.risk_manager();
    assert_eq!(risk.open_trade_count(), 1);

    let trade = &risk.open_trades()[0];
    assert_eq!(trade.side, Side::Long);
    assert_eq!(trade.pattern, PatternKind::RectangleBreakoutUp);
    assert_eq!(trade.entry_price, 103.0);
    assert_eq!(trade.stop_loss, 98.0);
    assert_eq!(trade.take_profit, 113.0);
    // 5000 * 0.01 / (103 - 98)
    assert!((trade.size - 10.0).abs() < 1e-9);
    assert!(trade.order_id.starts_with("SIM-"));

    assert_eq!(risk.daily_stats(Utc::now().date_naive()).trade_count, 1);
}

#[tokio::test]
async fn test_live_mode_submits_bracket_to_connector() {
    let account = Arc::new(PaperExchange::new().with_balance("USDT", 5000.0));
    let executor = OrderExecutor::new(ExecutionMode::Live, OrderType::Market, account.clone());
    let mut strategy = PatternStrategy::new(
        test_config(),
        mock_feed(rectangle_breakout_candles()),
        Arc::new(NewsCalendar::disabled()),
        executor,
    );

    assert_eq!(strategy.run_iteration().await, 1);

    let orders = account.orders();
    assert_eq!(orders.len(), 3);

    assert_eq!(orders[0].request.side, OrderSide::Buy);
    assert_eq!(orders[0].request.kind, OrderKind::Market);
    assert!(!orders[0].reduce_only);

    assert_eq!(orders[1].request.side, OrderSide::Sell);
    assert_eq!(orders[1].request.kind, OrderKind::StopMarket { stop_price: 98.0 });
    assert!(orders[1].reduce_only);

    assert_eq!(orders[2].request.kind, OrderKind::Limit { price: 113.0 });
    assert!(orders[2].reduce_only);

    let trade = &strategy.risk_manager().open_trades()[0];
    assert_eq!(trade.order_id, orders[0].order_id);
}

#[tokio::test]
async fn test_news_blackout_skips_timeframe() {
    let news = NewsCalendar::from_events(
        "USD",
        vec![NewsEvent {
            title: "FOMC Statement".to_string(),
            time: Utc::now() + Duration::minutes(10),
            impact: Impact::High,
            currency: "USD".to_string(),
        }],
    );
    let mut strategy = simulated_strategy(test_config(), mock_feed(rectangle_breakout_candles()), news);

    assert_eq!(strategy.run_iteration().await, 0);
    assert_eq!(strategy.risk_manager().open_trade_count(), 0);
}

#[tokio::test]
async fn test_pattern_outside_allow_list_is_ignored() {
    let mut config = test_config();
    config.trading.allowed_patterns = vec![PatternKind::RectangleBreakoutDown];
    let mut strategy = simulated_strategy(config, mock_feed(rectangle_breakout_candles()), NewsCalendar::disabled());

    assert_eq!(strategy.run_iteration().await, 0);
}

#[tokio::test]
async fn test_concurrency_limit_caps_repeated_signals() {
    let mut strategy = simulated_strategy(
        test_config(),
        mock_feed(rectangle_breakout_candles()),
        NewsCalendar::disabled(),
    );

    for _ in 0..5 {
        strategy.run_iteration().await;
    }

    let risk = strategy.risk_manager();
    assert_eq!(risk.open_trade_count(), 3);
    assert_eq!(risk.daily_stats(Utc::now().date_naive()).trade_count, 3);
}

#[tokio::test]
async fn test_zero_balance_never_reaches_executor() {
    let account = Arc::new(PaperExchange::new());
    let executor = OrderExecutor::new(ExecutionMode::Live, OrderType::Market, account.clone());
    let feed = Arc::new(MockFeed {
        candles: rectangle_breakout_candles(),
        balance: 0.0,
        fail_candles: false,
    });
    let mut strategy = PatternStrategy::new(test_config(), feed, Arc::new(NewsCalendar::disabled()), executor);

    assert_eq!(strategy.run_iteration().await, 0);
    assert!(account.orders().is_empty());
}

#[tokio::test]
async fn test_feed_failure_does_not_stop_iteration() {
    let feed = Arc::new(MockFeed {
        candles: Vec::new(),
        balance: 5000.0,
        fail_candles: true,
    });
    let mut strategy = simulated_strategy(test_config(), feed, NewsCalendar::disabled());

    assert_eq!(strategy.run_iteration().await, 0);
    assert_eq!(strategy.run_iteration().await, 0);
}

#[tokio::test]
async fn test_scan_reports_retest_status() {
    let strategy = simulated_strategy(
        test_config(),
        mock_feed(rectangle_breakout_candles()),
        NewsCalendar::disabled(),
    );

    let scan = strategy.scan_timeframe("1h").await.unwrap();
    assert_eq!(scan.bars, 100);

    let confirmed: Vec<_> = scan
        .patterns
        .iter()
        .filter(|p| p.retest_confirmed && p.pattern.kind() == PatternKind::RectangleBreakoutUp)
        .collect();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].pattern.neckline, 100.0);
    assert_eq!(confirmed[0].pattern.formation_index, 95);
}

// =============================================================================
// Component Properties
// =============================================================================

#[test]
fn test_detection_order_is_chronological() {
    let patterns = PatternDetector::default().detect(&rectangle_breakout_candles());
    assert!(!patterns.is_empty());
    assert!(patterns
        .windows(2)
        .all(|w| w[0].formation_index <= w[1].formation_index));
}

#[test]
fn test_sizing_formula_and_zero_distance() {
    let sizer = PositionSizerConfig::default().with_risk_pct(0.02).build();
    assert_eq!(sizer.calculate_position_size(10_000.0, 100.0, 95.0), 40.0);

    let zero = sizer.calculate_position_size(10_000.0, 100.0, 100.0);
    assert_eq!(zero, 0.0);
    assert!(!is_size_allowed(zero, 0.0, 100.0));
    assert!(!sizer.is_size_allowed(zero));
}

#[test]
fn test_gate_concurrency_checked_before_loss_limit() {
    let mut risk = RiskManagerConfig::default().with_max_concurrent_trades(3).build();
    let levels = BracketLevels::new(Side::Long, 100.0, 95.0, 110.0).unwrap();

    for i in 0..3 {
        let trade = Trade::new(
            format!("T-{}", i),
            Symbol::new("BTC/USDT"),
            PatternKind::DoubleTop,
            &levels,
            1.0,
            Utc::now(),
        );
        assert!(risk.add_trade(trade));
    }

    // loss limit and news would also deny; concurrency must be reported first
    let denial = risk.can_open_trade(-1.0, true).unwrap_err();
    assert_eq!(denial, TradeDenial::MaxConcurrentTrades { open: 3, max: 3 });
}

#[test]
fn test_closing_twice_does_not_double_count() {
    let mut risk = RiskManagerConfig::default().build();
    let levels = BracketLevels::new(Side::Short, 100.0, 105.0, 90.0).unwrap();
    let trade = Trade::new(
        "T-1",
        Symbol::new("BTC/USDT"),
        PatternKind::HeadAndShouldersTop,
        &levels,
        2.0,
        Utc::now(),
    );
    risk.add_trade(trade);

    let pnl = risk.close_trade("T-1", 90.0, CloseReason::TakeProfit);
    assert_eq!(pnl, Some(Money::from_f64(20.0)));
    assert_eq!(risk.close_trade("T-1", 90.0, CloseReason::TakeProfit), None);

    let today: NaiveDate = Utc::now().date_naive();
    assert_eq!(risk.daily_stats(today).realized_pnl, Money::from_f64(20.0));
    assert_eq!(risk.closed_trades().len(), 1);
    assert_eq!(risk.open_trade_count(), 0);
}

#[test]
fn test_two_of_three_votes_win() {
    assert_eq!(
        majority_vote(&[Trend::Bullish, Trend::Bullish, Trend::Bearish]),
        Trend::Bullish
    );
    assert_eq!(
        majority_vote(&[Trend::Bullish, Trend::Sideways, Trend::Bearish]),
        Trend::Sideways
    );
}
