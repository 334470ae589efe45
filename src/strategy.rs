//! Strategy orchestrator
//!
//! A single cooperative polling loop. Each iteration walks the configured
//! timeframes in order:
//!
//! 1. fetch candles (empty history skips the timeframe)
//! 2. ask the news gate (a nearby high-impact event skips the timeframe)
//! 3. classify the trend
//! 4. detect patterns
//! 5. for each pattern in detection order: allow-list, retest, side, balance,
//!    stop/target/size, risk gate, order, ledger
//! 6. log ledger statistics and evict old daily stats
//!
//! Collaborator failures are logged and skip the timeframe or pattern they hit.
//! Nothing but a [`StopHandle`] ends the loop.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::analysis::{Pattern, PatternDetector, Trend, TrendClassifier};
use crate::config::Config;
use crate::execution::{OrderExecutor, OrderResult};
use crate::feeds::{FeedError, MarketDataProvider, NewsGate};
use crate::risk::{BracketLevels, PositionSizer, RiskManager, Trade};
use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyState::Idle => write!(f, "idle"),
            StrategyState::Running => write!(f, "running"),
            StrategyState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("strategy already stopped; build a new one to run again")]
    AlreadyStopped,
}

/// Clonable stop signal. Stopping wakes a loop that is sleeping between
/// iterations; an iteration in progress finishes first.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once [`StopHandle::stop`] has been called
    pub async fn wait(&self) {
        while !self.is_stopped() {
            self.notify.notified().await;
        }
    }
}

/// Result of analysing one timeframe without trading it
#[derive(Debug, Clone, Serialize)]
pub struct TimeframeScan {
    pub timeframe: String,
    pub bars: usize,
    pub trend: Trend,
    pub trend_strength: f64,
    pub patterns: Vec<ScannedPattern>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedPattern {
    pub pattern: Pattern,
    pub retest_confirmed: bool,
}

pub struct PatternStrategy {
    config: Config,
    provider: Arc<dyn MarketDataProvider>,
    news: Arc<dyn NewsGate>,
    trend: TrendClassifier,
    detector: PatternDetector,
    sizer: PositionSizer,
    risk_manager: RiskManager,
    executor: OrderExecutor,
    state: StrategyState,
    iterations: u64,
}

impl fmt::Debug for PatternStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternStrategy")
            .field("symbol", &self.config.trading.symbol)
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .field("executor", &self.executor)
            .finish()
    }
}

impl PatternStrategy {
    pub fn new(
        config: Config,
        provider: Arc<dyn MarketDataProvider>,
        news: Arc<dyn NewsGate>,
        executor: OrderExecutor,
    ) -> Self {
        let trend = TrendClassifier::new(config.patterns.trend_lookback);
        let detector = PatternDetector::new(config.pattern_config());
        let sizer = config.sizer_config().build();
        let risk_manager = config.safety.clone().build();

        info!(
            symbol = %config.trading.symbol,
            timeframes = ?config.trading.timeframes,
            allowed = ?config.trading.allowed_patterns,
            mode = %executor.mode(),
            "Pattern strategy initialized"
        );

        PatternStrategy {
            config,
            provider,
            news,
            trend,
            detector,
            sizer,
            risk_manager,
            executor,
            state: StrategyState::Idle,
            iterations: 0,
        }
    }

    pub fn state(&self) -> StrategyState {
        self.state
    }

    pub fn risk_manager(&self) -> &RiskManager {
        &self.risk_manager
    }

    pub fn risk_manager_mut(&mut self) -> &mut RiskManager {
        &mut self.risk_manager
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Poll until `stop` fires. The state ends as `Stopped`, which is terminal.
    pub async fn run(&mut self, stop: StopHandle) -> Result<(), StrategyError> {
        if self.state == StrategyState::Stopped {
            return Err(StrategyError::AlreadyStopped);
        }

        self.state = StrategyState::Running;
        let poll = Duration::from_secs(self.config.trading.poll_interval_seconds);
        info!(poll_secs = poll.as_secs(), "Strategy running");

        while !stop.is_stopped() {
            self.run_iteration().await;

            if stop.is_stopped() {
                break;
            }

            tokio::select! {
                _ = sleep(poll) => {}
                _ = stop.wait() => {
                    info!("Stop signal received");
                }
            }
        }

        self.state = StrategyState::Stopped;
        info!(iterations = self.iterations, "Strategy stopped");
        Ok(())
    }

    /// One pass over every configured timeframe. Returns the number of orders placed.
    pub async fn run_iteration(&mut self) -> usize {
        self.iterations += 1;
        debug!(iteration = self.iterations, "Iteration started");

        let mut placed = 0;
        for timeframe in self.config.trading.timeframes.clone() {
            match self.process_timeframe(&timeframe).await {
                Ok(count) => placed += count,
                Err(e) => warn!(timeframe = %timeframe, error = %e, "Skipping timeframe"),
            }
        }

        let stats = self.risk_manager.statistics();
        info!(
            iteration = self.iterations,
            placed,
            open_trades = stats.open_trades,
            daily_trades = stats.daily_trades,
            daily_pnl = %stats.daily_pnl,
            closed_trades = stats.total_trades,
            win_rate = stats.win_rate,
            total_pnl = %stats.total_pnl,
            "Iteration complete"
        );

        let retention = self.risk_manager.config().stats_retention_days;
        self.risk_manager.cleanup_old_stats(retention);

        placed
    }

    async fn fetch_candles(&self, timeframe: &str) -> Result<Vec<Candle>, FeedError> {
        let t = &self.config.trading;
        self.provider
            .fetch_candles(&t.symbol, timeframe, t.candle_limit)
            .await
    }

    /// Analyse one timeframe without consulting the news gate or trading
    pub async fn scan_timeframe(&self, timeframe: &str) -> Result<TimeframeScan, FeedError> {
        let candles = self.fetch_candles(timeframe).await?;
        let patterns = self
            .detector
            .detect(&candles)
            .into_iter()
            .map(|pattern| {
                let retest_confirmed = self.detector.confirm_retest(&pattern, &candles);
                ScannedPattern {
                    pattern,
                    retest_confirmed,
                }
            })
            .collect();

        Ok(TimeframeScan {
            timeframe: timeframe.to_string(),
            bars: candles.len(),
            trend: self.trend.classify(&candles),
            trend_strength: self.trend.strength(&candles),
            patterns,
        })
    }

    /// Steps 1-5 for one timeframe. Returns the number of orders placed.
    pub async fn process_timeframe(&mut self, timeframe: &str) -> Result<usize, FeedError> {
        let candles = self.fetch_candles(timeframe).await?;
        if candles.is_empty() {
            debug!(timeframe, "No candles");
            return Ok(0);
        }

        let window = self.config.trading.news_block_minutes;
        let news_blackout = self.news.has_high_impact_event_within(window).await;
        if news_blackout {
            info!(timeframe, window_minutes = window, "News blackout, skipping timeframe");
            return Ok(0);
        }

        let trend = self.trend.classify(&candles);
        let strength = self.trend.strength(&candles);
        let patterns = self.detector.detect(&candles);

        info!(
            timeframe,
            bars = candles.len(),
            %trend,
            strength,
            patterns = patterns.len(),
            "Analysis complete"
        );

        if patterns.is_empty() {
            return Ok(0);
        }

        let mut placed = 0;
        for pattern in &patterns {
            if self.consider_pattern(timeframe, pattern, &candles, news_blackout).await {
                placed += 1;
            }
        }
        Ok(placed)
    }

    async fn consider_pattern(
        &mut self,
        timeframe: &str,
        pattern: &Pattern,
        candles: &[Candle],
        news_blackout: bool,
    ) -> bool {
        let kind = pattern.kind();
        if !self.config.trading.allowed_patterns.contains(&kind) {
            debug!(timeframe, %kind, "Pattern not in allow-list");
            return false;
        }

        if !self.detector.confirm_retest(pattern, candles) {
            debug!(timeframe, %kind, level = pattern.key_level(), "Retest not confirmed");
            return false;
        }

        let side = pattern.side();
        let Some(last) = candles.last() else {
            return false;
        };
        let entry = last.close;

        let quote = &self.config.exchange.quote_currency;
        let balance = match self.provider.fetch_balance().await {
            Ok(balances) => balances.get(quote).copied().unwrap_or(0.0),
            Err(e) => {
                warn!(error = %e, "Failed to fetch balance");
                return false;
            }
        };

        let Some(stop_loss) = self.sizer.calculate_stop_loss(pattern, candles, side) else {
            return false;
        };
        let take_profit = self
            .sizer
            .calculate_take_profit(entry, side, self.config.trading.take_profit_pips);

        let levels = match BracketLevels::new(side, entry, stop_loss, take_profit) {
            Ok(levels) => levels,
            Err(e) => {
                warn!(timeframe, %kind, error = %e, "Rejected bracket levels");
                return false;
            }
        };

        let size = self.sizer.calculate_position_size(balance, entry, stop_loss);
        if !self.sizer.is_size_allowed(size) {
            warn!(timeframe, %kind, size, balance, "Position size outside allowed range");
            return false;
        }

        if let Err(denial) = self.risk_manager.can_open_trade(balance, news_blackout) {
            info!(timeframe, %kind, reason = %denial, "Trade denied by risk manager");
            return false;
        }

        let symbol = self.config.trading.symbol.clone();
        match self.executor.place_order(&symbol, &levels, size).await {
            OrderResult::Placed(order) => {
                info!(
                    timeframe,
                    %kind,
                    order_id = %order.order_id,
                    %side,
                    size,
                    entry,
                    stop_loss,
                    take_profit,
                    "Pattern trade executed"
                );
                let trade = Trade::new(order.order_id, symbol, kind, &levels, order.size, Utc::now());
                self.risk_manager.add_trade(trade)
            }
            OrderResult::Failed { kind: failure, message } => {
                error!(timeframe, %kind, ?failure, %message, "Order failed");
                false
            }
        }
    }
}
