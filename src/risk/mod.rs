//! Risk management: the pre-trade gate and the trade ledger
//!
//! The [`RiskManager`] owns every [`Trade`] the engine opens. A trade lives in
//! exactly one of two collections, open or closed, and moves between them only
//! through [`RiskManager::close_trade`]. Per-day aggregates (trade count and
//! realized PnL) feed the daily limits of [`RiskManager::can_open_trade`].
//!
//! Limits checked by the gate, in order:
//! 1. concurrent open trades
//! 2. trades opened today
//! 3. today's realized loss versus a fraction of the balance
//! 4. a high-impact news window

pub mod sizing;

pub use sizing::{is_size_allowed, BracketLevels, PositionSizer, PositionSizerConfig, SizingError};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

use crate::analysis::PatternKind;
use crate::types::{Money, Side, Symbol};

// =============================================================================
// Trade Ledger Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed(CloseReason),
}

/// One executed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub pattern: PatternKind,
    pub opened_at: DateTime<Utc>,
    pub status: TradeStatus,
    pub exit_price: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub pnl: Option<Money>,
}

impl Trade {
    pub fn new(
        order_id: impl Into<String>,
        symbol: Symbol,
        pattern: PatternKind,
        levels: &BracketLevels,
        size: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Trade {
            order_id: order_id.into(),
            symbol,
            side: levels.side(),
            size,
            entry_price: levels.entry(),
            stop_loss: levels.stop_loss(),
            take_profit: levels.take_profit(),
            pattern,
            opened_at,
            status: TradeStatus::Open,
            exit_price: None,
            closed_at: None,
            pnl: None,
        }
    }

    /// Signed PnL of closing this trade at `exit_price`
    pub fn pnl_at(&self, exit_price: f64) -> f64 {
        match self.side {
            Side::Long => (exit_price - self.entry_price) * self.size,
            Side::Short => (self.entry_price - exit_price) * self.size,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }
}

/// Aggregate for one calendar day (UTC)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStat {
    pub trade_count: usize,
    pub realized_pnl: Money,
}

/// Why the gate refused a new trade
#[derive(Debug, Clone, PartialEq)]
pub enum TradeDenial {
    MaxConcurrentTrades { open: usize, max: usize },
    MaxDailyTrades { count: usize, max: usize },
    DailyLossLimit { pnl: Money, limit: Money },
    NewsBlackout,
}

impl fmt::Display for TradeDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDenial::MaxConcurrentTrades { open, max } => {
                write!(f, "Max concurrent trades reached ({}/{})", open, max)
            }
            TradeDenial::MaxDailyTrades { count, max } => {
                write!(f, "Max daily trades reached ({}/{})", count, max)
            }
            TradeDenial::DailyLossLimit { pnl, limit } => {
                write!(f, "Daily loss limit reached (pnl {} < -{})", pnl, limit)
            }
            TradeDenial::NewsBlackout => write!(f, "High-impact news event nearby"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStatistics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percentage of closed trades with positive PnL
    pub win_rate: f64,
    pub total_pnl: Money,
    pub avg_win: Money,
    pub avg_loss: Money,
    pub largest_win: Money,
    pub largest_loss: Money,
    pub open_trades: usize,
    pub daily_pnl: Money,
    pub daily_trades: usize,
}

// =============================================================================
// Risk Manager
// =============================================================================

/// Configuration for RiskManager using builder pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskManagerConfig {
    pub max_concurrent_trades: usize,
    /// Fraction of balance that may be lost in one day
    pub daily_loss_limit_pct: f64,
    pub max_trades_per_day: usize,
    /// Days of daily statistics kept by [`RiskManager::cleanup_old_stats`]
    pub stats_retention_days: i64,
}

impl Default for RiskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_trades: 3,
            daily_loss_limit_pct: 0.10,
            max_trades_per_day: 10,
            stats_retention_days: 30,
        }
    }
}

impl RiskManagerConfig {
    pub fn with_max_concurrent_trades(mut self, max: usize) -> Self {
        self.max_concurrent_trades = max;
        self
    }

    pub fn with_daily_loss_limit_pct(mut self, pct: f64) -> Self {
        self.daily_loss_limit_pct = pct;
        self
    }

    pub fn with_max_trades_per_day(mut self, max: usize) -> Self {
        self.max_trades_per_day = max;
        self
    }

    pub fn with_stats_retention_days(mut self, days: i64) -> Self {
        self.stats_retention_days = days;
        self
    }

    pub fn build(self) -> RiskManager {
        RiskManager::from_config(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    config: RiskManagerConfig,
    open_trades: Vec<Trade>,
    closed_trades: Vec<Trade>,
    daily_stats: BTreeMap<NaiveDate, DailyStat>,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl RiskManager {
    pub fn from_config(config: RiskManagerConfig) -> Self {
        RiskManager {
            config,
            open_trades: Vec::new(),
            closed_trades: Vec::new(),
            daily_stats: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &RiskManagerConfig {
        &self.config
    }

    /// Pre-trade gate for today. Has no side effects.
    pub fn can_open_trade(&self, balance: f64, news_blackout: bool) -> Result<(), TradeDenial> {
        self.can_open_trade_on(today(), balance, news_blackout)
    }

    pub fn can_open_trade_on(
        &self,
        date: NaiveDate,
        balance: f64,
        news_blackout: bool,
    ) -> Result<(), TradeDenial> {
        let open = self.open_trades.len();
        if open >= self.config.max_concurrent_trades {
            return Err(TradeDenial::MaxConcurrentTrades {
                open,
                max: self.config.max_concurrent_trades,
            });
        }

        let day = self.daily_stats(date);
        if day.trade_count >= self.config.max_trades_per_day {
            return Err(TradeDenial::MaxDailyTrades {
                count: day.trade_count,
                max: self.config.max_trades_per_day,
            });
        }

        let limit = Money::from_f64(balance * self.config.daily_loss_limit_pct);
        if day.realized_pnl < -limit {
            return Err(TradeDenial::DailyLossLimit {
                pnl: day.realized_pnl,
                limit,
            });
        }

        if news_blackout {
            return Err(TradeDenial::NewsBlackout);
        }

        Ok(())
    }

    /// Register a newly opened trade and count it against its opening day.
    ///
    /// Returns `false` (and records nothing) if a trade with the same order id
    /// is already open.
    pub fn add_trade(&mut self, trade: Trade) -> bool {
        if self.open_trades.iter().any(|t| t.order_id == trade.order_id) {
            warn!(order_id = %trade.order_id, "Trade already open, ignoring");
            return false;
        }

        self.daily_stats
            .entry(trade.opened_at.date_naive())
            .or_default()
            .trade_count += 1;

        info!(
            order_id = %trade.order_id,
            side = %trade.side,
            size = trade.size,
            entry = trade.entry_price,
            stop_loss = trade.stop_loss,
            take_profit = trade.take_profit,
            pattern = %trade.pattern,
            "Trade opened"
        );

        self.open_trades.push(trade);
        true
    }

    /// Close an open trade now. See [`RiskManager::close_trade_at`].
    pub fn close_trade(&mut self, order_id: &str, exit_price: f64, reason: CloseReason) -> Option<Money> {
        self.close_trade_at(order_id, exit_price, reason, Utc::now())
    }

    /// Close an open trade, book its PnL on the closing day and move it to the
    /// closed set. Unknown or already-closed ids are a logged no-op.
    pub fn close_trade_at(
        &mut self,
        order_id: &str,
        exit_price: f64,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Option<Money> {
        let Some(pos) = self.open_trades.iter().position(|t| t.order_id == order_id) else {
            warn!(order_id, "Trade not found in open trades");
            return None;
        };

        let mut trade = self.open_trades.remove(pos);
        let pnl = Money::from_f64(trade.pnl_at(exit_price));

        trade.status = TradeStatus::Closed(reason);
        trade.exit_price = Some(exit_price);
        trade.closed_at = Some(closed_at);
        trade.pnl = Some(pnl);

        self.daily_stats
            .entry(closed_at.date_naive())
            .or_default()
            .realized_pnl += pnl;

        info!(
            order_id,
            ?reason,
            exit = exit_price,
            pnl = %pnl.round_dp(2),
            "Trade closed"
        );

        self.closed_trades.push(trade);
        Some(pnl)
    }

    pub fn open_trades(&self) -> &[Trade] {
        &self.open_trades
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed_trades
    }

    pub fn open_trade_count(&self) -> usize {
        self.open_trades.len()
    }

    pub fn daily_stats(&self, date: NaiveDate) -> DailyStat {
        self.daily_stats.get(&date).copied().unwrap_or_default()
    }

    /// Number of days with recorded statistics
    pub fn tracked_days(&self) -> usize {
        self.daily_stats.len()
    }

    pub fn cleanup_old_stats(&mut self, days_to_keep: i64) {
        self.cleanup_old_stats_at(days_to_keep, today());
    }

    /// Drop day entries older than `days_to_keep` days before `today`
    pub fn cleanup_old_stats_at(&mut self, days_to_keep: i64, today: NaiveDate) {
        let cutoff = today - Duration::days(days_to_keep);
        let kept = self.daily_stats.split_off(&cutoff);
        let removed = self.daily_stats.len();
        self.daily_stats = kept;

        if removed > 0 {
            info!(removed, "Cleaned up old daily statistics");
        }
    }

    pub fn statistics(&self) -> TradeStatistics {
        self.statistics_on(today())
    }

    pub fn statistics_on(&self, date: NaiveDate) -> TradeStatistics {
        let today = self.daily_stats(date);
        let mut stats = TradeStatistics {
            open_trades: self.open_trades.len(),
            daily_pnl: today.realized_pnl,
            daily_trades: today.trade_count,
            ..Default::default()
        };

        let pnls: Vec<Money> = self.closed_trades.iter().filter_map(|t| t.pnl).collect();
        if pnls.is_empty() {
            return stats;
        }

        let (wins, losses): (Vec<Money>, Vec<Money>) = pnls.iter().partition(|p| p.is_positive());
        let average = |values: &[Money]| -> Money {
            if values.is_empty() {
                Money::ZERO
            } else {
                Money::from_f64(values.iter().copied().sum::<Money>().to_f64() / values.len() as f64)
            }
        };

        stats.total_trades = pnls.len();
        stats.winning_trades = wins.len();
        stats.losing_trades = losses.len();
        stats.win_rate = wins.len() as f64 / pnls.len() as f64 * 100.0;
        stats.total_pnl = pnls.iter().copied().sum();
        stats.avg_win = average(&wins);
        stats.avg_loss = average(&losses);
        stats.largest_win = wins.iter().copied().max().unwrap_or(Money::ZERO);
        stats.largest_loss = losses.iter().copied().min().unwrap_or(Money::ZERO);
        stats
    }
}
