//! Configuration management
//!
//! Loads the JSON configuration file once at startup. There is no hot reload.
//! `TRADE_MODE` in the environment (or a `.env` file) overrides
//! `trading.execution_mode`, so a config checked in as `simulate` can only be
//! switched to live deliberately.

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::{PatternConfig, PatternKind};
use crate::execution::{ExecutionMode, OrderType};
use crate::risk::{PositionSizerConfig, RiskManagerConfig};
use crate::Symbol;

pub const TRADE_MODE_ENV: &str = "TRADE_MODE";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub patterns: AnalysisConfig,
    #[serde(default)]
    pub safety: RiskManagerConfig,
    #[serde(default)]
    pub news: NewsConfig,
}

impl Config {
    /// Load, apply environment overrides, and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_json(&contents)?;

        config.apply_trade_mode_override(std::env::var(TRADE_MODE_ENV).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse config JSON")
    }

    pub fn apply_trade_mode_override(&mut self, value: Option<String>) -> Result<()> {
        if let Some(raw) = value {
            let mode: ExecutionMode = raw
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid {} value", TRADE_MODE_ENV))?;
            self.trading.execution_mode = mode;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;

        ensure!(!t.symbol.as_str().trim().is_empty(), "trading.symbol must not be empty");
        ensure!(!t.timeframes.is_empty(), "trading.timeframes must list at least one timeframe");
        ensure!(
            !t.allowed_patterns.is_empty(),
            "trading.allowed_patterns must list at least one pattern"
        );
        ensure!(
            t.risk_pct > 0.0 && t.risk_pct <= 1.0,
            "trading.risk_pct must be in (0, 1], got {}",
            t.risk_pct
        );
        ensure!(
            t.take_profit_pips > 0.0,
            "trading.take_profit_pips must be positive, got {}",
            t.take_profit_pips
        );
        ensure!(t.poll_interval_seconds > 0, "trading.poll_interval_seconds must be positive");
        ensure!(t.pips_unit > 0.0, "trading.pips_unit must be positive");
        ensure!(t.candle_limit > 0, "trading.candle_limit must be positive");
        if t.min_position_size > t.max_position_size {
            bail!(
                "trading.min_position_size ({}) exceeds max_position_size ({})",
                t.min_position_size,
                t.max_position_size
            );
        }

        ensure!(self.patterns.min_pattern_bars > 0, "patterns.min_pattern_bars must be positive");
        ensure!(
            self.patterns.symmetry_tolerance >= 0.0,
            "patterns.symmetry_tolerance must not be negative"
        );
        ensure!(
            self.safety.daily_loss_limit_pct > 0.0,
            "safety.daily_loss_limit_pct must be positive"
        );

        Ok(())
    }

    pub fn sizer_config(&self) -> PositionSizerConfig {
        let t = &self.trading;
        PositionSizerConfig::default()
            .with_risk_pct(t.risk_pct)
            .with_pip_value(t.pips_unit)
            .with_stop_padding(t.stoploss_padding)
            .with_atr(t.atr_period, t.atr_multiplier)
            .with_size_limits(t.min_position_size, t.max_position_size)
    }

    pub fn pattern_config(&self) -> PatternConfig {
        PatternConfig {
            min_pattern_bars: self.patterns.min_pattern_bars,
            max_pattern_bars: self.patterns.max_pattern_bars,
            symmetry_tolerance: self.patterns.symmetry_tolerance,
        }
    }
}

/// Venue and account settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub name: String,
    /// Currency whose total balance is risked
    pub quote_currency: String,
    /// Starting balance of the paper account
    pub paper_balance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            name: "binance".to_string(),
            quote_currency: "USDT".to_string(),
            paper_balance: 10_000.0,
            base_url: None,
        }
    }
}

fn default_pips_unit() -> f64 {
    1.0
}

fn default_stoploss_padding() -> f64 {
    10.0
}

fn default_atr_period() -> usize {
    14
}

fn default_atr_multiplier() -> f64 {
    2.0
}

fn default_news_block_minutes() -> i64 {
    30
}

fn default_candle_limit() -> usize {
    500
}

fn default_min_position_size() -> f64 {
    0.0001
}

fn default_max_position_size() -> f64 {
    100.0
}

/// Trading configuration
///
/// Prices, padding and pip value are all in the quote currency of `symbol`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbol: Symbol,
    /// Exchange interval names, e.g. `["1h", "4h"]`, processed in order
    pub timeframes: Vec<String>,
    pub allowed_patterns: Vec<PatternKind>,
    /// Fraction of balance risked per trade
    pub risk_pct: f64,
    pub take_profit_pips: f64,
    pub poll_interval_seconds: u64,

    #[serde(default = "default_pips_unit")]
    pub pips_unit: f64,
    #[serde(default = "default_stoploss_padding")]
    pub stoploss_padding: f64,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
    #[serde(default = "default_news_block_minutes")]
    pub news_block_minutes: i64,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_min_position_size")]
    pub min_position_size: f64,
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
}

/// Pattern detector and trend classifier tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub min_pattern_bars: usize,
    pub max_pattern_bars: usize,
    pub symmetry_tolerance: f64,
    pub trend_lookback: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let detector = PatternConfig::default();
        AnalysisConfig {
            min_pattern_bars: detector.min_pattern_bars,
            max_pattern_bars: detector.max_pattern_bars,
            symmetry_tolerance: detector.symmetry_tolerance,
            trend_lookback: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    /// JSON economic calendar; without one the news gate never blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_path: Option<PathBuf>,
    pub currency: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        NewsConfig {
            calendar_path: None,
            currency: "USD".to_string(),
        }
    }
}
