//! Trend classification by majority vote of three independent detectors
//!
//! - Swing structure: higher highs and higher lows (or the reverse)
//! - Moving-average alignment: close / EMA(20) / EMA(50) ordering or a recent cross
//! - Regression slope: least-squares slope of closes, as % of mean price per bar
//!
//! Two agreeing votes decide the trend; anything else is sideways.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::indicators::{ema, linreg_slope, simple_adx, swing_highs, swing_lows};
use crate::types::{hlc_columns, Candle};

const FAST_EMA_SPAN: usize = 20;
const SLOW_EMA_SPAN: usize = 50;
/// A cross counts if it happened within this many bars
const CROSSOVER_BARS: usize = 5;
/// Swings compared by the structure detector
const SWINGS_COMPARED: usize = 3;
/// Percent-per-bar slope that separates a trend from noise
const SLOPE_THRESHOLD_PCT: f64 = 0.05;

const STRENGTH_MIN_BARS: usize = 20;
const STRENGTH_WINDOW: usize = 50;
const ADX_PERIOD: usize = 14;
const ADX_SCALE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Sideways => write!(f, "sideways"),
        }
    }
}

/// Combine detector votes: a direction wins with at least two votes
pub fn majority_vote(votes: &[Trend]) -> Trend {
    let bullish = votes.iter().filter(|v| **v == Trend::Bullish).count();
    let bearish = votes.iter().filter(|v| **v == Trend::Bearish).count();

    if bullish >= 2 {
        Trend::Bullish
    } else if bearish >= 2 {
        Trend::Bearish
    } else {
        Trend::Sideways
    }
}

#[derive(Debug, Clone)]
pub struct TrendClassifier {
    lookback: usize,
    swing_radius: usize,
}

impl Default for TrendClassifier {
    fn default() -> Self {
        Self::new(50)
    }
}

impl TrendClassifier {
    pub fn new(lookback: usize) -> Self {
        TrendClassifier {
            lookback,
            swing_radius: 5,
        }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Classify the most recent `lookback` bars.
    ///
    /// Short histories are not an error: they classify as sideways.
    pub fn classify(&self, candles: &[Candle]) -> Trend {
        if candles.len() < self.lookback || self.lookback == 0 {
            warn!(
                bars = candles.len(),
                required = self.lookback,
                "Insufficient data for trend detection"
            );
            return Trend::Sideways;
        }

        let window = &candles[candles.len() - self.lookback..];
        let votes = [
            self.swing_structure(window),
            self.moving_average_alignment(window),
            self.regression_slope(window),
        ];
        let trend = majority_vote(&votes);

        debug!(
            swing = %votes[0],
            ma = %votes[1],
            slope = %votes[2],
            result = %trend,
            "Trend votes"
        );

        trend
    }

    /// Higher highs and higher lows over the last three swings
    pub fn swing_structure(&self, candles: &[Candle]) -> Trend {
        let (high, low, _) = hlc_columns(candles);

        let recent = |values: &[f64], idx: Vec<usize>| -> Vec<f64> {
            let skip = idx.len().saturating_sub(SWINGS_COMPARED);
            idx[skip..].iter().map(|&i| values[i]).collect()
        };
        let highs = recent(&high, swing_highs(&high, self.swing_radius));
        let lows = recent(&low, swing_lows(&low, self.swing_radius));

        if highs.len() < 2 || lows.len() < 2 {
            return Trend::Sideways;
        }

        let rising = |v: &[f64]| v.windows(2).all(|w| w[1] > w[0]);
        let falling = |v: &[f64]| v.windows(2).all(|w| w[1] < w[0]);

        if rising(&highs) && rising(&lows) {
            Trend::Bullish
        } else if falling(&highs) && falling(&lows) {
            Trend::Bearish
        } else {
            Trend::Sideways
        }
    }

    /// `close > ema20 > ema50` or a fresh golden cross is bullish; the mirror is bearish
    pub fn moving_average_alignment(&self, candles: &[Candle]) -> Trend {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast = ema(&closes, FAST_EMA_SPAN);
        let slow = ema(&closes, SLOW_EMA_SPAN);

        let n = closes.len();
        if n == 0 || fast.len() != n || slow.len() != n {
            return Trend::Sideways;
        }

        let last = n - 1;
        let prev = n.saturating_sub(CROSSOVER_BARS);
        let close = closes[last];

        let bullish_cross = fast[prev] <= slow[prev] && fast[last] > slow[last];
        let bearish_cross = fast[prev] >= slow[prev] && fast[last] < slow[last];

        if (close > fast[last] && fast[last] > slow[last]) || bullish_cross {
            Trend::Bullish
        } else if (close < fast[last] && fast[last] < slow[last]) || bearish_cross {
            Trend::Bearish
        } else {
            Trend::Sideways
        }
    }

    pub fn regression_slope(&self, candles: &[Candle]) -> Trend {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let Some(slope) = linreg_slope(&closes) else {
            return Trend::Sideways;
        };

        let mean = closes.iter().sum::<f64>() / closes.len() as f64;
        if mean == 0.0 {
            return Trend::Sideways;
        }

        let pct_per_bar = slope / mean * 100.0;
        if pct_per_bar > SLOPE_THRESHOLD_PCT {
            Trend::Bullish
        } else if pct_per_bar < -SLOPE_THRESHOLD_PCT {
            Trend::Bearish
        } else {
            Trend::Sideways
        }
    }

    /// Trend strength in [0, 1]: simplified ADX over the last 50 bars, divided by 50.
    pub fn strength(&self, candles: &[Candle]) -> f64 {
        if candles.len() < STRENGTH_MIN_BARS {
            return 0.0;
        }

        let window = &candles[candles.len().saturating_sub(STRENGTH_WINDOW)..];
        let (high, low, close) = hlc_columns(window);

        simple_adx(&high, &low, &close, ADX_PERIOD)
            .last()
            .copied()
            .flatten()
            .map(|adx| (adx / ADX_SCALE).clamp(0.0, 1.0))
            .unwrap_or(0.0)
    }
}
