//! Stop, target and position size for a pattern entry
//!
//! Position sizing formula:
//! ```text
//! position_size = (balance * risk_pct) / |entry_price - stop_price|
//! ```
//!
//! The formula is currency-agnostic: it risks the same fraction of the
//! balance whatever the quote currency, as long as balance and prices share it.
//! A size of `0.0` always means "do not trade".

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::analysis::{Formation, Pattern};
use crate::indicators::atr;
use crate::types::{hlc_columns, Candle, Side};

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("entry price must be positive, got {0}")]
    NonPositiveEntry(f64),

    #[error("stop-loss {stop} is on the wrong side of entry {entry} for a {side} trade")]
    StopOnWrongSide { side: Side, entry: f64, stop: f64 },

    #[error("take-profit {target} is on the wrong side of entry {entry} for a {side} trade")]
    TargetOnWrongSide { side: Side, entry: f64, target: f64 },
}

/// Entry with its protective stop and profit target, validated so that both
/// exits sit on the correct side of the entry for the trade direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BracketLevels {
    side: Side,
    entry: f64,
    stop_loss: f64,
    take_profit: f64,
}

impl BracketLevels {
    pub fn new(side: Side, entry: f64, stop_loss: f64, take_profit: f64) -> Result<Self, SizingError> {
        if !(entry > 0.0) {
            return Err(SizingError::NonPositiveEntry(entry));
        }

        let (stop_ok, target_ok) = match side {
            Side::Long => (stop_loss < entry, take_profit > entry),
            Side::Short => (stop_loss > entry, take_profit < entry),
        };
        if !stop_ok {
            return Err(SizingError::StopOnWrongSide {
                side,
                entry,
                stop: stop_loss,
            });
        }
        if !target_ok {
            return Err(SizingError::TargetOnWrongSide {
                side,
                entry,
                target: take_profit,
            });
        }

        Ok(BracketLevels {
            side,
            entry,
            stop_loss,
            take_profit,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn entry(&self) -> f64 {
        self.entry
    }

    pub fn stop_loss(&self) -> f64 {
        self.stop_loss
    }

    pub fn take_profit(&self) -> f64 {
        self.take_profit
    }

    /// Quote-currency loss per unit if the stop is hit
    pub fn risk_per_unit(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }
}

/// Sizing parameters, built in the same chained style as the other configs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizerConfig {
    /// Fraction of balance risked per trade
    pub risk_pct: f64,
    /// Quote-currency value of one pip
    pub pip_value: f64,
    /// Price units added beyond the structural level for the stop
    pub stop_padding: f64,
    pub atr_period: usize,
    pub atr_multiplier: f64,
    pub min_size: f64,
    pub max_size: f64,
}

impl Default for PositionSizerConfig {
    fn default() -> Self {
        Self {
            risk_pct: 0.02,
            pip_value: 1.0,
            stop_padding: 10.0,
            atr_period: 14,
            atr_multiplier: 2.0,
            min_size: 0.0001,
            max_size: 100.0,
        }
    }
}

impl PositionSizerConfig {
    pub fn with_risk_pct(mut self, risk_pct: f64) -> Self {
        self.risk_pct = risk_pct;
        self
    }

    pub fn with_pip_value(mut self, pip_value: f64) -> Self {
        self.pip_value = pip_value;
        self
    }

    pub fn with_stop_padding(mut self, padding: f64) -> Self {
        self.stop_padding = padding;
        self
    }

    pub fn with_atr(mut self, period: usize, multiplier: f64) -> Self {
        self.atr_period = period;
        self.atr_multiplier = multiplier;
        self
    }

    pub fn with_size_limits(mut self, min: f64, max: f64) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    pub fn build(self) -> PositionSizer {
        PositionSizer { config: self }
    }
}

/// Whether `size` is a tradable quantity within `[min, max]`. Zero never is.
pub fn is_size_allowed(size: f64, min: f64, max: f64) -> bool {
    size > 0.0 && size >= min && size <= max
}

#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: PositionSizerConfig,
}

impl PositionSizer {
    pub fn new(config: PositionSizerConfig) -> Self {
        PositionSizer { config }
    }

    pub fn config(&self) -> &PositionSizerConfig {
        &self.config
    }

    /// Stop-loss for a trade on `pattern`.
    ///
    /// Uses the formation's own invalidation level when the pattern and side
    /// agree (beyond the right shoulder, beyond the higher peak, beyond the far
    /// side of the rectangle), padded by `stop_padding`. Any other combination
    /// falls back to `last close ± ATR × multiplier`.
    ///
    /// Returns `None` only for an empty candle history.
    pub fn calculate_stop_loss(&self, pattern: &Pattern, candles: &[Candle], side: Side) -> Option<f64> {
        let pad = self.config.stop_padding;

        let structural = match (&pattern.formation, side) {
            (Formation::HeadAndShouldersTop(hs), Side::Short) => Some(hs.right_shoulder + pad),
            (Formation::HeadAndShouldersBottom(hs), Side::Long) => Some(hs.right_shoulder - pad),
            (Formation::DoubleTop(peaks), Side::Short) => Some(peaks.highest() + pad),
            (Formation::RectangleBreakoutUp(rect), Side::Long) => Some(rect.bottom - pad),
            (Formation::RectangleBreakoutDown(rect), Side::Short) => Some(rect.top + pad),
            _ => None,
        };

        if let Some(stop) = structural {
            debug!(pattern = %pattern.kind(), %side, stop, "Structural stop-loss");
            return Some(stop);
        }

        let entry = candles.last()?.close;
        let distance = self.calculate_atr(candles) * self.config.atr_multiplier;
        let stop = entry - side.sign() * distance;
        debug!(pattern = %pattern.kind(), %side, stop, distance, "ATR stop-loss");
        Some(stop)
    }

    /// `entry ± pips × pip_value` in the trade direction
    pub fn calculate_take_profit(&self, entry: f64, side: Side, pips: f64) -> f64 {
        entry + side.sign() * pips * self.config.pip_value
    }

    /// Size risking `risk_pct` of `balance` between entry and stop; `0.0` on invalid inputs
    pub fn calculate_position_size(&self, balance: f64, entry: f64, stop: f64) -> f64 {
        if balance <= 0.0 {
            error!(balance, "Invalid balance for position sizing");
            return 0.0;
        }
        if entry <= 0.0 || stop <= 0.0 {
            error!(entry, stop, "Invalid prices for position sizing");
            return 0.0;
        }

        let distance = (entry - stop).abs();
        if distance == 0.0 {
            error!(entry, stop, "Stop distance is zero");
            return 0.0;
        }

        let risk_amount = balance * self.config.risk_pct;
        let size = risk_amount / distance;

        debug!(
            balance,
            risk_amount,
            distance,
            size,
            "Position size calculated"
        );
        size
    }

    pub fn is_size_allowed(&self, size: f64) -> bool {
        is_size_allowed(size, self.config.min_size, self.config.max_size)
    }

    /// Latest ATR value; `0.0` when there is not enough history
    pub fn calculate_atr(&self, candles: &[Candle]) -> f64 {
        let (high, low, close) = hlc_columns(candles);
        atr(&high, &low, &close, self.config.atr_period)
            .last()
            .copied()
            .flatten()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{DoublePeak, HeadAndShoulders, Rectangle};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn pattern(formation: Formation) -> Pattern {
        Pattern {
            formation,
            formation_index: 0,
            neckline: 100.0,
            confidence: 0.8,
            detected_at: Utc::now(),
        }
    }

    fn candles(n: usize, range: f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                Candle::new_unchecked(
                    start + Duration::hours(i as i64),
                    100.0,
                    100.0 + range / 2.0,
                    100.0 - range / 2.0,
                    100.0,
                    1.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_position_size_formula() {
        let sizer = PositionSizerConfig::default().with_risk_pct(0.02).build();
        assert_relative_eq!(sizer.calculate_position_size(10_000.0, 100.0, 95.0), 40.0);
        // symmetric for shorts
        assert_relative_eq!(sizer.calculate_position_size(10_000.0, 95.0, 100.0), 40.0);
    }

    #[test]
    fn test_position_size_guards() {
        let sizer = PositionSizer::default();
        assert_eq!(sizer.calculate_position_size(10_000.0, 100.0, 100.0), 0.0);
        assert_eq!(sizer.calculate_position_size(0.0, 100.0, 95.0), 0.0);
        assert_eq!(sizer.calculate_position_size(-5.0, 100.0, 95.0), 0.0);
        assert_eq!(sizer.calculate_position_size(10_000.0, 0.0, 95.0), 0.0);
        assert_eq!(sizer.calculate_position_size(10_000.0, 100.0, -1.0), 0.0);
        assert!(!sizer.is_size_allowed(0.0));
    }

    #[test]
    fn test_size_limits() {
        assert!(is_size_allowed(0.0001, 0.0001, 100.0));
        assert!(is_size_allowed(100.0, 0.0001, 100.0));
        assert!(!is_size_allowed(100.5, 0.0001, 100.0));
        assert!(!is_size_allowed(0.00001, 0.0001, 100.0));
        assert!(!is_size_allowed(0.0, 0.0, 100.0));
    }

    #[test]
    fn test_take_profit() {
        let sizer = PositionSizerConfig::default().with_pip_value(0.5).build();
        assert_relative_eq!(sizer.calculate_take_profit(100.0, Side::Long, 20.0), 110.0);
        assert_relative_eq!(sizer.calculate_take_profit(100.0, Side::Short, 20.0), 90.0);
    }

    #[test]
    fn test_structural_stops() {
        let sizer = PositionSizerConfig::default().with_stop_padding(2.0).build();
        let bars = candles(30, 4.0);
        let hs = HeadAndShoulders {
            left_shoulder: 110.0,
            head: 120.0,
            right_shoulder: 111.0,
        };

        let stop = sizer.calculate_stop_loss(&pattern(Formation::HeadAndShouldersTop(hs)), &bars, Side::Short);
        assert_relative_eq!(stop.unwrap(), 113.0);

        let inverse = HeadAndShoulders {
            left_shoulder: 90.0,
            head: 80.0,
            right_shoulder: 91.0,
        };
        let stop = sizer.calculate_stop_loss(&pattern(Formation::HeadAndShouldersBottom(inverse)), &bars, Side::Long);
        assert_relative_eq!(stop.unwrap(), 89.0);

        let peaks = DoublePeak {
            first_peak: 120.0,
            second_peak: 121.0,
        };
        let stop = sizer.calculate_stop_loss(&pattern(Formation::DoubleTop(peaks)), &bars, Side::Short);
        assert_relative_eq!(stop.unwrap(), 123.0);

        let rect = Rectangle {
            top: 100.0,
            bottom: 96.0,
        };
        let stop = sizer.calculate_stop_loss(&pattern(Formation::RectangleBreakoutUp(rect)), &bars, Side::Long);
        assert_relative_eq!(stop.unwrap(), 94.0);
        let stop = sizer.calculate_stop_loss(&pattern(Formation::RectangleBreakoutDown(rect)), &bars, Side::Short);
        assert_relative_eq!(stop.unwrap(), 102.0);
    }

    #[test]
    fn test_atr_fallback_stop() {
        let sizer = PositionSizerConfig::default().with_atr(14, 2.0).build();
        let bars = candles(30, 4.0);
        let rect = Rectangle {
            top: 100.0,
            bottom: 96.0,
        };
        assert_relative_eq!(sizer.calculate_atr(&bars), 4.0);

        // a long against a breakdown has no structural rule
        let stop = sizer.calculate_stop_loss(&pattern(Formation::RectangleBreakoutDown(rect)), &bars, Side::Long);
        assert_relative_eq!(stop.unwrap(), 92.0);
        let stop = sizer.calculate_stop_loss(&pattern(Formation::RectangleBreakoutUp(rect)), &bars, Side::Short);
        assert_relative_eq!(stop.unwrap(), 108.0);
    }

    #[test]
    fn test_atr_without_history_is_zero() {
        let sizer = PositionSizer::default();
        assert_eq!(sizer.calculate_atr(&candles(5, 4.0)), 0.0);
        let rect = Rectangle {
            top: 100.0,
            bottom: 96.0,
        };
        let p = pattern(Formation::RectangleBreakoutDown(rect));
        assert_eq!(sizer.calculate_stop_loss(&p, &[], Side::Long), None);
    }

    #[test]
    fn test_bracket_levels_side_checks() {
        assert!(BracketLevels::new(Side::Long, 100.0, 95.0, 110.0).is_ok());
        assert!(BracketLevels::new(Side::Short, 100.0, 105.0, 90.0).is_ok());

        assert!(matches!(
            BracketLevels::new(Side::Long, 100.0, 101.0, 110.0),
            Err(SizingError::StopOnWrongSide { .. })
        ));
        assert!(matches!(
            BracketLevels::new(Side::Short, 100.0, 105.0, 100.0),
            Err(SizingError::TargetOnWrongSide { .. })
        ));
        assert_eq!(
            BracketLevels::new(Side::Long, 0.0, -1.0, 1.0),
            Err(SizingError::NonPositiveEntry(0.0))
        );

        let levels = BracketLevels::new(Side::Long, 100.0, 95.0, 110.0).unwrap();
        assert_relative_eq!(levels.risk_per_unit(), 5.0);
    }
}
