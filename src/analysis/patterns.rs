//! Chart formation scans and retest confirmation
//!
//! Five independent scans run over one candle history:
//! head-and-shoulders top and bottom, double top, and rectangle breakouts in
//! both directions. Each returns zero or more [`Pattern`]s; nothing here fails.
//!
//! A detected pattern is only a candidate. Before it may be traded,
//! [`PatternDetector::confirm_retest`] checks that price came back to the key
//! level and was rejected from it.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::indicators::{swing_highs, swing_lows};
use crate::types::{Candle, Side};

// =============================================================================
// Detection Constants
// =============================================================================

const SWING_RADIUS: usize = 5;
/// Patterns whose last pivot is older than this are ignored
const MAX_PATTERN_AGE_BARS: usize = 20;
/// Minimum trough depth between the two peaks of a double top
const MIN_DOUBLE_TOP_DEPTH: f64 = 0.02;
const MIN_RECTANGLE_RANGE: f64 = 0.02;
const MAX_RECTANGLE_RANGE: f64 = 0.15;
const TOUCH_TOLERANCE: f64 = 0.01;
const MIN_TOUCHES: usize = 2;
const RECTANGLE_CONFIDENCE: f64 = 0.7;

const RETEST_WINDOW: usize = 5;
const RETEST_TOLERANCE: f64 = 0.02;
const RETEST_REJECTION: f64 = 0.02;

// =============================================================================
// Pattern Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    HeadAndShouldersTop,
    HeadAndShouldersBottom,
    DoubleTop,
    RectangleBreakoutUp,
    RectangleBreakoutDown,
}

impl PatternKind {
    pub const ALL: [PatternKind; 5] = [
        PatternKind::HeadAndShouldersTop,
        PatternKind::HeadAndShouldersBottom,
        PatternKind::DoubleTop,
        PatternKind::RectangleBreakoutUp,
        PatternKind::RectangleBreakoutDown,
    ];

    /// Direction traded when this formation confirms
    pub fn trade_side(self) -> Side {
        match self {
            PatternKind::HeadAndShouldersTop => Side::Short,
            PatternKind::HeadAndShouldersBottom => Side::Long,
            PatternKind::DoubleTop => Side::Short,
            PatternKind::RectangleBreakoutUp => Side::Long,
            PatternKind::RectangleBreakoutDown => Side::Short,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::HeadAndShouldersTop => "HeadAndShouldersTop",
            PatternKind::HeadAndShouldersBottom => "HeadAndShouldersBottom",
            PatternKind::DoubleTop => "DoubleTop",
            PatternKind::RectangleBreakoutUp => "RectangleBreakoutUp",
            PatternKind::RectangleBreakoutDown => "RectangleBreakoutDown",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown pattern kind: {}", s))
    }
}

/// Pivot prices of a head-and-shoulders
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadAndShoulders {
    pub left_shoulder: f64,
    pub head: f64,
    pub right_shoulder: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoublePeak {
    pub first_peak: f64,
    pub second_peak: f64,
}

impl DoublePeak {
    pub fn highest(&self) -> f64 {
        self.first_peak.max(self.second_peak)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub top: f64,
    pub bottom: f64,
}

/// A formation together with exactly the geometry it owns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Formation {
    HeadAndShouldersTop(HeadAndShoulders),
    HeadAndShouldersBottom(HeadAndShoulders),
    DoubleTop(DoublePeak),
    RectangleBreakoutUp(Rectangle),
    RectangleBreakoutDown(Rectangle),
}

impl Formation {
    pub fn kind(&self) -> PatternKind {
        match self {
            Formation::HeadAndShouldersTop(_) => PatternKind::HeadAndShouldersTop,
            Formation::HeadAndShouldersBottom(_) => PatternKind::HeadAndShouldersBottom,
            Formation::DoubleTop(_) => PatternKind::DoubleTop,
            Formation::RectangleBreakoutUp(_) => PatternKind::RectangleBreakoutUp,
            Formation::RectangleBreakoutDown(_) => PatternKind::RectangleBreakoutDown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub formation: Formation,
    /// Index into the scanned candle slice of the bar that completed the pattern
    pub formation_index: usize,
    pub neckline: f64,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}

impl Pattern {
    pub fn kind(&self) -> PatternKind {
        self.formation.kind()
    }

    pub fn side(&self) -> Side {
        self.kind().trade_side()
    }

    /// Level a retest must come back to: the right shoulder for
    /// head-and-shoulders, the neckline otherwise
    pub fn key_level(&self) -> f64 {
        match &self.formation {
            Formation::HeadAndShouldersTop(hs) | Formation::HeadAndShouldersBottom(hs) => {
                hs.right_shoulder
            }
            _ => self.neckline,
        }
    }
}

// =============================================================================
// Detector
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Minimum history for any scan, and the rectangle lookback width
    pub min_pattern_bars: usize,
    /// Most recent bars considered by the rectangle scan
    pub max_pattern_bars: usize,
    /// Maximum relative difference between shoulders or peaks
    pub symmetry_tolerance: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        PatternConfig {
            min_pattern_bars: 20,
            max_pattern_bars: 100,
            symmetry_tolerance: 0.15,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: PatternConfig,
}

/// Which extreme a head-and-shoulders is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Top,
    Bottom,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        PatternDetector { config }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Run all five scans. Output is ordered by `formation_index`.
    pub fn detect(&self, candles: &[Candle]) -> Vec<Pattern> {
        if candles.len() < self.config.min_pattern_bars {
            debug!(
                bars = candles.len(),
                required = self.config.min_pattern_bars,
                "Not enough bars for pattern detection"
            );
            return Vec::new();
        }

        let now = Utc::now();
        let mut patterns = Vec::new();
        patterns.extend(self.head_and_shoulders(candles, Polarity::Top, now));
        patterns.extend(self.head_and_shoulders(candles, Polarity::Bottom, now));
        patterns.extend(self.double_tops(candles, now));
        patterns.extend(self.rectangle_breakouts(candles, now));

        // stable: scans keep their relative order on ties
        patterns.sort_by_key(|p| p.formation_index);

        if !patterns.is_empty() {
            debug!(count = patterns.len(), "Patterns detected");
        }
        patterns
    }

    fn head_and_shoulders(
        &self,
        candles: &[Candle],
        polarity: Polarity,
        now: DateTime<Utc>,
    ) -> Vec<Pattern> {
        let n = candles.len();
        let (pivots, opposite): (Vec<f64>, Vec<f64>) = match polarity {
            Polarity::Top => (
                candles.iter().map(|c| c.high).collect(),
                candles.iter().map(|c| c.low).collect(),
            ),
            Polarity::Bottom => (
                candles.iter().map(|c| c.low).collect(),
                candles.iter().map(|c| c.high).collect(),
            ),
        };
        let swings = match polarity {
            Polarity::Top => swing_highs(&pivots, SWING_RADIUS),
            Polarity::Bottom => swing_lows(&pivots, SWING_RADIUS),
        };

        // reaction extreme between two pivots: lowest low for a top, highest high for a bottom
        let reaction = |from: usize, to: usize| -> f64 {
            let slice = &opposite[from..=to];
            match polarity {
                Polarity::Top => slice.iter().copied().fold(f64::INFINITY, f64::min),
                Polarity::Bottom => slice.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            }
        };

        swings
            .iter()
            .copied()
            .tuple_windows()
            .filter_map(|(left_idx, head_idx, right_idx)| {
                let (left, head, right) = (pivots[left_idx], pivots[head_idx], pivots[right_idx]);

                let head_is_extreme = match polarity {
                    Polarity::Top => head > left && head > right,
                    Polarity::Bottom => head < left && head < right,
                };
                if !head_is_extreme {
                    return None;
                }

                let ratio = symmetry_ratio(left, right)?;
                if ratio > self.config.symmetry_tolerance {
                    return None;
                }

                if n - right_idx > MAX_PATTERN_AGE_BARS {
                    return None;
                }

                let neckline = (reaction(left_idx, head_idx) + reaction(head_idx, right_idx)) / 2.0;
                let geometry = HeadAndShoulders {
                    left_shoulder: left,
                    head,
                    right_shoulder: right,
                };
                let formation = match polarity {
                    Polarity::Top => Formation::HeadAndShouldersTop(geometry),
                    Polarity::Bottom => Formation::HeadAndShouldersBottom(geometry),
                };

                Some(Pattern {
                    formation,
                    formation_index: right_idx,
                    neckline,
                    confidence: 1.0 - ratio,
                    detected_at: now,
                })
            })
            .collect()
    }

    fn double_tops(&self, candles: &[Candle], now: DateTime<Utc>) -> Vec<Pattern> {
        let n = candles.len();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();

        swing_highs(&highs, SWING_RADIUS)
            .into_iter()
            .tuple_windows()
            .filter_map(|(first_idx, second_idx)| {
                let (first, second) = (highs[first_idx], highs[second_idx]);

                let ratio = symmetry_ratio(first, second)?;
                if ratio > self.config.symmetry_tolerance {
                    return None;
                }

                let trough = candles[first_idx..=second_idx]
                    .iter()
                    .map(|c| c.low)
                    .fold(f64::INFINITY, f64::min);
                let avg_peak = (first + second) / 2.0;
                if (avg_peak - trough) / avg_peak < MIN_DOUBLE_TOP_DEPTH {
                    return None;
                }

                if n - second_idx > MAX_PATTERN_AGE_BARS {
                    return None;
                }

                Some(Pattern {
                    formation: Formation::DoubleTop(DoublePeak {
                        first_peak: first,
                        second_peak: second,
                    }),
                    formation_index: second_idx,
                    neckline: trough,
                    confidence: 1.0 - ratio,
                    detected_at: now,
                })
            })
            .collect()
    }

    /// Slide a `min_pattern_bars` lookback across the tail of the history and
    /// report every bar whose close breaks the range of the bars before it.
    fn rectangle_breakouts(&self, candles: &[Candle], now: DateTime<Utc>) -> Vec<Pattern> {
        let width = self.config.min_pattern_bars;
        let offset = candles.len().saturating_sub(self.config.max_pattern_bars);
        let recent = &candles[offset..];

        if width == 0 || recent.len() < width {
            return Vec::new();
        }

        let mut patterns = Vec::new();
        for i in (recent.len() - width).max(width)..recent.len() {
            let lookback = &recent[i - width..i];
            let resistance = lookback.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let support = lookback.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);

            let mid = (resistance + support) / 2.0;
            if mid <= 0.0 {
                continue;
            }
            let range_ratio = (resistance - support) / mid;
            if !(MIN_RECTANGLE_RANGE..=MAX_RECTANGLE_RANGE).contains(&range_ratio) {
                continue;
            }

            let resistance_touches = lookback
                .iter()
                .filter(|c| c.high >= resistance * (1.0 - TOUCH_TOLERANCE))
                .count();
            let support_touches = lookback
                .iter()
                .filter(|c| c.low <= support * (1.0 + TOUCH_TOLERANCE))
                .count();
            if resistance_touches < MIN_TOUCHES || support_touches < MIN_TOUCHES {
                continue;
            }

            let rectangle = Rectangle {
                top: resistance,
                bottom: support,
            };
            let close = recent[i].close;
            let breakout = if close > resistance {
                Some((Formation::RectangleBreakoutUp(rectangle), resistance))
            } else if close < support {
                Some((Formation::RectangleBreakoutDown(rectangle), support))
            } else {
                None
            };

            if let Some((formation, neckline)) = breakout {
                patterns.push(Pattern {
                    formation,
                    formation_index: offset + i,
                    neckline,
                    confidence: RECTANGLE_CONFIDENCE,
                    detected_at: now,
                });
            }
        }

        patterns
    }

    /// True when price revisited the pattern's key level within the last five
    /// bars and the latest close has since moved at least 2% away from it in
    /// the trade direction.
    pub fn confirm_retest(&self, pattern: &Pattern, candles: &[Candle]) -> bool {
        if candles.len() < RETEST_WINDOW {
            return false;
        }

        let level = pattern.key_level();
        let tolerance = level * RETEST_TOLERANCE;
        let recent = &candles[candles.len() - RETEST_WINDOW..];
        let current = candles[candles.len() - 1].close;

        // the side of the bar that reaches back toward the level
        let touched = match pattern.kind() {
            PatternKind::HeadAndShouldersTop | PatternKind::RectangleBreakoutDown => {
                recent.iter().any(|c| (c.high - level).abs() <= tolerance)
            }
            PatternKind::HeadAndShouldersBottom
            | PatternKind::DoubleTop
            | PatternKind::RectangleBreakoutUp => {
                recent.iter().any(|c| (c.low - level).abs() <= tolerance)
            }
        };
        if !touched {
            return false;
        }

        match pattern.side() {
            Side::Long => current > level * (1.0 + RETEST_REJECTION),
            Side::Short => current < level * (1.0 - RETEST_REJECTION),
        }
    }
}

/// `|a - b| / avg(a, b)`, undefined when the average is zero
fn symmetry_ratio(a: f64, b: f64) -> Option<f64> {
    let avg = (a + b) / 2.0;
    (avg != 0.0).then(|| (a - b).abs() / avg)
}
