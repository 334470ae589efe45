//! Series indicators used by the trend classifier, pattern scans and stop sizing
//!
//! Every function takes plain `f64` columns and returns one value per input bar,
//! with `None` where the lookback is not yet filled. Moving averages are driven
//! by the `ta` crate; the rest are small closed-form helpers.

use statrs::statistics::Statistics;
use ta::indicators::{ExponentialMovingAverage, SimpleMovingAverage};
use ta::Next;

// =============================================================================
// Moving Averages
// =============================================================================

/// Simple moving average; `None` until `period` values have been seen
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let avg = indicator.next(value);
            (i + 1 >= period).then_some(avg)
        })
        .collect()
}

/// Exponential moving average over the whole series.
///
/// Seeded with the first value and updated with `alpha = 2 / (span + 1)`,
/// so there is no warm-up gap: every bar has a value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() || span == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(span) {
        Ok(i) => i,
        Err(_) => return vec![],
    };

    values.iter().map(|&v| indicator.next(v)).collect()
}

/// Rolling mean over optional inputs. A window containing any `None` yields `None`.
pub fn rolling_mean(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            values[i + 1 - period..=i]
                .iter()
                .copied()
                .sum::<Option<f64>>()
                .map(|sum| sum / period as f64)
        })
        .collect()
}

// =============================================================================
// Volatility
// =============================================================================

/// True range: `max(high - low, |high - prev_close|, |low - prev_close|)`.
/// The first bar has no previous close and uses `high - low`.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());

    (0..n)
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                hl
            } else {
                let prev_close = close[i - 1];
                hl.max((high[i] - prev_close).abs())
                    .max((low[i] - prev_close).abs())
            }
        })
        .collect()
}

/// Average True Range as the plain rolling mean of the true range
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    sma(&true_range(high, low, close), period)
}

// =============================================================================
// Directional Movement
// =============================================================================

/// +DM / -DM per bar. Only the larger of the two moves counts, and only when positive.
pub fn directional_movement(high: &[f64], low: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = high.len().min(low.len());
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];

    for i in 1..n {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];

        if up_move > down_move {
            plus_dm[i] = up_move.max(0.0);
        }
        if down_move > up_move {
            minus_dm[i] = down_move.max(0.0);
        }
    }

    (plus_dm, minus_dm)
}

/// Simplified ADX: every stage (ATR, both DMs, and DX itself) is smoothed with a
/// plain rolling mean over `period` bars.
///
/// Bars where the ATR or the DI sum is zero produce no DX, which in turn leaves
/// the ADX undefined for any window containing them.
pub fn simple_adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(high, low, close);
    let (plus_dm, minus_dm) = directional_movement(high, low);

    let atr = sma(&tr, period);
    let plus_avg = sma(&plus_dm, period);
    let minus_avg = sma(&minus_dm, period);

    let dx: Vec<Option<f64>> = atr
        .iter()
        .zip(plus_avg.iter().zip(minus_avg.iter()))
        .map(|(atr, (plus, minus))| {
            let (atr, plus, minus) = ((*atr)?, (*plus)?, (*minus)?);
            if atr == 0.0 {
                return None;
            }
            let plus_di = 100.0 * plus / atr;
            let minus_di = 100.0 * minus / atr;
            let sum = plus_di + minus_di;
            if sum == 0.0 {
                return None;
            }
            Some(100.0 * (plus_di - minus_di).abs() / sum)
        })
        .collect();

    rolling_mean(&dx, period)
}

// =============================================================================
// Structure
// =============================================================================

/// Indices of swing highs: bars whose value equals the maximum of the centered
/// window `[i - radius, i + radius]`. Bars closer than `radius` to either end
/// have an incomplete window and are never swings.
pub fn swing_highs(values: &[f64], radius: usize) -> Vec<usize> {
    centered_extrema(values, radius, |window| {
        window.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    })
}

/// Indices of swing lows, mirror of [`swing_highs`]
pub fn swing_lows(values: &[f64], radius: usize) -> Vec<usize> {
    centered_extrema(values, radius, |window| {
        window.iter().copied().fold(f64::INFINITY, f64::min)
    })
}

fn centered_extrema(values: &[f64], radius: usize, extreme: impl Fn(&[f64]) -> f64) -> Vec<usize> {
    let n = values.len();
    if n < 2 * radius + 1 {
        return vec![];
    }

    (radius..n - radius)
        .filter(|&i| values[i] == extreme(&values[i - radius..=i + radius]))
        .collect()
}

/// Least-squares slope of `values` against the bar index `0..n`
pub fn linreg_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.mean();

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });

    (den > 0.0).then(|| num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma_warmup() {
        let result = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_relative_eq!(result[2].unwrap(), 2.0);
        assert_relative_eq!(result[4].unwrap(), 4.0);
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let result = ema(&[10.0, 20.0, 30.0], 3);
        // alpha = 0.5
        assert_relative_eq!(result[0], 10.0);
        assert_relative_eq!(result[1], 15.0);
        assert_relative_eq!(result[2], 22.5);
    }

    #[test]
    fn test_true_range_uses_prev_close() {
        let high = [10.0, 12.0, 11.0];
        let low = [8.0, 11.0, 7.0];
        let close = [9.0, 11.5, 8.0];
        let tr = true_range(&high, &low, &close);
        assert_relative_eq!(tr[0], 2.0);
        assert_relative_eq!(tr[1], 3.0); // gap above prev close 9
        assert_relative_eq!(tr[2], 4.5); // low 7 vs prev close 11.5
    }

    #[test]
    fn test_atr_insufficient_history() {
        let high = [10.0, 11.0];
        let low = [9.0, 10.0];
        let close = [9.5, 10.5];
        assert!(atr(&high, &low, &close, 14).iter().all(Option::is_none));
    }

    #[test]
    fn test_rolling_mean_propagates_gaps() {
        let values = [Some(1.0), None, Some(3.0), Some(5.0)];
        let result = rolling_mean(&values, 2);
        assert_eq!(result[1], None);
        assert_eq!(result[2], None);
        assert_relative_eq!(result[3].unwrap(), 4.0);
    }

    #[test]
    fn test_swing_points_ignore_edges() {
        let values = [5.0, 1.0, 2.0, 9.0, 2.0, 1.0, 0.5];
        assert_eq!(swing_highs(&values, 2), vec![3]);
        // index 0 is the global max but its window is incomplete
        assert!(!swing_highs(&values, 2).contains(&0));
        assert_eq!(swing_lows(&values, 2), Vec::<usize>::new());
    }

    #[test]
    fn test_directional_movement() {
        let high = [10.0, 12.0, 11.0];
        let low = [9.0, 10.0, 7.0];
        let (plus, minus) = directional_movement(&high, &low);
        assert_eq!(plus, vec![0.0, 2.0, 0.0]);
        assert_eq!(minus, vec![0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_linreg_slope() {
        let values: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
        assert_relative_eq!(linreg_slope(&values).unwrap(), 2.0, epsilon = 1e-12);
        assert_eq!(linreg_slope(&[1.0]), None);
    }

    #[test]
    fn test_simple_adx_bounds() {
        let high: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let low: Vec<f64> = high.iter().map(|h| h - 2.0).collect();
        let close: Vec<f64> = high.iter().map(|h| h - 1.0).collect();
        let adx = simple_adx(&high, &low, &close, 14);
        let last = adx.last().copied().flatten().unwrap();
        // a one-way market is all +DM
        assert_relative_eq!(last, 100.0, epsilon = 1e-9);
        assert!(adx[10].is_none());
    }
}
