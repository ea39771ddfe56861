//! Indicator math over plain slices.
//!
//! Every function returns a vector the same length as its input with
//! `NaN` wherever the lookback is not yet satisfied.

use crate::data::Bar;

/// Simple moving average over `period` values. Any `NaN` inside the
/// window yields `NaN`.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_finite()) {
            result[i] = window.iter().sum::<f64>() / period as f64;
        }
    }

    result
}

/// Wilder smoothing: an adjusted exponential mean with alpha = 1/period.
///
/// Missing values are skipped but still age the weights of earlier
/// observations. Output is `NaN` until `period` values have been observed,
/// after which a missing input repeats the previous average.
pub fn rma(values: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; values.len()];
    if period == 0 {
        return result;
    }

    let decay = 1.0 - 1.0 / period as f64;
    let mut average = f64::NAN;
    let mut old_weight = 1.0;
    let mut observed = 0;

    for (i, &value) in values.iter().enumerate() {
        let is_observation = value.is_finite();
        if is_observation {
            observed += 1;
        }

        if average.is_nan() {
            if is_observation {
                average = value;
            }
        } else {
            old_weight *= decay;
            if is_observation {
                if average != value {
                    average = (old_weight * average + value) / (old_weight + 1.0);
                }
                old_weight += 1.0;
            }
        }

        if observed >= period {
            result[i] = average;
        }
    }

    result
}

/// True range. The first bar has no previous close and is `NaN`.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = vec![f64::NAN; bars.len()];
    for i in 1..bars.len() {
        let (h, l, pc) = (bars[i].high, bars[i].low, bars[i - 1].close);
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

/// Average true range (Wilder smoothing of the true range).
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    rma(&true_range(bars), period)
}

/// Relative strength index over closing prices.
///
/// Flat windows (no gains, no losses) read 50; windows with gains and no
/// losses read 100.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut gains = vec![f64::NAN; n];
    let mut losses = vec![f64::NAN; n];
    for i in 1..n {
        let change = closes[i] - closes[i - 1];
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }

    let avg_gain = rma(&gains, period);
    let avg_loss = rma(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(&g, &l)| {
            if g.is_nan() || l.is_nan() {
                f64::NAN
            } else if l == 0.0 {
                if g == 0.0 {
                    50.0
                } else {
                    100.0
                }
            } else {
                100.0 - 100.0 / (1.0 + g / l)
            }
        })
        .collect()
}

/// Average directional index (Wilder).
pub fn adx(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];

    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let tr = rma(&true_range(bars), period);
    let plus = rma(&plus_dm, period);
    let minus = rma(&minus_dm, period);

    let dx: Vec<f64> = (0..n)
        .map(|i| {
            if tr[i].is_nan() || tr[i] == 0.0 {
                return f64::NAN;
            }
            let plus_di = 100.0 * plus[i] / tr[i];
            let minus_di = 100.0 * minus[i] / tr[i];
            let sum = plus_di + minus_di;
            if sum == 0.0 {
                0.0
            } else {
                100.0 * (plus_di - minus_di).abs() / sum
            }
        })
        .collect();

    rma(&dx, period)
}

/// Heikin-Ashi candles as `(open, high, low, close)` columns.
pub fn heikin_ashi(bars: &[Bar]) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = bars.len();
    let mut ha_open = vec![f64::NAN; n];
    let mut ha_high = vec![f64::NAN; n];
    let mut ha_low = vec![f64::NAN; n];
    let mut ha_close = vec![f64::NAN; n];

    for (i, bar) in bars.iter().enumerate() {
        ha_close[i] = (bar.open + bar.high + bar.low + bar.close) / 4.0;
        ha_open[i] = if i == 0 {
            (bar.open + bar.close) / 2.0
        } else {
            (ha_open[i - 1] + ha_close[i - 1]) / 2.0
        };
        ha_high[i] = bar.high.max(ha_open[i]).max(ha_close[i]);
        ha_low[i] = bar.low.min(ha_open[i]).min(ha_close[i]);
    }

    (ha_open, ha_high, ha_low, ha_close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::bar;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sma_warmup_and_values() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_rma_adjusted_exponential_mean() {
        let out = rma(&[f64::NAN, 2.0, 4.0, 6.0, 8.0], 2);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!(approx(out[2], 10.0 / 3.0));
        assert!(approx(out[3], 34.0 / 7.0));
        assert!(approx(out[4], 98.0 / 15.0));
    }

    #[test]
    fn test_rma_gap_ages_weights() {
        // The gap decays the first value's weight without adding an observation
        let out = rma(&[2.0, f64::NAN, 4.0], 2);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!(approx(out[2], (0.25 * 2.0 + 4.0) / 1.25));
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let bars = vec![bar(0, 10.0, 11.0, 9.0, 10.0), bar(1, 12.0, 14.0, 12.0, 13.0)];
        let tr = true_range(&bars);
        assert!(tr[0].is_nan());
        // max(14-12, |14-10|, |12-10|) = 4
        assert_eq!(tr[1], 4.0);
    }

    #[test]
    fn test_atr_constant_range() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 10.0, 11.0, 9.0, 10.0)).collect();
        let out = atr(&bars, 3);
        assert!(out[2].is_nan());
        assert!(approx(out[3], 2.0));
        assert!(approx(out[9], 2.0));
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let out = rsi(&rising, 14);
        assert!(out[13].is_nan());
        assert_eq!(out[14], 100.0);

        let flat = vec![5.0; 20];
        assert_eq!(rsi(&flat, 14)[19], 50.0);
    }

    #[test]
    fn test_adx_strong_uptrend() {
        let bars: Vec<Bar> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                bar(i, base, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        let out = adx(&bars, 5);
        assert!(out[5].is_nan());
        assert!(out[39] > 90.0);
    }

    #[test]
    fn test_heikin_ashi() {
        let bars = vec![bar(0, 10.0, 12.0, 9.0, 11.0), bar(1, 11.0, 13.0, 10.0, 12.0)];
        let (o, h, l, c) = heikin_ashi(&bars);
        assert_eq!(o[0], 10.5);
        assert_eq!(c[0], 10.5);
        assert_eq!(c[1], 11.5);
        assert_eq!(o[1], 10.5);
        assert_eq!(h[1], 13.0);
        assert_eq!(l[1], 10.0);
    }
}
