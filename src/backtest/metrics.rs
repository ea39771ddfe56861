//! Performance metrics calculation for backtesting.
//!
//! Provides PnL statistics, drawdown, and Sharpe, Sortino and Calmar ratios.
//! Every ratio is annualized with a fixed periods-per-year factor whatever
//! the bar interval, so hourly data is annualized as if it were daily.

use super::Trade;
use serde::{Deserialize, Serialize};

/// Summary statistics of one run, recomputed from the ledger and equity
/// curve. Infinite ratios serialize as the string `"inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub initial_equity: f64,
    pub total_pnl: f64,
    pub final_equity: f64,
    pub num_trades: usize,

    /// Percentage of trades with positive PnL; `None` without trades
    #[serde(default)]
    pub win_rate: Option<f64>,
    pub avg_win: f64,
    /// Mean PnL of trades with PnL <= 0
    pub avg_loss: f64,
    /// `None` without trades; infinite when nothing was lost
    #[serde(default, with = "option_float_or_inf")]
    pub profit_factor: Option<f64>,

    /// Worst decline from the running peak, as a negative fraction
    pub max_drawdown: f64,
    /// Mean per-bar return times periods per year
    pub annualized_return: f64,
    #[serde(with = "float_or_inf")]
    pub sharpe_ratio: f64,
    #[serde(with = "float_or_inf")]
    pub sortino_ratio: f64,
    #[serde(with = "float_or_inf")]
    pub calmar_ratio: f64,
}

impl PerformanceReport {
    /// Pure function of its inputs.
    pub fn compute(
        initial_equity: f64,
        trades: &[Trade],
        equity_curve: &[f64],
        periods_per_year: f64,
    ) -> Self {
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let num_trades = trades.len();

        let (wins, losses): (Vec<f64>, Vec<f64>) =
            trades.iter().map(|t| t.pnl).partition(|&pnl| pnl > 0.0);

        let win_rate = (num_trades > 0).then(|| wins.len() as f64 / num_trades as f64 * 100.0);
        let avg_win = mean(&wins).unwrap_or(0.0);
        let avg_loss = mean(&losses).unwrap_or(0.0);

        let profit_factor = (num_trades > 0).then(|| {
            let gross_loss: f64 = losses.iter().sum();
            if gross_loss == 0.0 {
                f64::INFINITY
            } else {
                (wins.iter().sum::<f64>() / gross_loss).abs()
            }
        });

        let max_drawdown = max_drawdown(equity_curve);
        let returns = period_returns(equity_curve);

        let (annualized_return, sharpe_ratio, sortino_ratio) = if returns.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let annualized = mean(&returns).unwrap_or(0.0) * periods_per_year;
            let scale = periods_per_year.sqrt();

            let sharpe = ratio(annualized, std_dev(&returns) * scale);

            let downside: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
            let sortino = if downside.is_empty() {
                f64::INFINITY
            } else {
                ratio(annualized, std_dev(&downside) * scale)
            };

            (annualized, sharpe, sortino)
        };

        let calmar_ratio = if max_drawdown == 0.0 {
            f64::INFINITY
        } else {
            annualized_return / max_drawdown.abs()
        };

        Self {
            initial_equity,
            total_pnl,
            final_equity: initial_equity + total_pnl,
            num_trades,
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            max_drawdown,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        let optional = |value: Option<f64>, suffix: &str| match value {
            Some(v) => format!("{:.2}{}", v, suffix),
            None => "n/a".to_string(),
        };

        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({} trades)
═══════════════════════════════════════════════
RETURNS
  Initial Equity:    ${:.2}
  Final Equity:      ${:.2}
  Total PnL:         ${:.2}
  Annualized:        {:.2}%

TRADES
  Win Rate:          {}
  Avg Win:           ${:.2}
  Avg Loss:          ${:.2}
  Profit Factor:     {}

RISK
  Max Drawdown:      {:.2}%

RISK-ADJUSTED
  Sharpe Ratio:      {:.3}
  Sortino Ratio:     {:.3}
  Calmar Ratio:      {:.3}
═══════════════════════════════════════════════"#,
            self.num_trades,
            self.initial_equity,
            self.final_equity,
            self.total_pnl,
            self.annualized_return * 100.0,
            optional(self.win_rate, "%"),
            self.avg_win,
            self.avg_loss,
            optional(self.profit_factor, ""),
            self.max_drawdown * 100.0,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
        )
    }
}

/// Minimum over the curve of `equity / running_peak - 1`.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;

    for &equity in equity_curve {
        peak = peak.max(equity);
        worst = worst.min(equity / peak - 1.0);
    }

    worst
}

/// Simple returns between consecutive points. A zero previous value
/// contributes a zero return.
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1). `NaN` for fewer than two values.
fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// 0 when the denominator is zero or undefined. Applies to Sharpe as well
/// as Sortino: a single return has no sample deviation and reads 0, not NaN.
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FloatRepr {
    Number(f64),
    Text(String),
}

impl FloatRepr {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            FloatRepr::Number(v) => Ok(v),
            FloatRepr::Text(t) => match t.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => other.parse().map_err(E::custom),
            },
        }
    }
}

fn inf_label(value: f64) -> Option<&'static str> {
    match value {
        v if v == f64::INFINITY => Some("inf"),
        v if v == f64::NEG_INFINITY => Some("-inf"),
        _ => None,
    }
}

mod float_or_inf {
    use super::{inf_label, FloatRepr};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        match inf_label(*value) {
            Some(label) => serializer.serialize_str(label),
            None => serializer.serialize_f64(*value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        FloatRepr::deserialize(deserializer)?.into_f64()
    }
}

mod option_float_or_inf {
    use super::{inf_label, FloatRepr};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            None => serializer.serialize_none(),
            Some(v) => match inf_label(*v) {
                Some(label) => serializer.serialize_str(label),
                None => serializer.serialize_f64(*v),
            },
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<f64>, D::Error> {
        Option::<FloatRepr>::deserialize(deserializer)?
            .map(FloatRepr::into_f64)
            .transpose()
    }
}
