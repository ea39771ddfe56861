//! Fixed-fractional position sizer.

use crate::error::BacktestError;
use tracing::{debug, warn};

/// Stop distance used for sizing, in multiples of the volatility reading.
pub const STOP_VOLATILITY_MULTIPLE: f64 = 2.0;

/// Quantity risking `risk_pct` percent of `equity` against a stop
/// `STOP_VOLATILITY_MULTIPLE * volatility` away.
///
/// Returns 0 when `volatility` is not positive. No lot-size rounding and
/// no upper bound.
pub fn position_size(equity: f64, risk_pct: f64, volatility: f64) -> f64 {
    if volatility.is_nan() || volatility <= 0.0 {
        warn!(volatility, "Non-positive volatility, position size is zero");
        return 0.0;
    }

    let risk_amount = equity * risk_pct / 100.0;
    let stop_distance = STOP_VOLATILITY_MULTIPLE * volatility;
    let quantity = risk_amount / stop_distance;

    debug!(
        equity,
        risk_amount, stop_distance, quantity, "Position size calculated"
    );

    quantity
}

/// Sizes entries from a running equity figure.
#[derive(Debug, Clone)]
pub struct RiskSizer {
    equity: f64,
    risk_pct: f64,
}

impl RiskSizer {
    /// Fails if `equity` is not positive.
    pub fn new(equity: f64, risk_pct: f64) -> Result<Self, BacktestError> {
        if equity.is_nan() || equity <= 0.0 {
            return Err(BacktestError::InvalidEquity(equity));
        }

        Ok(Self { equity, risk_pct })
    }

    /// Update the equity used for subsequent sizing.
    pub fn set_equity(&mut self, equity: f64) {
        self.equity = equity;
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn risk_pct(&self) -> f64 {
        self.risk_pct
    }

    pub fn size(&self, volatility: f64) -> f64 {
        position_size(self.equity, self.risk_pct, volatility)
    }
}
