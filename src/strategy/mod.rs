//! Entry signal generation.
//!
//! The engine asks a [`SignalSource`] once per flat bar whether to open a
//! position. [`HeikinAshiTrend`] is the rule set shipped with the crate.

mod heikin_ashi;

pub use heikin_ashi::HeikinAshiTrend;

use crate::data::Bar;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// A proposed entry. `side == None` means stay flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub side: Option<Side>,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Take-profit prices in priority order
    pub take_profit_levels: Vec<f64>,
    /// Trend strength when the signal fired, for logs and notifications
    #[serde(default)]
    pub adx_at_entry: Option<f64>,
}

impl TradeSignal {
    pub fn none() -> Self {
        Self {
            side: None,
            entry_price: 0.0,
            stop_loss: 0.0,
            take_profit_levels: Vec::new(),
            adx_at_entry: None,
        }
    }

    pub fn is_directional(&self) -> bool {
        self.side.is_some()
    }
}

/// Classifies the latest bar of a window.
#[cfg_attr(test, mockall::automock)]
pub trait SignalSource: Send {
    /// `window` is the series prefix ending at (and including) the current bar.
    fn evaluate(&self, window: &[Bar]) -> TradeSignal;
}
