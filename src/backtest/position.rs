//! Open-position bookkeeping and the trade ledger record.

use crate::data::Bar;
use crate::strategy::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a (partial) position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ExitReason {
    StopLoss,
    /// 1-based index into the take-profit list the position opened with
    TakeProfit(usize),
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "SL"),
            ExitReason::TakeProfit(k) => write!(f, "TP{}", k),
            ExitReason::EndOfData => write!(f, "EOD"),
        }
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SL" => Ok(ExitReason::StopLoss),
            "EOD" => Ok(ExitReason::EndOfData),
            other => other
                .strip_prefix("TP")
                .and_then(|k| k.parse::<usize>().ok())
                .filter(|&k| k >= 1)
                .map(ExitReason::TakeProfit)
                .ok_or_else(|| format!("unknown exit reason '{}'", other)),
        }
    }
}

impl From<ExitReason> for String {
    fn from(reason: ExitReason) -> Self {
        reason.to_string()
    }
}

impl TryFrom<String> for ExitReason {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A completed (full or partial) exit. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_timestamp: DateTime<Utc>,
    pub exit_timestamp: DateTime<Utc>,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Quantity closed by this exit
    pub quantity: f64,
    pub pnl: f64,
    pub reason: ExitReason,
}

/// One remaining rung of the take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// 1-based position in the original ladder
    pub index: usize,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: Side,
    pub entry_price: f64,
    /// Remaining quantity
    pub quantity: f64,
    pub original_quantity: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub stop_loss: f64,
    /// Unconsumed levels in priority order
    pub take_profit_levels: Vec<TakeProfitLevel>,
    /// Highest high (long) or lowest low (short) since entry
    pub extremum: f64,
}

impl OpenPosition {
    /// Open at `entry_price`, seeding the trailing extremum from `bar`.
    pub fn open(
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_loss: f64,
        take_profit_prices: &[f64],
        bar: &Bar,
    ) -> Self {
        let extremum = match side {
            Side::Long => bar.high,
            Side::Short => bar.low,
        };

        Self {
            side,
            entry_price,
            quantity,
            original_quantity: quantity,
            entry_timestamp: bar.timestamp,
            stop_loss,
            take_profit_levels: take_profit_prices
                .iter()
                .enumerate()
                .map(|(i, &price)| TakeProfitLevel {
                    index: i + 1,
                    price,
                })
                .collect(),
            extremum,
        }
    }

    /// Move the extremum with `bar` and place the stop `multiplier *
    /// volatility` behind it.
    pub fn trail(&mut self, bar: &Bar, volatility: f64, multiplier: f64) {
        let distance = multiplier * volatility;
        match self.side {
            Side::Long => {
                self.extremum = self.extremum.max(bar.high);
                self.stop_loss = self.extremum - distance;
            }
            Side::Short => {
                self.extremum = self.extremum.min(bar.low);
                self.stop_loss = self.extremum + distance;
            }
        }
    }

    pub fn stop_hit(&self, bar: &Bar) -> bool {
        match self.side {
            Side::Long => bar.low <= self.stop_loss,
            Side::Short => bar.high >= self.stop_loss,
        }
    }

    /// Position (in the remaining list) of the first level `bar` reaches.
    pub fn first_take_profit_hit(&self, bar: &Bar) -> Option<usize> {
        self.take_profit_levels.iter().position(|level| match self.side {
            Side::Long => bar.high >= level.price,
            Side::Short => bar.low <= level.price,
        })
    }

    pub fn pnl(&self, exit_price: f64, quantity: f64) -> f64 {
        (exit_price - self.entry_price) * quantity * self.side.sign()
    }

    /// Ledger record for closing `quantity` at `exit_price`.
    pub fn exit_trade(
        &self,
        exit_timestamp: DateTime<Utc>,
        exit_price: f64,
        quantity: f64,
        reason: ExitReason,
    ) -> Trade {
        Trade {
            entry_timestamp: self.entry_timestamp,
            exit_timestamp,
            side: self.side,
            entry_price: self.entry_price,
            exit_price,
            quantity,
            pnl: self.pnl(exit_price, quantity),
            reason,
        }
    }
}

/// At most one position exists at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Position {
    #[default]
    Flat,
    Open(OpenPosition),
}

impl Position {
    pub fn is_flat(&self) -> bool {
        matches!(self, Position::Flat)
    }

    pub fn as_open(&self) -> Option<&OpenPosition> {
        match self {
            Position::Open(pos) => Some(pos),
            Position::Flat => None,
        }
    }
}
