//! # HA Trend Backtester
//!
//! Single-asset backtester for a Heikin-Ashi trend-following strategy with
//! risk-based sizing, an ATR trailing stop, partial take-profits and
//! performance reporting.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `data`: OHLCV bars, CSV loading and market data providers
//! - `indicators`: Heikin-Ashi, SMA, RSI, ATR and ADX columns
//! - `strategy`: Entry signal generation
//! - `risk`: Risk-based position sizing
//! - `backtest`: Bar-by-bar simulation, metrics and parameter sweeps
//! - `notify`: Fire-and-forget trade notifications (Telegram)
//! - `persistence`: SQLite store for run results

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod strategy;

pub use config::Config;
pub use error::BacktestError;
