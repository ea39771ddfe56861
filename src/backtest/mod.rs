//! Backtesting module.
//!
//! This module provides:
//! - Bar-by-bar simulation with a trailing stop, partial take-profits and
//!   an end-of-data close
//! - Performance metrics calculation
//! - Parameter sweep for optimization
//!
//! # Example
//!
//! ```rust,ignore
//! use ha_trend_backtester::backtest::BacktestEngine;
//! use ha_trend_backtester::indicators::IndicatorCalculator;
//! use ha_trend_backtester::notify::NotificationHandle;
//! use ha_trend_backtester::strategy::HeikinAshiTrend;
//!
//! let series = IndicatorCalculator::new(&config.strategy).add_all(&raw);
//! let strategy = HeikinAshiTrend::new(&config.strategy);
//! let mut engine = BacktestEngine::new(&config, strategy, NotificationHandle::disabled())?;
//!
//! let result = engine.run(&series)?;
//! println!("PnL: {:.2}", result.report.total_pnl);
//! ```

mod engine;
mod metrics;
mod position;
mod runner;

pub use engine::{BacktestEngine, BacktestResult, EquityPoint};
pub use metrics::{max_drawdown, period_returns, PerformanceReport};
pub use position::{ExitReason, OpenPosition, Position, TakeProfitLevel, Trade};
pub use runner::{ParameterSpace, SweepParams, SweepResults, SweepRun, SweepRunner};
