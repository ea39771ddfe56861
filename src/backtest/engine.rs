//! Backtesting simulation engine.
//!
//! Replays a bar series through a signal source, one bar at a time, with
//! at most one open position.

use super::metrics::PerformanceReport;
use super::position::{ExitReason, OpenPosition, Position, Trade};
use crate::config::{BacktestConfig, Config};
use crate::data::{Bar, BarSeries};
use crate::error::BacktestError;
use crate::notify::NotificationHandle;
use crate::risk::RiskSizer;
use crate::strategy::SignalSource;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Account equity after a bar has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    /// One point per input bar, aligned with the series
    pub equity_curve: Vec<EquityPoint>,
    pub report: PerformanceReport,
}

impl BacktestResult {
    /// Export equity curve to CSV.
    pub fn equity_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        for point in &self.equity_curve {
            wtr.serialize(point)?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// Export the trade ledger to CSV.
    pub fn trades_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        for trade in &self.trades {
            wtr.serialize(trade)?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        match (self.equity_curve.first(), self.equity_curve.last()) {
            (Some(first), Some(last)) => format!(
                "{}\n\nBacktest Period: {} to {}\nBars: {}",
                self.report.summary(),
                first.timestamp.format("%Y-%m-%d %H:%M"),
                last.timestamp.format("%Y-%m-%d %H:%M"),
                self.equity_curve.len(),
            ),
            _ => self.report.summary(),
        }
    }

    pub fn equity_values(&self) -> Vec<f64> {
        self.equity_curve.iter().map(|p| p.equity).collect()
    }
}

/// The backtesting simulation engine.
///
/// The series must carry the configured ATR column on every bar; the
/// engine checks this before simulating and otherwise trusts its input.
pub struct BacktestEngine<S: SignalSource> {
    signal_source: S,
    notifications: NotificationHandle,
    settings: BacktestConfig,
    sizer: RiskSizer,
    atr_column: String,

    position: Position,
    trades: Vec<Trade>,
}

impl<S: SignalSource> BacktestEngine<S> {
    /// Create a new backtest engine. Fails on invalid configuration.
    pub fn new(
        config: &Config,
        signal_source: S,
        notifications: NotificationHandle,
    ) -> std::result::Result<Self, BacktestError> {
        config.validate()?;
        let sizer = RiskSizer::new(
            config.backtest.initial_equity,
            config.trading.risk_per_trade,
        )?;

        Ok(Self {
            signal_source,
            notifications,
            settings: config.backtest.clone(),
            sizer,
            atr_column: config.strategy.atr_column(),
            position: Position::Flat,
            trades: Vec::new(),
        })
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Run the simulation over `series`.
    pub fn run(
        &mut self,
        series: &BarSeries,
    ) -> std::result::Result<BacktestResult, BacktestError> {
        let bars = series.bars();
        let (first, last) = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(BacktestError::EmptySeries),
        };

        let volatility: Vec<f64> = bars
            .iter()
            .enumerate()
            .map(|(index, bar)| {
                bar.get(&self.atr_column)
                    .ok_or_else(|| BacktestError::MissingColumn {
                        column: self.atr_column.clone(),
                        index,
                    })
            })
            .collect::<std::result::Result<_, _>>()?;

        info!(
            "Starting backtest over {} bars from {} to {}",
            bars.len(),
            first.timestamp.format("%Y-%m-%d %H:%M"),
            last.timestamp.format("%Y-%m-%d %H:%M")
        );

        let initial_equity = self.settings.initial_equity;
        self.position = Position::Flat;
        self.trades.clear();
        self.sizer.set_equity(initial_equity);

        let mut equity = Vec::with_capacity(bars.len());
        equity.push(initial_equity);

        for i in 1..bars.len() {
            let previous_equity = equity[i - 1];
            self.sizer.set_equity(previous_equity);

            let ledger_len = self.trades.len();
            self.step(&bars[..=i], volatility[i]);

            let realized: f64 = self.trades[ledger_len..].iter().map(|t| t.pnl).sum();
            equity.push(previous_equity + realized);
        }

        if let Position::Open(pos) = std::mem::take(&mut self.position) {
            let trade = pos.exit_trade(last.timestamp, last.close, pos.quantity, ExitReason::EndOfData);
            self.notifications.notify(format!(
                "Position closed at EOD. Type: {}, PnL: {:.2}",
                trade.side, trade.pnl
            ));
            debug!("EOD close at {:.2}, pnl {:.2}", trade.exit_price, trade.pnl);

            if let Some(final_equity) = equity.last_mut() {
                *final_equity += trade.pnl;
            }
            self.trades.push(trade);
        }

        let report = PerformanceReport::compute(
            initial_equity,
            &self.trades,
            &equity,
            self.settings.periods_per_year,
        );

        info!(
            "Backtest complete. {} trades, final equity: ${:.2}",
            report.num_trades, report.final_equity
        );

        let equity_curve = bars
            .iter()
            .zip(&equity)
            .map(|(bar, &equity)| EquityPoint {
                timestamp: bar.timestamp,
                equity,
            })
            .collect();

        Ok(BacktestResult {
            trades: self.trades.clone(),
            equity_curve,
            report,
        })
    }

    /// Process one bar. `window` ends at the current bar.
    fn step(&mut self, window: &[Bar], volatility: f64) {
        let Some(bar) = window.last() else {
            return;
        };

        let mut exited = false;
        if let Position::Open(pos) = &mut self.position {
            pos.trail(bar, volatility, self.settings.trailing_atr_multiplier);

            if pos.stop_hit(bar) {
                let trade = pos.exit_trade(bar.timestamp, pos.stop_loss, pos.quantity, ExitReason::StopLoss);
                self.notifications.notify(format!(
                    "{} position closed by SL at {:.2}. PnL: {:.2}",
                    capitalize(&trade.side.to_string()),
                    trade.exit_price,
                    trade.pnl
                ));
                debug!("Stop loss hit at {:.2}, pnl {:.2}", trade.exit_price, trade.pnl);

                self.trades.push(trade);
                self.position = Position::Flat;
                exited = true;
            } else if let Some(slot) = pos.first_take_profit_hit(bar) {
                let level = pos.take_profit_levels.remove(slot);
                let partial = pos.quantity * self.settings.partial_close_fraction;
                let trade = pos.exit_trade(
                    bar.timestamp,
                    level.price,
                    partial,
                    ExitReason::TakeProfit(level.index),
                );
                pos.quantity -= partial;

                self.notifications.notify(format!(
                    "{} position partial TP{} hit at {:.2}. PnL: {:.2}",
                    capitalize(&trade.side.to_string()),
                    level.index,
                    trade.exit_price,
                    trade.pnl
                ));
                debug!(
                    "TP{} hit at {:.2}, closed {:.6}, remaining {:.6}",
                    level.index, level.price, partial, pos.quantity
                );

                let closed = pos.quantity <= self.settings.epsilon;
                self.trades.push(trade);
                exited = true;
                if closed {
                    self.position = Position::Flat;
                }
            }
        }

        if exited || !self.position.is_flat() {
            return;
        }

        self.try_enter(window, volatility);
    }

    fn try_enter(&mut self, window: &[Bar], volatility: f64) {
        let Some(bar) = window.last() else {
            return;
        };

        let signal = self.signal_source.evaluate(window);
        let Some(side) = signal.side else {
            return;
        };
        if volatility.is_nan() || volatility <= 0.0 {
            debug!("Skipping {} signal at {}: volatility {}", side, bar.timestamp, volatility);
            return;
        }

        let quantity = self.sizer.size(volatility);
        if quantity <= 0.0 {
            return;
        }

        let pos = OpenPosition::open(
            side,
            signal.entry_price,
            quantity,
            signal.stop_loss,
            &signal.take_profit_levels,
            bar,
        );

        let adx_note = signal
            .adx_at_entry
            .map(|adx| format!(", ADX {:.1}", adx))
            .unwrap_or_default();
        info!(
            "Entered {} at {:.2} with qty {:.6}{}",
            side, pos.entry_price, pos.quantity, adx_note
        );
        self.notifications.notify(format!(
            "Entered {} at {:.2} with qty {:.6}{}",
            side, pos.entry_price, pos.quantity, adx_note
        ));

        self.position = Position::Open(pos);
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::bar;
    use crate::notify::{spawn_dispatcher, MockNotifier};
    use crate::strategy::{MockSignalSource, Side, TradeSignal};
    use std::sync::Arc;

    const ATR: &str = "ATRr_14";

    fn test_config() -> Config {
        Config::default()
    }

    fn series(rows: &[(f64, f64, f64, f64)], atr: f64) -> BarSeries {
        let bars = rows
            .iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| bar(i as i64, o, h, l, c).with(ATR, atr))
            .collect();
        BarSeries::new(bars)
    }

    fn long_signal(entry: f64, stop: f64, levels: &[f64]) -> TradeSignal {
        TradeSignal {
            side: Some(Side::Long),
            entry_price: entry,
            stop_loss: stop,
            take_profit_levels: levels.to_vec(),
            adx_at_entry: None,
        }
    }

    /// Fires `signal` on the bar with index `at` (window length `at + 1`).
    fn signal_at(at: usize, signal: TradeSignal) -> MockSignalSource {
        let mut source = MockSignalSource::new();
        source.expect_evaluate().returning(move |window| {
            if window.len() == at + 1 {
                signal.clone()
            } else {
                TradeSignal::none()
            }
        });
        source
    }

    fn never() -> MockSignalSource {
        let mut source = MockSignalSource::new();
        source.expect_evaluate().returning(|_| TradeSignal::none());
        source
    }

    fn engine(source: MockSignalSource) -> BacktestEngine<MockSignalSource> {
        BacktestEngine::new(&test_config(), source, NotificationHandle::disabled()).unwrap()
    }

    fn assert_equity_invariant(result: &BacktestResult, initial: f64) {
        let equity = result.equity_values();
        assert_eq!(equity[0], initial);
        for i in 1..equity.len() {
            let ts = result.equity_curve[i].timestamp;
            let realized: f64 = result
                .trades
                .iter()
                .filter(|t| t.exit_timestamp == ts)
                .map(|t| t.pnl)
                .sum();
            assert!((equity[i] - (equity[i - 1] + realized)).abs() < 1e-9);
        }
    }

    // ==================== Construction ====================

    #[test]
    fn test_non_positive_equity_rejected() {
        let mut config = test_config();
        config.backtest.initial_equity = 0.0;
        let result = BacktestEngine::new(&config, never(), NotificationHandle::disabled());
        assert!(matches!(result, Err(BacktestError::InvalidEquity(_))));
    }

    #[test]
    fn test_empty_series_rejected() {
        let mut engine = engine(never());
        assert!(matches!(
            engine.run(&BarSeries::default()),
            Err(BacktestError::EmptySeries)
        ));
    }

    #[test]
    fn test_missing_volatility_column_rejected() {
        let mut engine = engine(never());
        let series = BarSeries::new(vec![bar(0, 1.0, 1.0, 1.0, 1.0)]);
        assert!(matches!(
            engine.run(&series),
            Err(BacktestError::MissingColumn { index: 0, .. })
        ));
    }

    // ==================== No signal ====================

    #[test]
    fn test_no_signal_no_trades() {
        let mut engine = engine(never());
        let data = series(&[(100.0, 101.0, 99.0, 100.0); 5], 1.0);

        let result = engine.run(&data).unwrap();

        assert_eq!(result.report.num_trades, 0);
        assert_eq!(result.report.total_pnl, 0.0);
        assert_eq!(result.report.final_equity, 10_000.0);
        assert_eq!(result.equity_curve.len(), 5);
        assert!(result.equity_values().iter().all(|&e| e == 10_000.0));
    }

    #[test]
    fn test_bar_zero_is_never_evaluated() {
        let mut source = MockSignalSource::new();
        source
            .expect_evaluate()
            .withf(|window| window.len() >= 2)
            .times(2)
            .returning(|_| TradeSignal::none());

        let mut engine = engine(source);
        engine.run(&series(&[(100.0, 101.0, 99.0, 100.0); 3], 1.0)).unwrap();
    }

    // ==================== Stop loss ====================

    #[test]
    fn test_stop_loss_at_exact_low() {
        // Entry on bar 1 at 100 with ATR 1: extremum 101
        // Bar 2: high 101 keeps the stop at 101 - 2 = 99, low touches 99
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (100.0, 101.0, 99.0, 99.5),
            ],
            1.0,
        );
        let mut engine = engine(signal_at(1, long_signal(100.0, 98.0, &[110.0])));

        let result = engine.run(&data).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, 99.0);
        // 10000 * 1% / (2 * 1) = 50
        assert_eq!(trade.quantity, 50.0);
        assert_eq!(trade.pnl, -50.0);
        assert_eq!(trade.exit_timestamp, data[2].timestamp);
        assert_eq!(result.report.final_equity, 9_950.0);
        assert!(engine.position().is_flat());
        assert_equity_invariant(&result, 10_000.0);
    }

    #[test]
    fn test_stop_loss_checked_before_take_profit() {
        // Bar 2 reaches the TP and the stop in the same bar
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (100.0, 106.0, 90.0, 100.0),
            ],
            1.0,
        );
        let mut engine = engine(signal_at(1, long_signal(100.0, 98.0, &[105.0])));

        let result = engine.run(&data).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].reason, ExitReason::StopLoss);
        // Trailing stop follows the new high: 106 - 2
        assert_eq!(result.trades[0].exit_price, 104.0);
    }

    #[test]
    fn test_no_reentry_on_exit_bar() {
        let mut source = MockSignalSource::new();
        source
            .expect_evaluate()
            .returning(|_| long_signal(100.0, 98.0, &[200.0]));

        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (100.0, 101.0, 98.0, 99.0),
            ],
            1.0,
        );
        let mut engine = engine(source);
        let result = engine.run(&data).unwrap();

        // SL on bar 2 and no new position afterwards, so no EOD trade
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].reason, ExitReason::StopLoss);
    }

    // ==================== Take profit ====================

    #[test]
    fn test_take_profit_closes_half_of_remaining() {
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (102.5, 104.0, 102.5, 103.0),
                (103.0, 104.0, 102.5, 103.5),
            ],
            1.0,
        );
        let mut engine = engine(signal_at(1, long_signal(100.0, 98.0, &[103.0, 110.0])));

        let result = engine.run(&data).unwrap();

        let tp = &result.trades[0];
        assert_eq!(tp.reason, ExitReason::TakeProfit(1));
        assert_eq!(tp.quantity, 25.0);
        assert_eq!(tp.pnl, 75.0);

        // Remaining half closes at the end with the second level untouched
        let eod = &result.trades[1];
        assert_eq!(eod.reason, ExitReason::EndOfData);
        assert_eq!(eod.quantity, 25.0);
        assert_eq!(eod.exit_price, 103.5);
        assert_eq!(tp.quantity + eod.quantity, 50.0);
        assert_equity_invariant(&result, 10_000.0);
    }

    #[test]
    fn test_only_one_take_profit_per_bar_keeps_ladder_index() {
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                // Gaps through both levels: only the first fires
                (111.0, 112.0, 110.5, 111.0),
                // Second level fires on the next bar and keeps its label
                (111.0, 112.0, 110.5, 111.0),
            ],
            1.0,
        );
        let mut engine = engine(signal_at(1, long_signal(100.0, 98.0, &[103.0, 105.0])));

        let result = engine.run(&data).unwrap();

        let reasons: Vec<ExitReason> = result.trades.iter().map(|t| t.reason).collect();
        assert_eq!(
            reasons,
            vec![
                ExitReason::TakeProfit(1),
                ExitReason::TakeProfit(2),
                ExitReason::EndOfData
            ]
        );
        assert_eq!(result.trades[0].exit_timestamp, data[2].timestamp);
        assert_eq!(result.trades[1].exit_timestamp, data[3].timestamp);
        assert_eq!(result.trades[1].quantity, 12.5);

        let closed: f64 = result.trades.iter().map(|t| t.quantity).sum();
        assert!((closed - 50.0).abs() < 1e-6);
        assert_equity_invariant(&result, 10_000.0);
    }

    #[test]
    fn test_dust_remainder_closes_position() {
        let mut config = test_config();
        config.backtest.partial_close_fraction = 1.0;
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (102.5, 104.0, 102.5, 103.0),
                (103.0, 104.0, 102.5, 103.5),
            ],
            1.0,
        );
        let source = signal_at(1, long_signal(100.0, 98.0, &[103.0, 110.0]));
        let mut engine = BacktestEngine::new(&config, source, NotificationHandle::disabled()).unwrap();

        let result = engine.run(&data).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].quantity, 50.0);
        assert!(engine.position().is_flat());
    }

    // ==================== Short side ====================

    #[test]
    fn test_short_take_profit_and_stop() {
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 100.5, 99.0, 100.0),
                (97.5, 97.8, 96.0, 97.0),
                (97.0, 100.0, 96.5, 99.0),
            ],
            1.0,
        );
        let signal = TradeSignal {
            side: Some(Side::Short),
            entry_price: 100.0,
            stop_loss: 102.0,
            take_profit_levels: vec![97.0],
            adx_at_entry: Some(35.0),
        };
        let mut engine = engine(signal_at(1, signal));

        let result = engine.run(&data).unwrap();

        assert_eq!(result.trades[0].reason, ExitReason::TakeProfit(1));
        assert_eq!(result.trades[0].pnl, 75.0);
        // Lowest low 96 + 2 = 98, bar 3 high 100 stops out the rest
        assert_eq!(result.trades[1].reason, ExitReason::StopLoss);
        assert_eq!(result.trades[1].exit_price, 98.0);
        assert_eq!(result.trades[1].pnl, 50.0);
        assert_equity_invariant(&result, 10_000.0);
    }

    // ==================== Sizing ====================

    #[test]
    fn test_zero_volatility_skips_entry() {
        let mut engine = engine(signal_at(1, long_signal(100.0, 98.0, &[103.0])));
        let data = series(&[(100.0, 101.0, 99.0, 100.0); 3], 0.0);

        let result = engine.run(&data).unwrap();
        assert!(result.trades.is_empty());
    }

    #[test]
    fn test_sizing_uses_previous_bar_equity() {
        let mut source = MockSignalSource::new();
        source.expect_evaluate().returning(|window| match window.len() {
            2 | 4 => long_signal(100.0, 98.0, &[200.0]),
            _ => TradeSignal::none(),
        });

        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (100.0, 101.0, 99.0, 99.5),
                (100.0, 101.0, 99.5, 100.0),
                (100.0, 101.0, 99.5, 100.0),
            ],
            1.0,
        );
        let mut engine = engine(source);
        let result = engine.run(&data).unwrap();

        // First trade loses 50; the second entry sizes off 9950
        assert_eq!(result.trades[0].pnl, -50.0);
        assert_eq!(result.trades[1].quantity, 49.75);
        assert_eq!(result.trades[1].reason, ExitReason::EndOfData);
    }

    // ==================== End of data ====================

    #[test]
    fn test_eod_close_at_last_close() {
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (100.0, 102.0, 100.2, 101.5),
            ],
            1.0,
        );
        let mut engine = engine(signal_at(1, long_signal(100.0, 98.0, &[110.0])));

        let result = engine.run(&data).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.reason, ExitReason::EndOfData);
        assert_eq!(trade.exit_price, 101.5);
        assert_eq!(trade.pnl, 75.0);
        assert_eq!(*result.equity_values().last().unwrap(), 10_075.0);
        assert_eq!(
            result.report.final_equity,
            10_000.0 + result.trades.iter().map(|t| t.pnl).sum::<f64>()
        );
    }

    #[test]
    fn test_at_most_one_position() {
        let mut source = MockSignalSource::new();
        source
            .expect_evaluate()
            .returning(|_| long_signal(100.0, 98.0, &[200.0]));

        let data = series(&[(100.0, 101.0, 99.5, 100.0); 6], 1.0);
        let mut engine = engine(source);
        let result = engine.run(&data).unwrap();

        // Signal fires every bar but only the first entry is taken
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].reason, ExitReason::EndOfData);
        assert_eq!(result.trades[0].entry_timestamp, data[1].timestamp);
    }

    // ==================== Export ====================

    #[test]
    fn test_csv_export() {
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (100.0, 102.0, 100.2, 101.5),
            ],
            1.0,
        );
        let mut engine = engine(signal_at(1, long_signal(100.0, 98.0, &[110.0])));
        let result = engine.run(&data).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let trades_path = dir.path().join("trades.csv");
        let equity_path = dir.path().join("equity.csv");
        result.trades_to_csv(&trades_path).unwrap();
        result.equity_to_csv(&equity_path).unwrap();

        let trades = std::fs::read_to_string(&trades_path).unwrap();
        assert!(trades.starts_with("entry_timestamp,exit_timestamp,side"));
        assert!(trades.contains(",long,"));
        assert!(trades.contains("EOD"));

        let equity = std::fs::read_to_string(&equity_path).unwrap();
        assert_eq!(equity.lines().count(), 4);
        assert!(result.summary().contains("Bars: 3"));
    }

    // ==================== Notifications ====================

    #[tokio::test]
    async fn test_notifications_emitted_for_entry_and_exit() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|m| m.starts_with("Entered long"))
            .times(1)
            .returning(|_| Ok(()));
        notifier
            .expect_send()
            .withf(|m| m.contains("closed by SL"))
            .times(1)
            .returning(|_| {
                Err(crate::error::NotifyError::Rejected {
                    status: 502,
                    body: String::new(),
                })
            });

        let (handle, task) = spawn_dispatcher(Arc::new(notifier));
        let data = series(
            &[
                (100.0, 101.0, 99.0, 100.0),
                (100.0, 101.0, 99.5, 100.0),
                (100.0, 101.0, 99.0, 99.5),
            ],
            1.0,
        );
        let mut engine =
            BacktestEngine::new(&test_config(), signal_at(1, long_signal(100.0, 98.0, &[110.0])), handle)
                .unwrap();

        // A failed delivery does not affect the run
        let result = engine.run(&data).unwrap();
        assert_eq!(result.trades.len(), 1);

        drop(engine);
        let stats = task.await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_entry_notification_reports_adx() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|m| m.starts_with("Entered short") && m.ends_with(", ADX 35.0"))
            .times(1)
            .returning(|_| Ok(()));
        notifier
            .expect_send()
            .withf(|m| m.starts_with("Position closed at EOD"))
            .times(1)
            .returning(|_| Ok(()));

        let (handle, task) = spawn_dispatcher(Arc::new(notifier));
        let data = series(&[(100.0, 100.5, 99.5, 100.0); 3], 1.0);
        let signal = TradeSignal {
            side: Some(Side::Short),
            entry_price: 100.0,
            stop_loss: 102.0,
            take_profit_levels: vec![97.0],
            adx_at_entry: Some(35.0),
        };
        let mut engine =
            BacktestEngine::new(&test_config(), signal_at(1, signal), handle).unwrap();

        let result = engine.run(&data).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].reason, ExitReason::EndOfData);

        drop(engine);
        assert_eq!(task.await.unwrap().delivered, 2);
    }
}
