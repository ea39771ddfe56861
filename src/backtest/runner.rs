//! Parameter sweep runner for backtesting optimization.
//!
//! Each combination gets its own `Config`, indicator pass and engine, so
//! runs share nothing mutable and can execute in parallel.

use crate::backtest::{BacktestEngine, PerformanceReport};
use crate::config::Config;
use crate::data::BarSeries;
use crate::indicators::IndicatorCalculator;
use crate::notify::NotificationHandle;
use crate::strategy::HeikinAshiTrend;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Defines the parameter space to explore during optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpace {
    // Strategy parameters
    pub sma_length: Vec<usize>,
    pub adx_threshold: Vec<f64>,
    pub atr_length: Vec<usize>,

    // Risk parameters
    pub risk_per_trade: Vec<f64>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            sma_length: vec![40, 50, 60],
            adx_threshold: vec![20.0, 25.0, 30.0],
            atr_length: vec![14],
            risk_per_trade: vec![1.0],
        }
    }
}

impl ParameterSpace {
    /// Create a minimal parameter space for quick testing.
    pub fn minimal() -> Self {
        Self {
            sma_length: vec![50],
            adx_threshold: vec![25.0],
            atr_length: vec![14],
            risk_per_trade: vec![1.0],
        }
    }

    /// Count total number of combinations.
    pub fn combination_count(&self) -> usize {
        self.sma_length.len()
            * self.adx_threshold.len()
            * self.atr_length.len()
            * self.risk_per_trade.len()
    }

    /// Generate all config combinations, each an independent copy of `base_config`.
    pub fn generate_configs(&self, base_config: &Config) -> Vec<Config> {
        let mut configs = Vec::with_capacity(self.combination_count());

        for &sma_length in &self.sma_length {
            for &adx_threshold in &self.adx_threshold {
                for &atr_length in &self.atr_length {
                    for &risk_per_trade in &self.risk_per_trade {
                        let mut config = base_config.clone();

                        config.strategy.sma_length = sma_length;
                        config.strategy.adx_threshold = adx_threshold;
                        config.strategy.atr_length = atr_length;
                        config.trading.risk_per_trade = risk_per_trade;

                        configs.push(config);
                    }
                }
            }
        }

        configs
    }

    /// Describe a config's parameter values.
    pub fn describe(config: &Config) -> String {
        SweepParams::from(config).to_string()
    }
}

/// The swept values of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepParams {
    pub sma_length: usize,
    pub adx_threshold: f64,
    pub atr_length: usize,
    pub risk_per_trade: f64,
}

impl From<&Config> for SweepParams {
    fn from(config: &Config) -> Self {
        Self {
            sma_length: config.strategy.sma_length,
            adx_threshold: config.strategy.adx_threshold,
            atr_length: config.strategy.atr_length,
            risk_per_trade: config.trading.risk_per_trade,
        }
    }
}

impl std::fmt::Display for SweepParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sma={} adx>{} atr={} risk={}%",
            self.sma_length, self.adx_threshold, self.atr_length, self.risk_per_trade
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRun {
    pub params: SweepParams,
    pub report: PerformanceReport,
}

/// Flat CSV row of a sweep run.
#[derive(Serialize)]
struct SweepRow {
    sma_length: usize,
    adx_threshold: f64,
    atr_length: usize,
    risk_per_trade: f64,
    total_pnl: f64,
    final_equity: f64,
    num_trades: usize,
    win_rate: Option<f64>,
    profit_factor: Option<f64>,
    max_drawdown: f64,
    sharpe_ratio: f64,
    sortino_ratio: f64,
    calmar_ratio: f64,
}

impl From<&SweepRun> for SweepRow {
    fn from(run: &SweepRun) -> Self {
        let r = &run.report;
        Self {
            sma_length: run.params.sma_length,
            adx_threshold: run.params.adx_threshold,
            atr_length: run.params.atr_length,
            risk_per_trade: run.params.risk_per_trade,
            total_pnl: r.total_pnl,
            final_equity: r.final_equity,
            num_trades: r.num_trades,
            win_rate: r.win_rate,
            profit_factor: r.profit_factor,
            max_drawdown: r.max_drawdown,
            sharpe_ratio: r.sharpe_ratio,
            sortino_ratio: r.sortino_ratio,
            calmar_ratio: r.calmar_ratio,
        }
    }
}

/// Results from a parameter sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepResults {
    /// Completed runs in combination order
    pub runs: Vec<SweepRun>,

    /// Best run by total PnL
    pub best_by_pnl: Option<usize>,

    /// Best run by Sharpe ratio
    pub best_by_sharpe: Option<usize>,

    /// Best run by Calmar ratio (return/drawdown)
    pub best_by_calmar: Option<usize>,

    /// Total combinations in the parameter space
    pub total_combinations: usize,

    /// Combinations with no usable bars or a failed run
    pub skipped: usize,

    /// Combinations not started because the sweep was cancelled
    pub cancelled: usize,
}

impl SweepResults {
    fn from_runs(runs: Vec<SweepRun>, total_combinations: usize, skipped: usize, cancelled: usize) -> Self {
        let best_by = |key: fn(&PerformanceReport) -> f64| {
            runs.iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    key(&a.report)
                        .partial_cmp(&key(&b.report))
                        .unwrap_or(Ordering::Equal)
                })
                .map(|(i, _)| i)
        };

        let best_by_pnl = best_by(|r| r.total_pnl);
        let best_by_sharpe = best_by(|r| r.sharpe_ratio);
        let best_by_calmar = best_by(|r| r.calmar_ratio);

        Self {
            runs,
            best_by_pnl,
            best_by_sharpe,
            best_by_calmar,
            total_combinations,
            skipped,
            cancelled,
        }
    }

    pub fn best_pnl(&self) -> Option<&SweepRun> {
        self.best_by_pnl.and_then(|i| self.runs.get(i))
    }

    pub fn best_sharpe(&self) -> Option<&SweepRun> {
        self.best_by_sharpe.and_then(|i| self.runs.get(i))
    }

    pub fn best_calmar(&self) -> Option<&SweepRun> {
        self.best_by_calmar.and_then(|i| self.runs.get(i))
    }

    /// Export results to CSV.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        for run in &self.runs {
            wtr.serialize(SweepRow::from(run))?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// Generate a summary comparison table.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str("PARAMETER SWEEP RESULTS\n");
        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str(&format!(
            "Total: {} | Completed: {} | Skipped: {} | Cancelled: {}\n\n",
            self.total_combinations,
            self.runs.len(),
            self.skipped,
            self.cancelled
        ));

        let sections = [
            ("BEST BY TOTAL PNL", self.best_pnl()),
            ("BEST BY SHARPE RATIO", self.best_sharpe()),
            ("BEST BY CALMAR RATIO", self.best_calmar()),
        ];

        for (title, run) in sections {
            if let Some(run) = run {
                s.push_str(&format!("{}:\n", title));
                s.push_str(&format!("  Params: {}\n", run.params));
                s.push_str(&format!(
                    "  PnL: ${:.2} | Sharpe: {:.3} | Calmar: {:.3} | MaxDD: {:.2}% | Trades: {}\n\n",
                    run.report.total_pnl,
                    run.report.sharpe_ratio,
                    run.report.calmar_ratio,
                    run.report.max_drawdown * 100.0,
                    run.report.num_trades
                ));
            }
        }

        s.push_str("═══════════════════════════════════════════════════════════════\n");

        s
    }
}

enum Outcome {
    Completed(SweepRun),
    Skipped,
    Cancelled,
}

/// Parameter sweep runner for parallel backtesting.
pub struct SweepRunner {
    parameter_space: ParameterSpace,
    base_config: Config,
    parallelism: usize,
}

impl SweepRunner {
    /// Create a new sweep runner.
    pub fn new(parameter_space: ParameterSpace, base_config: Config, parallelism: usize) -> Self {
        Self {
            parameter_space,
            base_config,
            parallelism: parallelism.max(1),
        }
    }

    /// Run the parameter sweep over a raw OHLCV series (indicators are
    /// recomputed per combination). Setting `cancel` stops new
    /// combinations from starting; runs already in flight finish.
    pub async fn run(&self, raw_series: BarSeries, cancel: Arc<AtomicBool>) -> Result<SweepResults> {
        let configs = self.parameter_space.generate_configs(&self.base_config);
        let total_combinations = configs.len();

        info!(
            "Starting parameter sweep with {} combinations, parallelism={}",
            total_combinations, self.parallelism
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let raw_series = Arc::new(raw_series);

        let mut handles = Vec::with_capacity(configs.len());

        for (i, config) in configs.into_iter().enumerate() {
            let sem = semaphore.clone();
            let series = raw_series.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Outcome::Cancelled;
                };
                if cancel.load(AtomicOrdering::SeqCst) {
                    return Outcome::Cancelled;
                }

                let params = SweepParams::from(&config);
                info!("[{}/{}] Testing: {}", i + 1, total_combinations, params);

                let result = tokio::task::spawn_blocking(move || run_combination(&config, &series)).await;

                match result {
                    Ok(Ok(Some(report))) => {
                        info!(
                            "[{}/{}] Complete: PnL=${:.2} Sharpe={:.3} Trades={}",
                            i + 1,
                            total_combinations,
                            report.total_pnl,
                            report.sharpe_ratio,
                            report.num_trades
                        );
                        Outcome::Completed(SweepRun { params, report })
                    }
                    Ok(Ok(None)) => {
                        warn!(
                            "[{}/{}] Skipped {}: no bars left after indicator warm-up",
                            i + 1,
                            total_combinations,
                            params
                        );
                        Outcome::Skipped
                    }
                    Ok(Err(e)) => {
                        warn!("[{}/{}] Failed: {}", i + 1, total_combinations, e);
                        Outcome::Skipped
                    }
                    Err(e) => {
                        warn!("[{}/{}] Task panicked: {}", i + 1, total_combinations, e);
                        Outcome::Skipped
                    }
                }
            });

            handles.push(handle);
        }

        let mut runs = Vec::new();
        let mut skipped = 0;
        let mut cancelled = 0;

        for outcome in futures_util::future::join_all(handles).await {
            match outcome.context("Sweep task failed")? {
                Outcome::Completed(run) => runs.push(run),
                Outcome::Skipped => skipped += 1,
                Outcome::Cancelled => cancelled += 1,
            }
        }

        if cancelled > 0 {
            warn!("Sweep cancelled, {} combinations not run", cancelled);
        }

        Ok(SweepResults::from_runs(runs, total_combinations, skipped, cancelled))
    }
}

/// One independent backtest. `None` when warm-up consumes the whole series.
fn run_combination(
    config: &Config,
    raw_series: &BarSeries,
) -> std::result::Result<Option<PerformanceReport>, crate::error::BacktestError> {
    let series = IndicatorCalculator::new(&config.strategy).add_all(raw_series);
    if series.is_empty() {
        return Ok(None);
    }

    let strategy = HeikinAshiTrend::new(&config.strategy);
    let mut engine = BacktestEngine::new(config, strategy, NotificationHandle::disabled())?;
    let result = engine.run(&series)?;

    Ok(Some(result.report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::bar;
    use crate::data::Bar;

    fn raw_series(n: i64) -> BarSeries {
        let bars: Vec<Bar> = (0..n)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1;
                bar(i, base, base + 1.5, base - 1.5, base + 0.5)
            })
            .collect();
        BarSeries::new(bars)
    }

    fn small_space() -> ParameterSpace {
        ParameterSpace {
            sma_length: vec![5, 10],
            adx_threshold: vec![20.0],
            atr_length: vec![5],
            risk_per_trade: vec![1.0],
        }
    }

    #[test]
    fn test_parameter_space_count() {
        let space = ParameterSpace::default();

        // 3 * 3 * 1 * 1
        assert_eq!(space.combination_count(), 9);
        assert_eq!(space.generate_configs(&Config::default()).len(), 9);
    }

    #[test]
    fn test_minimal_space() {
        let space = ParameterSpace::minimal();
        assert_eq!(space.combination_count(), 1);
    }

    #[test]
    fn test_generate_configs_are_independent() {
        let base = Config::default();
        let configs = small_space().generate_configs(&base);

        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].strategy.sma_length, 5);
        assert_eq!(configs[1].strategy.sma_length, 10);
        assert_eq!(configs[0].strategy.atr_length, 5);
        // The base is never touched
        assert_eq!(base.strategy.sma_length, 50);
    }

    #[test]
    fn test_describe() {
        let desc = ParameterSpace::describe(&Config::default());
        assert!(desc.contains("sma=50"));
        assert!(desc.contains("adx>25"));
        assert!(desc.contains("risk=1%"));
    }

    #[tokio::test]
    async fn test_sweep_runs_every_combination() {
        let runner = SweepRunner::new(small_space(), Config::default(), 2);
        let results = runner
            .run(raw_series(120), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(results.total_combinations, 2);
        assert_eq!(results.runs.len(), 2);
        assert_eq!(results.runs[0].params.sma_length, 5);
        assert!(results.best_pnl().is_some());
        assert!(results.summary().contains("Completed: 2"));
    }

    #[tokio::test]
    async fn test_sweep_skips_when_warmup_eats_series() {
        let runner = SweepRunner::new(ParameterSpace::minimal(), Config::default(), 1);
        let results = runner
            .run(raw_series(20), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert!(results.runs.is_empty());
        assert_eq!(results.skipped, 1);
        assert_eq!(results.best_by_pnl, None);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_starts_nothing() {
        let runner = SweepRunner::new(small_space(), Config::default(), 1);
        let results = runner
            .run(raw_series(120), Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();

        assert!(results.runs.is_empty());
        assert_eq!(results.cancelled, 2);
    }

    #[tokio::test]
    async fn test_sweep_csv_export() {
        let runner = SweepRunner::new(small_space(), Config::default(), 2);
        let results = runner
            .run(raw_series(120), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        results.to_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines
            .next()
            .unwrap()
            .starts_with("sma_length,adx_threshold,atr_length,risk_per_trade,total_pnl"));
        assert_eq!(lines.count(), 2);
    }
}
