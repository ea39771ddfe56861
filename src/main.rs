//! HA Trend Backtester - Main Entry Point
//!
//! Backtests, parameter sweeps, market data download and stored result
//! listing for the Heikin-Ashi trend strategy.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ha_trend_backtester::backtest::{BacktestEngine, ParameterSpace, SweepRunner};
use ha_trend_backtester::config::Config;
use ha_trend_backtester::data::{
    clean, write_csv, BarSeries, BinanceKlines, CsvBarLoader, FallbackProvider, OhlcvProvider,
    RetryingProvider, YahooChart,
};
use ha_trend_backtester::indicators::IndicatorCalculator;
use ha_trend_backtester::notify::{notifier_from_config, spawn_dispatcher};
use ha_trend_backtester::persistence::ResultsStore;
use ha_trend_backtester::strategy::HeikinAshiTrend;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const FETCH_ATTEMPTS: u32 = 3;
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// HA Trend Backtester CLI
#[derive(Parser)]
#[command(name = "ha-trend-backtester")]
#[command(version, about = "Heikin-Ashi trend strategy backtester")]
struct Cli {
    /// Configuration file (defaults to ./config.* when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest on historical data
    Backtest {
        /// Path to CSV data file (defaults to data.csv_path)
        #[arg(short, long)]
        data: Option<String>,

        /// Override the configured initial equity
        #[arg(short = 'e', long)]
        initial_equity: Option<f64>,

        /// Output directory for equity curve and trade CSVs
        #[arg(short, long)]
        output: Option<String>,

        /// Path to the SQLite results database (defaults to data.results_db)
        #[arg(long)]
        db: Option<String>,
    },

    /// Run a parameter sweep optimization
    Optimize {
        /// Path to CSV data file (defaults to data.csv_path)
        #[arg(short, long)]
        data: Option<String>,

        /// Use minimal parameter space (faster, for testing)
        #[arg(long)]
        minimal: bool,

        /// Number of parallel backtests
        #[arg(short, long, default_value = "4")]
        parallelism: usize,

        /// Output directory for sweep results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Download recent OHLCV bars for the configured symbol
    Fetch {
        /// Destination CSV file (defaults to data.csv_path)
        #[arg(short, long)]
        output: Option<String>,

        /// Number of bars to request (defaults to data.fetch_limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List stored runs from the results database
    Results {
        /// Path to the SQLite results database (defaults to data.results_db)
        #[arg(long)]
        db: Option<String>,

        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Backtest {
            data,
            initial_equity,
            output,
            db,
        } => run_backtest(config, data, initial_equity, output, db).await,
        Commands::Optimize {
            data,
            minimal,
            parallelism,
            output,
        } => run_optimize(config, data, minimal, parallelism, output).await,
        Commands::Fetch { output, limit } => run_fetch(&config, output, limit).await,
        Commands::Results { db, limit } => show_results(&config, db, limit),
    }
}

/// Run a single backtest and persist its results.
async fn run_backtest(
    mut config: Config,
    data_path: Option<String>,
    initial_equity: Option<f64>,
    output_dir: Option<String>,
    db_path: Option<String>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    if let Some(equity) = initial_equity {
        config.backtest.initial_equity = equity;
    }
    config.validate()?;

    let data_path = data_path.unwrap_or_else(|| config.data.csv_path.clone());
    info!("📊 Loading data from: {}", data_path);
    let raw = CsvBarLoader::load(&data_path)?;
    log_range(&raw);

    let series = IndicatorCalculator::new(&config.strategy).add_all(&raw);
    info!("   Bars after indicator warm-up: {}", series.len());
    info!("💰 Initial equity: ${:.2}", config.backtest.initial_equity);

    let notifier = notifier_from_config(&config.telegram);
    let (notifications, dispatcher) = spawn_dispatcher(notifier);

    let strategy = HeikinAshiTrend::new(&config.strategy);
    let mut engine = BacktestEngine::new(&config, strategy, notifications)?;
    let result = engine.run(&series)?;
    drop(engine);

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir))?;

        let equity_path = format!("{}/equity_curve.csv", dir);
        result.equity_to_csv(&equity_path)?;
        info!("📁 Equity curve saved to: {}", equity_path);

        let trades_path = format!("{}/trades.csv", dir);
        result.trades_to_csv(&trades_path)?;
        info!("📁 Trades saved to: {}", trades_path);
    }

    let db_path = db_path.unwrap_or_else(|| config.data.results_db.clone());
    let store = ResultsStore::new(&db_path)?;
    let run_id = store.record_run(
        &config.trading.symbol,
        &config.trading.timeframe,
        &config,
        &result,
    )?;
    info!("💾 Run stored as #{} in {}", run_id, db_path);

    match dispatcher.await {
        Ok(stats) => info!(
            "Notifications delivered: {}, failed: {}",
            stats.delivered, stats.failed
        ),
        Err(e) => warn!("Notification dispatcher panicked: {}", e),
    }

    Ok(())
}

/// Run a parameter sweep over the configured grid.
async fn run_optimize(
    config: Config,
    data_path: Option<String>,
    minimal: bool,
    parallelism: usize,
    output_dir: Option<String>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║           PARAMETER SWEEP MODE                             ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let data_path = data_path.unwrap_or_else(|| config.data.csv_path.clone());
    info!("📊 Loading data from: {}", data_path);
    let raw = CsvBarLoader::load(&data_path)?;
    log_range(&raw);

    let param_space = if minimal {
        info!("🔧 Using minimal parameter space (quick test)");
        ParameterSpace::minimal()
    } else {
        info!("🔧 Using full parameter space");
        ParameterSpace::default()
    };

    info!("   Combinations to test: {}", param_space.combination_count());
    info!("💰 Initial equity: ${:.2}", config.backtest.initial_equity);
    info!("⚡ Parallelism: {}", parallelism);

    // Ctrl-C stops scheduling new combinations; running ones finish
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling remaining combinations");
            cancel_on_signal.store(true, Ordering::SeqCst);
        }
    });

    let symbol = config.trading.symbol.clone();
    let timeframe = config.trading.timeframe.clone();
    let results_db = config.data.results_db.clone();

    let runner = SweepRunner::new(param_space, config, parallelism);
    let results = runner.run(raw, cancel).await?;

    println!("\n{}", results.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir))?;

        let results_path = format!("{}/sweep_results.csv", dir);
        results.to_csv(&results_path)?;
        info!("📁 Sweep results saved to: {}", results_path);
    }

    let store = ResultsStore::new(&results_db)?;
    let stored = store.record_sweep(&symbol, &timeframe, &results)?;
    info!("💾 {} sweep runs stored in {}", stored, results_db);

    Ok(())
}

/// Download bars for the configured symbol and write them to CSV.
async fn run_fetch(config: &Config, output: Option<String>, limit: Option<usize>) -> Result<()> {
    let output = output.unwrap_or_else(|| config.data.csv_path.clone());
    let limit = limit.unwrap_or(config.data.fetch_limit);

    if !config.trading.exchange.eq_ignore_ascii_case("binance") {
        warn!(
            "Exchange '{}' has no dedicated provider, using Binance klines and Yahoo Finance",
            config.trading.exchange
        );
    }

    let provider = FallbackProvider::new()
        .with(RetryingProvider::new(
            BinanceKlines::new()?,
            FETCH_ATTEMPTS,
            FETCH_RETRY_DELAY,
        ))
        .with(YahooChart::new()?);

    let bars = provider
        .fetch(&config.trading.symbol, &config.trading.timeframe, limit)
        .await?;
    let series = BarSeries::new(clean(bars));

    if let Some(parent) = Path::new(&output)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    write_csv(&series, &output)?;
    info!("📁 {} bars saved to: {}", series.len(), output);
    log_range(&series);

    Ok(())
}

/// Print the most recent stored runs.
fn show_results(config: &Config, db_path: Option<String>, limit: usize) -> Result<()> {
    let db_path = db_path.unwrap_or_else(|| config.data.results_db.clone());

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              STORED RESULTS                                ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(&db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   Run a backtest or an optimization first.");
        return Ok(());
    }

    let store = ResultsStore::new(&db_path)?;
    let runs = store.recent_runs(limit)?;

    if runs.is_empty() {
        println!("\n❌ No runs stored yet.");
        return Ok(());
    }

    println!(
        "\n{:>5}  {:<20}  {:<8}  {:<10}  {:>6}  {:>12}  {:>8}  {:>8}",
        "ID", "Created", "Kind", "Symbol", "Trades", "PnL", "Sharpe", "MaxDD"
    );
    for run in &runs {
        println!(
            "{:>5}  {:<20}  {:<8}  {:<10}  {:>6}  {:>12.2}  {:>8.2}  {:>7.2}%",
            run.id,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.kind,
            run.symbol,
            run.report.num_trades,
            run.report.total_pnl,
            run.report.sharpe_ratio,
            run.report.max_drawdown * 100.0
        );
    }

    if let Some(best) = store.best_sweep_params()? {
        println!("\n🏆 Best stored sweep parameters: {}", best);
    }

    Ok(())
}

fn log_range(series: &BarSeries) {
    if let Some((start, end)) = series.range() {
        info!(
            "   Data range: {} to {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
    }
}

/// Initialize logging to stdout and an hourly rolling file under `logs/`.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "ha-trend-backtester.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ha_trend_backtester=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}
