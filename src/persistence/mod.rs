//! SQLite persistence for backtest results.
//!
//! Stores every single run and every sweep combination so results can be
//! compared across sessions:
//! - Run metadata, parameters and the performance report (as JSON)
//! - The trade ledger of single runs

use crate::backtest::{
    BacktestResult, ExitReason, PerformanceReport, SweepParams, SweepResults, Trade,
};
use crate::config::Config;
use crate::strategy::Side;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info};

/// A stored run as listed by [`ResultsStore::recent_runs`].
#[derive(Debug, Clone)]
pub struct StoredRun {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// "backtest" or "sweep"
    pub kind: String,
    pub symbol: String,
    pub timeframe: String,
    pub params: serde_json::Value,
    pub report: PerformanceReport,
}

/// SQLite-based results store.
pub struct ResultsStore {
    conn: Connection,
}

impl ResultsStore {
    /// Open (or create) the store. `":memory:"` gives a throwaway database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Results store initialized at {:?}", path);
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS backtest_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                params TEXT NOT NULL,
                report TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_created ON backtest_runs(created_at);

            CREATE TABLE IF NOT EXISTS run_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES backtest_runs(id),
                entry_timestamp TEXT NOT NULL,
                exit_timestamp TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                quantity REAL NOT NULL,
                pnl REAL NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_run ON run_trades(run_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Record a single run with its trade ledger. Returns the run id.
    pub fn record_run(
        &self,
        symbol: &str,
        timeframe: &str,
        config: &Config,
        result: &BacktestResult,
    ) -> Result<i64> {
        // Credentials never reach the database
        let mut stored_config = config.clone();
        stored_config.telegram = Default::default();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO backtest_runs (created_at, kind, symbol, timeframe, params, report)
            VALUES (?1, 'backtest', ?2, ?3, ?4, ?5)
            "#,
            params![
                Utc::now().to_rfc3339(),
                symbol,
                timeframe,
                serde_json::to_string(&stored_config)?,
                serde_json::to_string(&result.report)?,
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        for trade in &result.trades {
            tx.execute(
                r#"
                INSERT INTO run_trades (run_id, entry_timestamp, exit_timestamp, side,
                                        entry_price, exit_price, quantity, pnl, reason)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    run_id,
                    trade.entry_timestamp.to_rfc3339(),
                    trade.exit_timestamp.to_rfc3339(),
                    trade.side.to_string(),
                    trade.entry_price,
                    trade.exit_price,
                    trade.quantity,
                    trade.pnl,
                    trade.reason.to_string(),
                ],
            )?;
        }

        tx.commit()?;
        debug!("Recorded run {} with {} trades", run_id, result.trades.len());
        Ok(run_id)
    }

    /// Record every completed sweep combination. Returns the number stored.
    pub fn record_sweep(&self, symbol: &str, timeframe: &str, results: &SweepResults) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let created_at = Utc::now().to_rfc3339();

        for run in &results.runs {
            tx.execute(
                r#"
                INSERT INTO backtest_runs (created_at, kind, symbol, timeframe, params, report)
                VALUES (?1, 'sweep', ?2, ?3, ?4, ?5)
                "#,
                params![
                    created_at,
                    symbol,
                    timeframe,
                    serde_json::to_string(&run.params)?,
                    serde_json::to_string(&run.report)?,
                ],
            )?;
        }

        tx.commit()?;
        debug!("Recorded {} sweep runs", results.runs.len());
        Ok(results.runs.len())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<StoredRun>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, kind, symbol, timeframe, params, report
            FROM backtest_runs
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let runs = stmt
            .query_map([limit], |row| {
                let created_at: String = row.get(1)?;
                let params: String = row.get(5)?;
                let report: String = row.get(6)?;
                Ok(StoredRun {
                    id: row.get(0)?,
                    created_at: parse_column(1, &created_at, parse_timestamp)?,
                    kind: row.get(2)?,
                    symbol: row.get(3)?,
                    timeframe: row.get(4)?,
                    params: parse_column(5, &params, |s| serde_json::from_str(s))?,
                    report: parse_column(6, &report, |s| serde_json::from_str(s))?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read stored runs")?;

        Ok(runs)
    }

    /// Trade ledger of a stored single run, in exit order.
    pub fn trades_for_run(&self, run_id: i64) -> Result<Vec<Trade>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT entry_timestamp, exit_timestamp, side, entry_price, exit_price,
                   quantity, pnl, reason
            FROM run_trades
            WHERE run_id = ?1
            ORDER BY id
            "#,
        )?;

        let trades = stmt
            .query_map([run_id], |row| {
                let entry: String = row.get(0)?;
                let exit: String = row.get(1)?;
                let side: String = row.get(2)?;
                let reason: String = row.get(7)?;
                Ok(Trade {
                    entry_timestamp: parse_column(0, &entry, parse_timestamp)?,
                    exit_timestamp: parse_column(1, &exit, parse_timestamp)?,
                    side: parse_column(2, &side, |s| s.parse::<Side>())?,
                    entry_price: row.get(3)?,
                    exit_price: row.get(4)?,
                    quantity: row.get(5)?,
                    pnl: row.get(6)?,
                    reason: parse_column(7, &reason, |s| s.parse::<ExitReason>())?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read trades of run {}", run_id))?;

        Ok(trades)
    }

    /// Parameters of the best stored sweep run by total PnL.
    pub fn best_sweep_params(&self) -> Result<Option<SweepParams>> {
        let mut stmt = self
            .conn
            .prepare("SELECT params, report FROM backtest_runs WHERE kind = 'sweep'")?;

        let candidates = stmt
            .query_map([], |row| {
                let params: String = row.get(0)?;
                let report: String = row.get(1)?;
                let params: SweepParams = parse_column(0, &params, |s| serde_json::from_str(s))?;
                let report: PerformanceReport =
                    parse_column(1, &report, |s| serde_json::from_str(s))?;
                Ok((params, report.total_pnl))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read sweep runs")?;

        Ok(candidates
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(params, _)| params))
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Map a text column through `parse`, reporting failures as conversion errors.
fn parse_column<T, E, F>(idx: usize, raw: &str, parse: F) -> rusqlite::Result<T>
where
    F: FnOnce(&str) -> std::result::Result<T, E>,
    E: std::fmt::Display,
{
    parse(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
    })
}
