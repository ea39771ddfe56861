//! Configuration management for the backtester.
//!
//! Loads settings from an optional config file and environment variables.
//! A loaded [`Config`] is treated as an immutable value: parameter sweeps
//! clone and edit a fresh copy per run instead of mutating a shared one.

use crate::error::BacktestError;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Market and risk settings
    #[serde(default)]
    pub trading: TradingConfig,
    /// Indicator lengths and signal thresholds
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Simulation constants
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Telegram credentials (notifications disabled when absent)
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Data and result locations
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingConfig {
    /// Trading symbol, e.g. "BTC/USDT"
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Bar interval, e.g. "1h"
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Exchange identifier used by the market data provider
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Percentage of equity risked per trade (1.0 = 1%)
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    #[serde(default = "default_sma_length")]
    pub sma_length: usize,
    #[serde(default = "default_volume_sma_length")]
    pub volume_sma_length: usize,
    /// Volume must exceed `volume_multiplier * VOL_SMA` to confirm a signal
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,
    #[serde(default = "default_adx_length")]
    pub adx_length: usize,
    /// Minimum ADX for a trend to count as strong
    #[serde(default = "default_adx_threshold")]
    pub adx_threshold: f64,
    #[serde(default = "default_atr_length")]
    pub atr_length: usize,
    #[serde(default = "default_rsi_length")]
    pub rsi_length: usize,
    /// ATR multipliers for the take-profit ladder, in priority order.
    /// Accepts a list or a comma-separated string ("2.0,3.0").
    #[serde(
        default = "default_take_profit_levels",
        deserialize_with = "deserialize_levels"
    )]
    pub take_profit_levels: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestConfig {
    /// Starting account equity
    #[serde(default = "default_initial_equity")]
    pub initial_equity: f64,
    /// Fraction of the remaining quantity closed at each take-profit level
    #[serde(default = "default_partial_close_fraction")]
    pub partial_close_fraction: f64,
    /// Trailing stop distance in multiples of the bar's ATR
    #[serde(default = "default_trailing_atr_multiplier")]
    pub trailing_atr_multiplier: f64,
    /// Quantity at or below which a position counts as closed
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Annualization factor applied to per-bar returns, whatever the bar interval
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataConfig {
    /// Default OHLCV CSV file
    #[serde(default = "default_csv_path")]
    pub csv_path: String,
    /// SQLite database holding run results
    #[serde(default = "default_results_db")]
    pub results_db: String,
    /// Directory for CSV exports
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Number of bars requested when fetching market data
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

// Default value functions
fn default_symbol() -> String {
    "BTC/USDT".to_string()
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_exchange() -> String {
    "binance".to_string()
}

fn default_risk_per_trade() -> f64 {
    1.0
}

fn default_sma_length() -> usize {
    50
}

fn default_volume_sma_length() -> usize {
    20
}

fn default_volume_multiplier() -> f64 {
    1.5
}

fn default_adx_length() -> usize {
    14
}

fn default_adx_threshold() -> f64 {
    25.0
}

fn default_atr_length() -> usize {
    14
}

fn default_rsi_length() -> usize {
    14
}

fn default_take_profit_levels() -> Vec<f64> {
    vec![2.0, 3.0]
}

fn default_initial_equity() -> f64 {
    10_000.0
}

fn default_partial_close_fraction() -> f64 {
    0.5
}

fn default_trailing_atr_multiplier() -> f64 {
    2.0
}

fn default_epsilon() -> f64 {
    1e-6
}

fn default_periods_per_year() -> f64 {
    252.0
}

fn default_csv_path() -> String {
    "data/ohlcv.csv".to_string()
}

fn default_results_db() -> String {
    "results/results.db".to_string()
}

fn default_results_dir() -> String {
    "results".to_string()
}

fn default_fetch_limit() -> usize {
    1000
}

fn deserialize_levels<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Levels {
        List(Vec<f64>),
        Text(String),
    }

    match Levels::deserialize(deserializer)? {
        Levels::List(levels) => Ok(levels),
        Levels::Text(text) => parse_levels(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse a comma-separated list of take-profit multipliers.
pub fn parse_levels(text: &str) -> std::result::Result<Vec<f64>, String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|e| format!("invalid take-profit level '{}': {}", s, e))
        })
        .collect()
}

impl StrategyConfig {
    /// Name of the ATR column the engine reads as its volatility measure.
    pub fn atr_column(&self) -> String {
        format!("ATRr_{}", self.atr_length)
    }

    pub fn sma_column(&self) -> String {
        format!("SMA_{}", self.sma_length)
    }

    pub fn volume_sma_column(&self) -> String {
        format!("VOL_SMA_{}", self.volume_sma_length)
    }

    pub fn rsi_column(&self) -> String {
        format!("RSI_{}", self.rsi_length)
    }

    pub fn adx_column(&self) -> String {
        format!("ADX_{}", self.adx_length)
    }
}

impl TelegramConfig {
    /// Both credentials are present.
    pub fn is_configured(&self) -> bool {
        matches!((&self.bot_token, &self.chat_id), (Some(t), Some(c)) if !t.is_empty() && !c.is_empty())
    }

    /// Fill missing credentials from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`.
    fn fill_from_env(&mut self) {
        if self.bot_token.is_none() {
            self.bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok();
        }
        if self.chat_id.is_none() {
            self.chat_id = std::env::var("TELEGRAM_CHAT_ID").ok();
        }
    }
}

impl Config {
    /// Load configuration from `.env`, an optional `config.*` file and
    /// `HTB__`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false));

        Self::finish(builder)
    }

    /// Load configuration from an explicit file, still honouring the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        anyhow::ensure!(
            path.exists(),
            "Configuration file not found: {}",
            path.display()
        );

        let builder = config::Config::builder().add_source(config::File::from(path));

        Self::finish(builder)
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings = builder
            .add_source(config::Environment::with_prefix("HTB").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.telegram.fill_from_env();
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), BacktestError> {
        fn ensure(ok: bool, msg: &str) -> std::result::Result<(), BacktestError> {
            if ok {
                Ok(())
            } else {
                Err(BacktestError::InvalidConfig(msg.to_string()))
            }
        }

        let equity = self.backtest.initial_equity;
        if equity.is_nan() || equity <= 0.0 {
            return Err(BacktestError::InvalidEquity(equity));
        }

        ensure(
            self.trading.risk_per_trade > 0.0 && self.trading.risk_per_trade <= 100.0,
            "risk_per_trade must be in (0, 100]",
        )?;
        ensure(
            self.backtest.partial_close_fraction > 0.0 && self.backtest.partial_close_fraction <= 1.0,
            "partial_close_fraction must be in (0, 1]",
        )?;
        ensure(
            self.backtest.trailing_atr_multiplier > 0.0,
            "trailing_atr_multiplier must be positive",
        )?;
        ensure(self.backtest.epsilon >= 0.0, "epsilon must not be negative")?;
        ensure(
            self.backtest.periods_per_year > 0.0,
            "periods_per_year must be positive",
        )?;

        let s = &self.strategy;
        ensure(
            [
                s.sma_length,
                s.volume_sma_length,
                s.adx_length,
                s.atr_length,
                s.rsi_length,
            ]
            .iter()
            .all(|&len| len >= 1),
            "indicator lengths must be at least 1",
        )?;
        ensure(
            s.take_profit_levels.iter().all(|&m| m > 0.0),
            "take_profit_levels must be positive multipliers",
        )?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trading: TradingConfig::default(),
            strategy: StrategyConfig::default(),
            backtest: BacktestConfig::default(),
            telegram: TelegramConfig::default(),
            data: DataConfig::default(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            exchange: default_exchange(),
            risk_per_trade: default_risk_per_trade(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            sma_length: default_sma_length(),
            volume_sma_length: default_volume_sma_length(),
            volume_multiplier: default_volume_multiplier(),
            adx_length: default_adx_length(),
            adx_threshold: default_adx_threshold(),
            atr_length: default_atr_length(),
            rsi_length: default_rsi_length(),
            take_profit_levels: default_take_profit_levels(),
        }
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_equity: default_initial_equity(),
            partial_close_fraction: default_partial_close_fraction(),
            trailing_atr_multiplier: default_trailing_atr_multiplier(),
            epsilon: default_epsilon(),
            periods_per_year: default_periods_per_year(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
            results_db: default_results_db(),
            results_dir: default_results_dir(),
            fetch_limit: default_fetch_limit(),
        }
    }
}
