//! Market data providers.
//!
//! A provider returns raw OHLCV bars for a symbol and timeframe. Providers
//! compose: [`RetryingProvider`] retries one source, [`FallbackProvider`]
//! walks a list of sources until one returns data.

use super::Bar;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const BINANCE_BASE_URL: &str = "https://api.binance.com";
const BINANCE_MAX_LIMIT: usize = 1000;
const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
/// Lookback requested from Yahoo; the newest `limit` bars are kept.
const YAHOO_RANGE: &str = "7d";

/// Source of historical OHLCV bars.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OhlcvProvider: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> String;

    /// Fetch up to `limit` most recent bars, oldest first.
    async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>>;
}

/// Public Binance spot klines endpoint. No credentials required.
pub struct BinanceKlines {
    http: Client,
    base_url: String,
}

impl BinanceKlines {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BINANCE_BASE_URL)
    }

    /// Point the client at another host (a testnet or a mock server).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// "BTC/USDT" and "btc-usdt" both become "BTCUSDT".
    pub fn normalize_symbol(symbol: &str) -> String {
        symbol
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase()
    }

    fn parse_kline(row: &[Value]) -> Result<Bar> {
        anyhow::ensure!(row.len() >= 6, "kline has {} fields, expected at least 6", row.len());

        let open_time = row[0].as_i64().context("kline open time is not an integer")?;
        let timestamp = Utc
            .timestamp_millis_opt(open_time)
            .single()
            .context("kline open time out of range")?;

        let num = |idx: usize| -> Result<f64> {
            match &row[idx] {
                Value::String(s) => s
                    .parse::<f64>()
                    .with_context(|| format!("kline field {} is not numeric: {}", idx, s)),
                Value::Number(n) => n.as_f64().context("kline number out of range"),
                other => anyhow::bail!("unexpected kline field {}: {}", idx, other),
            }
        };

        Ok(Bar::new(timestamp, num(1)?, num(2)?, num(3)?, num(4)?, num(5)?))
    }
}

#[async_trait]
impl OhlcvProvider for BinanceKlines {
    fn name(&self) -> String {
        "binance".to_string()
    }

    #[instrument(skip(self))]
    async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit = limit.clamp(1, BINANCE_MAX_LIMIT).to_string();

        let response = self
            .http
            .get(&url)
            .query(&[
                ("symbol", Self::normalize_symbol(symbol).as_str()),
                ("interval", timeframe),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .context("Failed to fetch klines")?
            .error_for_status()
            .context("Klines request rejected")?;

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .context("Failed to parse klines response")?;

        let bars = rows
            .iter()
            .map(|row| Self::parse_kline(row))
            .collect::<Result<Vec<_>>>()?;

        debug!("Fetched {} klines for {}", bars.len(), symbol);
        Ok(bars)
    }
}

/// Yahoo Finance chart endpoint, the fallback when the exchange is down.
pub struct YahooChart {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    /// Bar open times in epoch seconds
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

/// Parallel columns; Yahoo reports gaps as `null`.
#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl YahooChart {
    pub fn new() -> Result<Self> {
        Self::with_base_url(YAHOO_BASE_URL)
    }

    /// Point the client at another host (a mock server in tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("ha-trend-backtester/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// "BTC/USDT" becomes "BTC-USDT".
    pub fn normalize_symbol(symbol: &str) -> String {
        symbol.replace('/', "-")
    }

    fn parse_chart(response: ChartResponse) -> Result<Vec<Bar>> {
        if let Some(error) = response.chart.error.filter(|e| !e.is_null()) {
            anyhow::bail!("chart request failed: {}", error);
        }

        let result = response
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .context("chart response has no result")?;
        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .context("chart response has no quote")?;

        let column = |values: &[Option<f64>], idx: usize| {
            values.get(idx).copied().flatten().unwrap_or(f64::NAN)
        };

        result
            .timestamp
            .iter()
            .enumerate()
            .map(|(idx, &secs)| {
                let timestamp = Utc
                    .timestamp_opt(secs, 0)
                    .single()
                    .context("chart timestamp out of range")?;
                Ok(Bar::new(
                    timestamp,
                    column(&quote.open, idx),
                    column(&quote.high, idx),
                    column(&quote.low, idx),
                    column(&quote.close, idx),
                    column(&quote.volume, idx),
                ))
            })
            .collect()
    }
}

#[async_trait]
impl OhlcvProvider for YahooChart {
    fn name(&self) -> String {
        "yahoo".to_string()
    }

    #[instrument(skip(self))]
    async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            Self::normalize_symbol(symbol)
        );

        let response: ChartResponse = self
            .http
            .get(&url)
            .query(&[("interval", timeframe), ("range", YAHOO_RANGE)])
            .send()
            .await
            .context("Failed to fetch chart")?
            .error_for_status()
            .context("Chart request rejected")?
            .json()
            .await
            .context("Failed to parse chart response")?;

        let mut bars = Self::parse_chart(response)?;
        let excess = bars.len().saturating_sub(limit);
        bars.drain(..excess);

        debug!("Fetched {} chart bars for {}", bars.len(), symbol);
        Ok(bars)
    }
}

/// Retries a provider a fixed number of times with a fixed delay.
pub struct RetryingProvider<P> {
    inner: P,
    attempts: u32,
    delay: Duration,
}

impl<P: OhlcvProvider> RetryingProvider<P> {
    pub fn new(inner: P, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl<P: OhlcvProvider> OhlcvProvider for RetryingProvider<P> {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            info!(
                "Fetching {} {} from {} (attempt {}/{})",
                symbol,
                timeframe,
                self.inner.name(),
                attempt,
                self.attempts
            );

            match self.inner.fetch(symbol, timeframe, limit).await {
                Ok(bars) => return Ok(bars),
                Err(e) => {
                    warn!("{} fetch failed: {:#}", self.inner.name(), e);
                    last_error = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no attempts made"))
            .context(format!(
                "{} failed after {} attempts",
                self.inner.name(),
                self.attempts
            )))
    }
}

/// Tries each provider in order; the first non-empty result wins.
#[derive(Default)]
pub struct FallbackProvider {
    providers: Vec<Box<dyn OhlcvProvider>>,
}

impl FallbackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl OhlcvProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

#[async_trait]
impl OhlcvProvider for FallbackProvider {
    fn name(&self) -> String {
        let names: Vec<String> = self.providers.iter().map(|p| p.name()).collect();
        names.join("->")
    }

    async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        for provider in &self.providers {
            match provider.fetch(symbol, timeframe, limit).await {
                Ok(bars) if !bars.is_empty() => {
                    info!("Fetched {} bars from {}", bars.len(), provider.name());
                    return Ok(bars);
                }
                Ok(_) => warn!("{} returned no data, trying next source", provider.name()),
                Err(e) => warn!("{} failed: {:#}, trying next source", provider.name(), e),
            }
        }

        anyhow::bail!("All data sources failed for {} {}", symbol, timeframe)
    }
}
