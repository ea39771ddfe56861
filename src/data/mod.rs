//! OHLCV bars, the ordered series the engine replays, and data loading.
//!
//! This module provides:
//! - [`Bar`]: one OHLCV sample plus named indicator columns
//! - [`BarSeries`]: a chronologically sorted, duplicate-free series
//! - CSV import/export and cleaning
//! - Market data providers (Binance klines with retry, Yahoo Finance as fallback)

mod loader;
mod provider;

pub use loader::{write_csv, CsvBarLoader};
pub use provider::{BinanceKlines, FallbackProvider, OhlcvProvider, RetryingProvider, YahooChart};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Deref;

/// One OHLCV sample with any number of named indicator values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

impl Bar {
    /// Create a bar with no indicator columns.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: BTreeMap::new(),
        }
    }

    /// Look up a field by name. The OHLCV fields resolve by their lowercase names.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "open" => Some(self.open),
            "high" => Some(self.high),
            "low" => Some(self.low),
            "close" => Some(self.close),
            "volume" => Some(self.volume),
            _ => self.indicators.get(name).copied(),
        }
    }

    /// Set an indicator value, replacing any previous one.
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.indicators.insert(name.into(), value);
    }

    /// Builder-style variant of [`Bar::set`].
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, value);
        self
    }

    fn core_fields_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// A chronologically ordered series with unique timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Build a series, sorting by timestamp and keeping the first bar for
    /// any repeated timestamp.
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        Self { bars }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn into_inner(self) -> Vec<Bar> {
        self.bars
    }

    /// First and last timestamps, if any.
    pub fn range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.bars.first(), self.bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }
}

impl Deref for BarSeries {
    type Target = [Bar];

    fn deref(&self) -> &[Bar] {
        &self.bars
    }
}

impl From<Vec<Bar>> for BarSeries {
    fn from(bars: Vec<Bar>) -> Self {
        Self::new(bars)
    }
}

/// Forward-fill non-finite OHLCV and indicator values from the previous
/// bar, then drop bars that still have gaps (in practice the leading ones).
pub fn clean(bars: Vec<Bar>) -> Vec<Bar> {
    let mut cleaned: Vec<Bar> = Vec::with_capacity(bars.len());
    let mut previous: Option<Bar> = None;

    for mut bar in bars {
        if let Some(prev) = &previous {
            fill(&mut bar.open, prev.open);
            fill(&mut bar.high, prev.high);
            fill(&mut bar.low, prev.low);
            fill(&mut bar.close, prev.close);
            fill(&mut bar.volume, prev.volume);
            for (name, value) in bar.indicators.iter_mut() {
                if let Some(&prev_value) = prev.indicators.get(name) {
                    fill(value, prev_value);
                }
            }
        }

        previous = Some(bar.clone());

        if bar.core_fields_finite() && bar.indicators.values().all(|v| v.is_finite()) {
            cleaned.push(bar);
        }
    }

    cleaned
}

fn fill(value: &mut f64, previous: f64) {
    if !value.is_finite() {
        *value = previous;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{bar, ts};
    use super::*;

    #[test]
    fn test_bar_get_resolves_core_and_indicator_fields() {
        let b = bar(0, 1.0, 2.0, 0.5, 1.5).with("ATRr_14", 0.3);
        assert_eq!(b.get("high"), Some(2.0));
        assert_eq!(b.get("volume"), Some(1000.0));
        assert_eq!(b.get("ATRr_14"), Some(0.3));
        assert_eq!(b.get("RSI_14"), None);
    }

    #[test]
    fn test_series_sorted_and_unique() {
        let series = BarSeries::new(vec![
            bar(2, 3.0, 3.0, 3.0, 3.0),
            bar(0, 1.0, 1.0, 1.0, 1.0),
            bar(1, 2.0, 2.0, 2.0, 2.0),
            bar(1, 9.0, 9.0, 9.0, 9.0),
        ]);

        assert_eq!(series.len(), 3);
        assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(series[1].open, 2.0);
        assert_eq!(series.range(), Some((ts(0), ts(2))));
    }

    #[test]
    fn test_clean_forward_fills_and_drops_leading_gaps() {
        let bars = vec![
            bar(0, f64::NAN, 1.0, 1.0, 1.0),
            bar(1, 2.0, 2.0, 2.0, 2.0),
            bar(2, f64::NAN, 3.0, f64::NAN, 3.0),
        ];

        let cleaned = clean(bars);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].timestamp, ts(1));
        assert_eq!(cleaned[1].open, 2.0);
        assert_eq!(cleaned[1].low, 2.0);
    }
}
