//! Indicator columns appended to each bar before a run.
//!
//! Column names follow the pandas-ta conventions the strategy reads:
//! `HA_open`, `HA_high`, `HA_low`, `HA_close`, `SMA_{n}`, `VOL_SMA_{n}`,
//! `RSI_{n}`, `ATRr_{n}` and `ADX_{n}`.

mod functions;

pub use functions::{adx, atr, heikin_ashi, rma, rsi, sma, true_range};

use crate::config::StrategyConfig;
use crate::data::{Bar, BarSeries};
use tracing::{debug, info};

/// Computes every indicator column the strategy needs.
#[derive(Debug, Clone)]
pub struct IndicatorCalculator {
    config: StrategyConfig,
}

impl IndicatorCalculator {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Return a copy of `series` with all indicator columns added and the
    /// warm-up bars (any `NaN` indicator) removed.
    pub fn add_all(&self, series: &BarSeries) -> BarSeries {
        let mut bars: Vec<Bar> = series.bars().to_vec();
        let cfg = &self.config;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let (ha_open, ha_high, ha_low, ha_close) = heikin_ashi(&bars);
        let columns: Vec<(String, Vec<f64>)> = vec![
            ("HA_open".to_string(), ha_open),
            ("HA_high".to_string(), ha_high),
            ("HA_low".to_string(), ha_low),
            ("HA_close".to_string(), ha_close),
            (cfg.sma_column(), sma(&closes, cfg.sma_length)),
            (cfg.volume_sma_column(), sma(&volumes, cfg.volume_sma_length)),
            (cfg.rsi_column(), rsi(&closes, cfg.rsi_length)),
            (cfg.atr_column(), atr(&bars, cfg.atr_length)),
            (cfg.adx_column(), adx(&bars, cfg.adx_length)),
        ];

        for (name, values) in columns {
            for (bar, value) in bars.iter_mut().zip(values) {
                bar.set(name.clone(), value);
            }
        }

        let before = bars.len();
        bars.retain(|b| b.indicators.values().all(|v| v.is_finite()));

        debug!("Dropped {} warm-up bars", before - bars.len());
        info!(
            "Indicators calculated: {} of {} bars usable",
            bars.len(),
            before
        );

        BarSeries::new(bars)
    }
}
