//! Heikin-Ashi trend-following entries confirmed by volume, SMA, ADX and RSI.

use super::{Side, SignalSource, TradeSignal};
use crate::config::StrategyConfig;
use crate::data::Bar;
use crate::risk::STOP_VOLATILITY_MULTIPLE;
use tracing::debug;

/// RSI midline separating bullish and bearish momentum.
const RSI_MIDLINE: f64 = 50.0;

/// Indicator values of one bar, resolved by column name.
struct Readings {
    close: f64,
    volume: f64,
    ha_open: f64,
    ha_high: f64,
    ha_low: f64,
    ha_close: f64,
    sma: f64,
    volume_sma: f64,
    rsi: f64,
    atr: f64,
    adx: f64,
}

/// Long when a wickless bullish Heikin-Ashi candle forms above the SMA in a
/// strong trend on rising volume; short on the mirror image.
#[derive(Debug, Clone)]
pub struct HeikinAshiTrend {
    config: StrategyConfig,
    sma_column: String,
    volume_sma_column: String,
    rsi_column: String,
    atr_column: String,
    adx_column: String,
}

impl HeikinAshiTrend {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            config: config.clone(),
            sma_column: config.sma_column(),
            volume_sma_column: config.volume_sma_column(),
            rsi_column: config.rsi_column(),
            atr_column: config.atr_column(),
            adx_column: config.adx_column(),
        }
    }

    fn readings(&self, bar: &Bar) -> Option<Readings> {
        let field = |name: &str| {
            let value = bar.get(name);
            if value.is_none() {
                debug!(column = name, timestamp = %bar.timestamp, "Indicator column missing");
            }
            value
        };

        Some(Readings {
            close: bar.close,
            volume: bar.volume,
            ha_open: field("HA_open")?,
            ha_high: field("HA_high")?,
            ha_low: field("HA_low")?,
            ha_close: field("HA_close")?,
            sma: field(&self.sma_column)?,
            volume_sma: field(&self.volume_sma_column)?,
            rsi: field(&self.rsi_column)?,
            atr: field(&self.atr_column)?,
            adx: field(&self.adx_column)?,
        })
    }

    fn classify(&self, r: &Readings) -> Option<Side> {
        let volume_confirmed = r.volume > self.config.volume_multiplier * r.volume_sma;
        let strong_trend = r.adx > self.config.adx_threshold;
        if !volume_confirmed || !strong_trend {
            return None;
        }

        let bullish = r.ha_close > r.ha_open && r.ha_open == r.ha_low;
        let bearish = r.ha_close < r.ha_open && r.ha_open == r.ha_high;

        if bullish && r.close > r.sma && r.rsi > RSI_MIDLINE {
            Some(Side::Long)
        } else if bearish && r.close < r.sma && r.rsi < RSI_MIDLINE {
            Some(Side::Short)
        } else {
            None
        }
    }
}

impl SignalSource for HeikinAshiTrend {
    fn evaluate(&self, window: &[Bar]) -> TradeSignal {
        let Some(bar) = window.last() else {
            return TradeSignal::none();
        };
        let Some(readings) = self.readings(bar) else {
            return TradeSignal::none();
        };
        let Some(side) = self.classify(&readings) else {
            return TradeSignal::none();
        };

        let entry = readings.close;
        let sign = side.sign();
        let stop_loss = entry - sign * STOP_VOLATILITY_MULTIPLE * readings.atr;
        let take_profit_levels = self
            .config
            .take_profit_levels
            .iter()
            .map(|m| entry + sign * m * readings.atr)
            .collect();

        debug!(
            %side,
            entry,
            stop_loss,
            atr = readings.atr,
            adx = readings.adx,
            "Signal generated at {}",
            bar.timestamp
        );

        TradeSignal {
            side: Some(side),
            entry_price: entry,
            stop_loss,
            take_profit_levels,
            adx_at_entry: Some(readings.adx),
        }
    }
}
