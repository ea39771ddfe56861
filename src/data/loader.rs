//! CSV import/export of OHLCV series.

use super::{clean, Bar, BarSeries};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Loads a [`BarSeries`] from CSV.
///
/// Expected CSV format (extra numeric columns become indicator fields):
/// ```csv
/// timestamp,open,high,low,close,volume
/// 2024-01-01T00:00:00Z,42000.5,42100.0,41900.0,42050.0,123.4
/// ```
///
/// Column names are matched case-insensitively; `date` and `time` are
/// accepted in place of `timestamp`. Timestamps may be RFC3339,
/// `%Y-%m-%d %H:%M:%S`, `%Y-%m-%d`, or epoch milliseconds.
pub struct CsvBarLoader;

struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
    extras: Vec<(usize, String)>,
}

impl CsvBarLoader {
    /// Load a series from a CSV file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<BarSeries> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

        let series = Self::from_reader(file)
            .with_context(|| format!("Failed to load bars from {}", path.display()))?;

        info!("Loaded {} bars from {}", series.len(), path.display());
        Ok(series)
    }

    /// Load a series from any CSV reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<BarSeries> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers().context("CSV has no header row")?.clone();
        let columns = Self::resolve_columns(&headers)?;

        let mut bars = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("Malformed CSV row {}", line + 2))?;
            let raw_ts = record.get(columns.timestamp).unwrap_or_default();
            let timestamp = parse_timestamp(raw_ts)
                .with_context(|| format!("Invalid timestamp '{}' on row {}", raw_ts, line + 2))?;

            let number = |idx: usize| -> f64 {
                record
                    .get(idx)
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(f64::NAN)
            };

            let mut bar = Bar::new(
                timestamp,
                number(columns.open),
                number(columns.high),
                number(columns.low),
                number(columns.close),
                number(columns.volume),
            );
            for (idx, name) in &columns.extras {
                bar.set(name.clone(), number(*idx));
            }
            bars.push(bar);
        }

        anyhow::ensure!(!bars.is_empty(), "CSV file contains no data rows");

        let raw_len = bars.len();
        bars.sort_by_key(|b| b.timestamp);
        let series = BarSeries::new(clean(bars));
        if series.len() != raw_len {
            debug!(
                "Dropped {} incomplete or duplicate rows",
                raw_len - series.len()
            );
        }

        Ok(series)
    }

    fn resolve_columns(headers: &csv::StringRecord) -> Result<Columns> {
        let lower: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
        let find = |names: &[&str]| lower.iter().position(|h| names.contains(&h.as_str()));
        let require = |name: &str| {
            find(&[name]).with_context(|| format!("CSV is missing the '{}' column", name))
        };

        let timestamp = find(&["timestamp", "date", "time", "datetime"])
            .context("CSV is missing a timestamp column")?;
        let open = require("open")?;
        let high = require("high")?;
        let low = require("low")?;
        let close = require("close")?;
        let volume = require("volume")?;

        let core: BTreeSet<usize> = [timestamp, open, high, low, close, volume].into();
        let extras = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| !core.contains(idx))
            .map(|(idx, name)| (idx, name.to_string()))
            .collect();

        Ok(Columns {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            extras,
        })
    }
}

/// Write a series to CSV, including every indicator column present on any bar.
pub fn write_csv<P: AsRef<Path>>(series: &BarSeries, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    let extras: BTreeSet<&String> = series.iter().flat_map(|b| b.indicators.keys()).collect();

    let mut header = vec![
        "timestamp".to_string(),
        "open".to_string(),
        "high".to_string(),
        "low".to_string(),
        "close".to_string(),
        "volume".to_string(),
    ];
    header.extend(extras.iter().map(|s| s.to_string()));
    wtr.write_record(&header)?;

    for bar in series.iter() {
        let mut row = vec![
            bar.timestamp.to_rfc3339(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
        ];
        row.extend(
            extras
                .iter()
                .map(|name| bar.indicators.get(*name).map(f64::to_string).unwrap_or_default()),
        );
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(millis) = raw.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_millis_opt(millis).single() {
            return Ok(dt);
        }
    }
    anyhow::bail!("unrecognised timestamp format")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
timestamp,open,high,low,close,volume,ATRr_14
2024-01-01T02:00:00Z,102,103,101,102.5,10,1.5
2024-01-01T00:00:00Z,100,101,99,100.5,10,1.0
2024-01-01 01:00:00,101,102,100,101.5,,1.2
";

    #[test]
    fn test_from_reader_sorts_and_reads_extras() {
        let series = CsvBarLoader::from_reader(SAMPLE.as_bytes()).unwrap();

        assert_eq!(series.len(), 3);
        assert_eq!(series[0].open, 100.0);
        assert_eq!(series[2].get("ATRr_14"), Some(1.5));
        // Missing volume is forward-filled from the previous bar
        assert_eq!(series[1].volume, 10.0);
    }

    #[test]
    fn test_epoch_millis_timestamps() {
        let csv = "Date,Open,High,Low,Close,Volume\n1704067200000,1,2,0.5,1.5,3\n";
        let series = CsvBarLoader::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(series[0].timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let csv = "timestamp,open,high,low,close\n2024-01-01,1,2,0.5,1.5\n";
        assert!(CsvBarLoader::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let csv = "timestamp,open,high,low,close,volume\n";
        assert!(CsvBarLoader::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_write_then_load() {
        let series = CsvBarLoader::from_reader(SAMPLE.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.csv");

        write_csv(&series, &path).unwrap();
        let reloaded = CsvBarLoader::load(&path).unwrap();

        assert_eq!(reloaded, series);
    }
}
