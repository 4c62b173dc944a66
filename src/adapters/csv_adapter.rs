//! CSV bar files, one per (symbol, timeframe).
//!
//! Files are named `<SYMBOL>_<TF>.csv` with a header row and the columns
//! `timestamp,open,high,low,close,volume`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::domain::error::TradeguardError;
use crate::domain::ohlcv::{OhlcSeries, PriceBar};
use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone)]
pub struct CsvBarAdapter {
    base_path: PathBuf,
}

impl CsvBarAdapter {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path.join(format!("{symbol}_{timeframe}.csv"))
    }

    /// Loads and validates one series. Rows may be unordered; duplicate
    /// timestamps are rejected.
    pub fn load_series(&self, symbol: &str, timeframe: Timeframe) -> Result<OhlcSeries, TradeguardError> {
        let path = self.csv_path(symbol, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| {
            TradeguardError::data(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result
                .map_err(|e| TradeguardError::data(format!("{}: CSV parse error: {}", path.display(), e)))?;
            let row = line + 2;
            let timestamp = record
                .get(0)
                .ok_or_else(|| TradeguardError::data(format!("{}:{row}: missing timestamp column", path.display())))
                .and_then(|raw| {
                    parse_timestamp(raw.trim()).ok_or_else(|| {
                        TradeguardError::data(format!("{}:{row}: invalid timestamp '{raw}'", path.display()))
                    })
                })?;
            let field = |index: usize, name: &str| -> Result<f64, TradeguardError> {
                record
                    .get(index)
                    .ok_or_else(|| {
                        TradeguardError::data(format!("{}:{row}: missing {name} column", path.display()))
                    })?
                    .trim()
                    .parse()
                    .map_err(|e| {
                        TradeguardError::data(format!("{}:{row}: invalid {name} value: {e}", path.display()))
                    })
            };

            bars.push(PriceBar {
                timestamp,
                open: field(1, "open")?,
                high: field(2, "high")?,
                low: field(3, "low")?,
                close: field(4, "close")?,
                volume: field(5, "volume")?,
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        OhlcSeries::from_bars(symbol, timeframe, bars)
    }

    /// Every `(symbol, timeframe)` pair with a file in the base directory.
    pub fn list_series(&self) -> Result<Vec<(String, Timeframe)>, TradeguardError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            TradeguardError::data(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| TradeguardError::data(format!("directory entry error: {e}")))?;
            let name = entry.file_name();
            let Some(stem) = name.to_string_lossy().strip_suffix(".csv").map(str::to_string) else {
                continue;
            };
            if let Some((symbol, tf)) = stem.rsplit_once('_') {
                if let Ok(tf) = tf.parse::<Timeframe>() {
                    found.push((symbol.to_string(), tf));
                }
            }
        }

        found.sort();
        Ok(found)
    }
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
