//! Market data collaborator
//!
//! The scanner talks to historical data through [`MarketDataProvider`]
//! so the computation core stays free of I/O. An absent result means
//! "skip this instrument"; providers never panic on missing data.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::bars::{resample_weekly, Bar};

/// Source of daily and weekly OHLCV series per ticker
pub trait MarketDataProvider: Send + Sync {
    /// Daily series, ascending by date, or None when unavailable
    fn daily(&self, ticker: &str) -> Option<Vec<Bar>>;

    /// Weekly series for the same instrument, or None when unavailable
    fn weekly(&self, ticker: &str) -> Option<Vec<Bar>>;
}

/// CSV row: date,open,high,low,close,volume
#[derive(Debug, Deserialize)]
struct CsvBar {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// File-backed provider reading `<data_dir>/<ticker>.csv`. Weekly
/// series are ISO-week resamples of the daily file.
pub struct CsvDataProvider {
    data_dir: PathBuf,
}

impl CsvDataProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn load(&self, ticker: &str) -> Option<Vec<Bar>> {
        let path = self.data_dir.join(format!("{}.csv", ticker));
        match read_ohlcv_csv(&path) {
            Ok(bars) => {
                debug!("loaded {} bars for {} from {:?}", bars.len(), ticker, path);
                Some(bars)
            }
            Err(e) => {
                warn!("no usable data for {}: {}", ticker, e);
                None
            }
        }
    }
}

impl MarketDataProvider for CsvDataProvider {
    fn daily(&self, ticker: &str) -> Option<Vec<Bar>> {
        self.load(ticker)
    }

    fn weekly(&self, ticker: &str) -> Option<Vec<Bar>> {
        self.load(ticker).map(|bars| resample_weekly(&bars))
    }
}

/// Parse an OHLCV CSV file with a `date,open,high,low,close,volume`
/// header. Dates are `%Y-%m-%d`, mapped to midnight UTC.
pub fn read_ohlcv_csv(path: &Path) -> anyhow::Result<Vec<Bar>> {
    use anyhow::Context;

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {:?}", path))?;

    let mut bars = Vec::new();
    for result in reader.deserialize() {
        let row: CsvBar = result.with_context(|| format!("bad row in {:?}", path))?;
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .with_context(|| format!("bad date '{}' in {:?}", row.date, path))?;
        let timestamp = Utc
            .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"));

        bars.push(Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, ticker: &str, rows: &str) {
        let mut file = std::fs::File::create(dir.join(format!("{}.csv", ticker))).unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        write!(file, "{}", rows).unwrap();
    }

    #[test]
    fn test_csv_provider_round_trip() {
        let dir = std::env::temp_dir().join("mtf_scanner_data_test");
        std::fs::create_dir_all(&dir).unwrap();
        write_csv(
            &dir,
            "ABCD4",
            "2024-01-02,10.0,10.5,9.8,10.2,1000\n2024-01-03,10.2,10.8,10.0,10.6,1200\n",
        );

        let provider = CsvDataProvider::new(&dir);
        let bars = provider.daily("ABCD4").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 10.2);
        assert_eq!(bars[1].volume, 1200.0);

        // Same ISO week collapses into one weekly bar
        let weekly = provider.weekly("ABCD4").unwrap();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].close, 10.6);
    }

    #[test]
    fn test_missing_file_is_absent_not_error() {
        let provider = CsvDataProvider::new(std::env::temp_dir());
        assert!(provider.daily("NO_SUCH_TICKER_XYZ").is_none());
    }

    #[test]
    fn test_malformed_file_is_absent() {
        let dir = std::env::temp_dir().join("mtf_scanner_data_test_bad");
        std::fs::create_dir_all(&dir).unwrap();
        write_csv(&dir, "BROKEN", "not-a-date,1,2,3,4,5\n");

        let provider = CsvDataProvider::new(&dir);
        assert!(provider.daily("BROKEN").is_none());
    }
}
