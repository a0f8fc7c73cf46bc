//! OHLCV bar series
//!
//! A series is a `Vec<Bar>` ordered ascending by timestamp with no
//! duplicates. Weekends and holidays are naturally absent; no gap
//! filling is performed.

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar of a time series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Validate the series invariants: ascending unique timestamps,
/// positive finite OHLC, non-negative volume.
///
/// This is the construction-time failure surface of the indicator
/// pipeline: a series that violates it aborts that pipeline invocation
/// only.
pub fn validate_series(bars: &[Bar]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            bail!("bar {} at {} has non-positive price", i, bar.timestamp);
        }
        if !bar.volume.is_finite() || bar.volume < 0.0 {
            bail!("bar {} at {} has negative volume", i, bar.timestamp);
        }
        if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
            bail!(
                "series not ascending: bar {} at {} does not follow {}",
                i,
                bar.timestamp,
                bars[i - 1].timestamp
            );
        }
    }
    Ok(())
}

/// Resample a daily series into weekly bars (ISO week buckets).
///
/// Open = first open of the week, high/low = extremes, close = last
/// close, volume = summed, timestamp = first bar of the week.
pub fn resample_weekly(bars: &[Bar]) -> Vec<Bar> {
    let mut weekly: Vec<Bar> = Vec::new();
    let mut current_week: Option<(i32, u32)> = None;

    for bar in bars {
        let iso = bar.timestamp.iso_week();
        let key = (iso.year(), iso.week());

        if current_week == Some(key) {
            let agg = weekly.last_mut().expect("current_week implies a bucket");
            agg.high = agg.high.max(bar.high);
            agg.low = agg.low.min(bar.low);
            agg.close = bar.close;
            agg.volume += bar.volume;
        } else {
            weekly.push(bar.clone());
            current_week = Some(key);
        }
    }

    weekly
}
