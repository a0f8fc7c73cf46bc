//! Multi-instrument scanner
//!
//! Runs one configured strategy across a list of tickers: fetch both
//! timeframes, check convergence, backtest, then filter and rank.
//! Tickers are processed sequentially because the data fetch is the
//! rate-limited step; a failed ticker is recorded and skipped, never
//! fatal to the scan.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backtest::{BacktestMetrics, Backtester, MIN_TRADES};
use crate::cancel::CancelToken;
use crate::data::MarketDataProvider;
use crate::strategy::Strategy;

/// Tickers with fewer daily bars than this are skipped: not enough
/// history for indicators plus a meaningful backtest window
pub const MIN_HISTORY_BARS: usize = 100;

/// Quality gate applied after all tickers are collected
#[derive(Debug, Clone)]
pub struct ScanFilters {
    pub min_win_rate: f64,
    pub min_profit_factor: f64,
}

impl Default for ScanFilters {
    fn default() -> Self {
        Self {
            min_win_rate: 50.0,
            min_profit_factor: 1.5,
        }
    }
}

/// One scanned instrument
#[derive(Debug, Clone, Serialize)]
pub struct ScanRow {
    pub ticker: String,
    pub converged: bool,
    pub daily_signal: bool,
    pub weekly_signal: bool,
    pub current_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub metrics: BacktestMetrics,
    /// Composite ranking score: convergence dominates, then profit
    /// factor, then win rate
    pub score: f64,
}

impl ScanRow {
    fn composite_score(&self) -> f64 {
        (self.converged as u8 as f64) * 100.0
            + self.metrics.profit_factor * 10.0
            + self.metrics.win_rate
    }
}

/// A ticker that could not be scanned
#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    pub ticker: String,
    pub reason: String,
}

/// Scan result.
///
/// When `passed_filters` is true, `rows` is the filtered set ranked by
/// the composite score. When false, no ticker met the quality gate and
/// `rows` is the full unfiltered set ranked by profit factor, so the
/// caller can still see what was scanned.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub rows: Vec<ScanRow>,
    pub passed_filters: bool,
    pub failures: Vec<ScanFailure>,
}

/// Aggregate view over a scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub total_scanned: usize,
    pub with_convergence: usize,
    pub avg_win_rate: f64,
    pub avg_profit_factor: f64,
    pub best_ticker: Option<String>,
    pub best_profit_factor: f64,
}

impl ScanOutcome {
    /// Rows with a convergence verdict, best profit factor first
    pub fn convergence_only(&self) -> Vec<&ScanRow> {
        let mut rows: Vec<&ScanRow> = self.rows.iter().filter(|r| r.converged).collect();
        rows.sort_by(|a, b| {
            b.metrics
                .profit_factor
                .total_cmp(&a.metrics.profit_factor)
        });
        rows
    }

    pub fn summary(&self) -> ScanSummary {
        if self.rows.is_empty() {
            return ScanSummary::default();
        }

        let n = self.rows.len() as f64;
        let best = self
            .rows
            .iter()
            .max_by(|a, b| {
                a.metrics
                    .profit_factor
                    .total_cmp(&b.metrics.profit_factor)
            })
            .expect("rows is non-empty");

        ScanSummary {
            total_scanned: self.rows.len(),
            with_convergence: self.rows.iter().filter(|r| r.converged).count(),
            avg_win_rate: self.rows.iter().map(|r| r.metrics.win_rate).sum::<f64>() / n,
            avg_profit_factor: self
                .rows
                .iter()
                .map(|r| r.metrics.profit_factor)
                .sum::<f64>()
                / n,
            best_ticker: Some(best.ticker.clone()),
            best_profit_factor: best.metrics.profit_factor,
        }
    }
}

/// Scanner over one strategy instance
pub struct Scanner<'a> {
    strategy: &'a dyn Strategy,
}

impl<'a> Scanner<'a> {
    pub fn new(strategy: &'a dyn Strategy) -> Self {
        Self { strategy }
    }

    pub fn scan(
        &self,
        provider: &dyn MarketDataProvider,
        tickers: &[String],
        filters: &ScanFilters,
        lookback_bars: usize,
        cancel: &CancelToken,
    ) -> ScanOutcome {
        info!(
            "scanning {} tickers with {} (win rate >= {}%, profit factor >= {})",
            tickers.len(),
            self.strategy.name(),
            filters.min_win_rate,
            filters.min_profit_factor
        );

        let mut rows = Vec::new();
        let mut failures = Vec::new();

        for (i, ticker) in tickers.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("scan cancelled after {} of {} tickers", i, tickers.len());
                break;
            }

            match self.scan_one(provider, ticker, lookback_bars) {
                Ok(row) => rows.push(row),
                Err(reason) => {
                    warn!("skipping {}: {}", ticker, reason);
                    failures.push(ScanFailure {
                        ticker: ticker.clone(),
                        reason,
                    });
                }
            }

            if (i + 1) % 5 == 0 || i + 1 == tickers.len() {
                debug!(
                    "progress: {}/{} ({} ok, {} skipped)",
                    i + 1,
                    tickers.len(),
                    rows.len(),
                    failures.len()
                );
            }
        }

        let mut filtered: Vec<ScanRow> = rows
            .iter()
            .filter(|r| {
                r.metrics.total_trades >= MIN_TRADES
                    && r.metrics.win_rate >= filters.min_win_rate
                    && r.metrics.profit_factor >= filters.min_profit_factor
            })
            .cloned()
            .collect();

        info!(
            "scan done: {} ok, {} skipped, {} passed filters",
            rows.len(),
            failures.len(),
            filtered.len()
        );

        if filtered.is_empty() {
            // Nothing met the gate: hand back everything, ranked by
            // profit factor, and say so
            rows.sort_by(|a, b| {
                b.metrics
                    .profit_factor
                    .total_cmp(&a.metrics.profit_factor)
            });
            ScanOutcome {
                rows,
                passed_filters: false,
                failures,
            }
        } else {
            filtered.sort_by(|a, b| b.score.total_cmp(&a.score));
            ScanOutcome {
                rows: filtered,
                passed_filters: true,
                failures,
            }
        }
    }

    fn scan_one(
        &self,
        provider: &dyn MarketDataProvider,
        ticker: &str,
        lookback_bars: usize,
    ) -> Result<ScanRow, String> {
        let daily = provider
            .daily(ticker)
            .ok_or_else(|| "no daily data".to_string())?;
        let weekly = provider
            .weekly(ticker)
            .ok_or_else(|| "no weekly data".to_string())?;

        if daily.len() < MIN_HISTORY_BARS {
            return Err(format!(
                "insufficient history ({} bars, need {})",
                daily.len(),
                MIN_HISTORY_BARS
            ));
        }

        let daily_table = self
            .strategy
            .calculate_full(&daily)
            .map_err(|e| format!("daily pipeline: {}", e))?;
        let weekly_table = self
            .strategy
            .calculate_full(&weekly)
            .map_err(|e| format!("weekly pipeline: {}", e))?;

        let report = self.strategy.check_convergence(&daily_table, &weekly_table);
        let backtest =
            Backtester::new(self.strategy).run(&daily_table, &weekly_table, lookback_bars);

        let mut row = ScanRow {
            ticker: ticker.to_string(),
            converged: report.converged,
            daily_signal: report.daily_signal,
            weekly_signal: report.weekly_signal,
            current_price: report.entry_price,
            stop_loss: report.stop_loss,
            target: report.target,
            metrics: backtest.metrics,
            score: 0.0,
        };
        row.score = row.composite_score();
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::{resample_weekly, Bar};
    use crate::strategy::test_fixtures::bars_from_rows;
    use crate::strategy::MaCrossStrategy;
    use std::collections::HashMap;

    struct StubProvider {
        series: HashMap<String, Vec<Bar>>,
    }

    impl StubProvider {
        fn new(series: Vec<(&str, Vec<Bar>)>) -> Self {
            Self {
                series: series
                    .into_iter()
                    .map(|(t, bars)| (t.to_string(), bars))
                    .collect(),
            }
        }
    }

    impl MarketDataProvider for StubProvider {
        fn daily(&self, ticker: &str) -> Option<Vec<Bar>> {
            self.series.get(ticker).cloned()
        }

        fn weekly(&self, ticker: &str) -> Option<Vec<Bar>> {
            self.series.get(ticker).map(|bars| resample_weekly(bars))
        }
    }

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Oscillating series so the backtest produces several trades
    fn choppy(len: usize) -> Vec<Bar> {
        bars_from_rows(&chop_rows(len))
    }

    fn chop_rows(len: usize) -> Vec<(f64, f64, f64)> {
        (0..len)
            .map(|i| {
                let phase = i % 12;
                let close = if phase < 6 {
                    94.0 + 3.0 * phase as f64
                } else {
                    109.0 - 3.0 * (phase - 6) as f64
                };
                (close + 1.0, close - 1.0, close)
            })
            .collect()
    }

    /// Choppy start (several trades) followed by a sustained move so
    /// the final signal state is unambiguous on both timeframes
    fn chop_then(slope: f64, len_tail: usize) -> Vec<Bar> {
        let mut rows = chop_rows(96);
        let start = rows.last().unwrap().2;
        for i in 1..=len_tail {
            let close = start + slope * i as f64;
            rows.push((close + 1.0, close - 1.0, close));
        }
        bars_from_rows(&rows)
    }

    #[test]
    fn test_absent_and_short_tickers_are_recorded_failures() {
        let strategy = MaCrossStrategy::default();
        let provider = StubProvider::new(vec![
            ("GOOD", choppy(150)),
            ("SHORT", choppy(20)),
        ]);

        let outcome = Scanner::new(&strategy).scan(
            &provider,
            &tickers(&["GOOD", "SHORT", "MISSING"]),
            &ScanFilters {
                min_win_rate: 0.0,
                min_profit_factor: 0.0,
            },
            252,
            &CancelToken::new(),
        );

        assert_eq!(outcome.failures.len(), 2);
        let failed: Vec<&str> = outcome.failures.iter().map(|f| f.ticker.as_str()).collect();
        assert!(failed.contains(&"SHORT"));
        assert!(failed.contains(&"MISSING"));
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].ticker, "GOOD");
    }

    #[test]
    fn test_fallback_returns_unfiltered_rows() {
        let strategy = MaCrossStrategy::default();
        let names = ["A1", "A2", "A3", "A4", "A5"];
        let provider = StubProvider::new(
            names.iter().map(|n| (*n, choppy(150))).collect(),
        );

        // Impossible gate: nothing passes
        let outcome = Scanner::new(&strategy).scan(
            &provider,
            &tickers(&names),
            &ScanFilters {
                min_win_rate: 101.0,
                min_profit_factor: 1_000.0,
            },
            252,
            &CancelToken::new(),
        );

        assert!(!outcome.passed_filters);
        assert_eq!(outcome.rows.len(), 5, "fallback keeps every scanned row");
    }

    #[test]
    fn test_ranking_prefers_convergence() {
        let strategy = MaCrossStrategy::default();
        // Both tickers trade during the choppy phase; only RISER ends
        // with the fast EMA above the slow one on both timeframes
        let provider = StubProvider::new(vec![
            ("RISER", chop_then(2.0, 60)),
            ("FADER", chop_then(-1.0, 60)),
        ]);

        let outcome = Scanner::new(&strategy).scan(
            &provider,
            &tickers(&["FADER", "RISER"]),
            &ScanFilters {
                min_win_rate: 0.0,
                min_profit_factor: 0.0,
            },
            252,
            &CancelToken::new(),
        );

        assert!(outcome.passed_filters);
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.rows[0].ticker, "RISER");
        assert!(outcome.rows[0].converged);
        assert!(!outcome.rows[1].converged);
    }

    #[test]
    fn test_cancellation_stops_between_tickers() {
        let strategy = MaCrossStrategy::default();
        let provider = StubProvider::new(vec![("ONLY", choppy(150))]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = Scanner::new(&strategy).scan(
            &provider,
            &tickers(&["ONLY"]),
            &ScanFilters::default(),
            252,
            &cancel,
        );

        assert!(outcome.rows.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_summary_aggregates() {
        let strategy = MaCrossStrategy::default();
        let provider = StubProvider::new(vec![
            ("A1", choppy(150)),
            ("A2", choppy(150)),
        ]);

        let outcome = Scanner::new(&strategy).scan(
            &provider,
            &tickers(&["A1", "A2"]),
            &ScanFilters {
                min_win_rate: 0.0,
                min_profit_factor: 0.0,
            },
            252,
            &CancelToken::new(),
        );

        let summary = outcome.summary();
        assert_eq!(summary.total_scanned, outcome.rows.len());
        assert!(summary.best_ticker.is_some());
    }
}
