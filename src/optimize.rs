//! Parameter grid optimizer
//!
//! Exhaustive grid search over strategy parameters: every combination
//! in the Cartesian product is backtested independently and the
//! survivors are ranked by a chosen metric. Combinations share no
//! mutable state, so the fan-out runs on a rayon pool.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::bail;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backtest::{BacktestMetrics, Backtester, MIN_TRADES};
use crate::bars::Bar;
use crate::cancel::CancelToken;
use crate::strategy::{build_strategy, ParamSet, StrategyKind};

/// Default backtest window: one trading year of daily bars
pub const DEFAULT_LOOKBACK_BARS: usize = 252;

/// Metric used to rank grid results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RankMetric {
    ProfitFactor,
    WinRate,
    WinRateAdjusted,
    TotalReturn,
    SharpeRatio,
    Expectancy,
}

impl RankMetric {
    pub fn value(&self, metrics: &BacktestMetrics) -> f64 {
        match self {
            RankMetric::ProfitFactor => metrics.profit_factor,
            RankMetric::WinRate => metrics.win_rate,
            RankMetric::WinRateAdjusted => metrics.win_rate_adjusted,
            RankMetric::TotalReturn => metrics.total_return,
            RankMetric::SharpeRatio => metrics.sharpe_ratio,
            RankMetric::Expectancy => metrics.expectancy,
        }
    }
}

impl std::fmt::Display for RankMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankMetric::ProfitFactor => write!(f, "profit_factor"),
            RankMetric::WinRate => write!(f, "win_rate"),
            RankMetric::WinRateAdjusted => write!(f, "win_rate_adjusted"),
            RankMetric::TotalReturn => write!(f, "total_return"),
            RankMetric::SharpeRatio => write!(f, "sharpe_ratio"),
            RankMetric::Expectancy => write!(f, "expectancy"),
        }
    }
}

impl FromStr for RankMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "profit_factor" | "pf" => Ok(RankMetric::ProfitFactor),
            "win_rate" => Ok(RankMetric::WinRate),
            "win_rate_adjusted" => Ok(RankMetric::WinRateAdjusted),
            "total_return" => Ok(RankMetric::TotalReturn),
            "sharpe_ratio" | "sharpe" => Ok(RankMetric::SharpeRatio),
            "expectancy" => Ok(RankMetric::Expectancy),
            other => bail!("unknown ranking metric '{}'", other),
        }
    }
}

/// Ordered parameter grid: name -> candidate values. The search space
/// is the Cartesian product over all entries, first entry outermost.
#[derive(Debug, Clone, Default)]
pub struct ParamGrid {
    entries: Vec<(String, Vec<f64>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> &mut Self {
        self.entries.push((name.into(), values));
        self
    }

    pub fn with(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.insert(name, values);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn combination_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).product()
    }

    /// All parameter sets in nested-loop order. An empty grid yields
    /// one all-defaults set; an entry with no candidates yields none.
    pub fn combinations(&self) -> Vec<ParamSet> {
        let mut sets = vec![ParamSet::new()];
        for (name, values) in &self.entries {
            sets = sets
                .iter()
                .flat_map(|base| {
                    values
                        .iter()
                        .map(move |&v| base.clone().with(name.clone(), v))
                })
                .collect();
        }
        sets
    }
}

/// One evaluated combination
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRow {
    pub params: ParamSet,
    pub converged: bool,
    pub metrics: BacktestMetrics,
}

/// A combination whose pipeline failed; recorded, never fatal
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub params: ParamSet,
    pub reason: String,
}

/// Grid search outcome.
///
/// `rows` holds every successful combination in enumeration order;
/// `ranked` is the subset with at least [`MIN_TRADES`] trades, sorted
/// by the requested metric. An empty `ranked` with a non-empty `rows`
/// means nothing survived the trade-count gate; there is no best guess
/// in that case.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationOutcome {
    pub rows: Vec<OptimizationRow>,
    pub ranked: Vec<OptimizationRow>,
    pub best: Option<OptimizationRow>,
    pub failures: Vec<UnitFailure>,
}

impl OptimizationOutcome {
    pub fn top(&self, n: usize) -> &[OptimizationRow] {
        &self.ranked[..self.ranked.len().min(n)]
    }
}

/// Run the grid search. Every combination constructs a fresh strategy
/// and processes its own copy of the input series; cancellation stops
/// evaluation of combinations not yet started while keeping finished
/// rows.
pub fn optimize(
    kind: StrategyKind,
    daily: &[Bar],
    weekly: &[Bar],
    grid: &ParamGrid,
    metric: RankMetric,
    lookback_bars: usize,
    cancel: &CancelToken,
) -> OptimizationOutcome {
    let combinations = grid.combinations();
    let total = combinations.len();
    info!(
        "optimizing {} over {} combinations (metric: {})",
        kind, total, metric
    );

    let completed = AtomicUsize::new(0);

    let evaluated: Vec<Option<Result<OptimizationRow, UnitFailure>>> = combinations
        .into_par_iter()
        .map(|params| {
            if cancel.is_cancelled() {
                return None;
            }

            let result = evaluate(kind, daily, weekly, &params, lookback_bars);

            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if done % 10 == 0 || done == total {
                debug!("progress: {}/{}", done, total);
            }

            Some(result)
        })
        .collect();

    let mut rows = Vec::new();
    let mut failures = Vec::new();
    for item in evaluated.into_iter().flatten() {
        match item {
            Ok(row) => rows.push(row),
            Err(failure) => {
                warn!(
                    "combination [{}] failed: {}",
                    failure.params, failure.reason
                );
                failures.push(failure);
            }
        }
    }

    let mut ranked: Vec<OptimizationRow> = rows
        .iter()
        .filter(|r| r.metrics.total_trades >= MIN_TRADES)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| {
        metric
            .value(&b.metrics)
            .total_cmp(&metric.value(&a.metrics))
    });

    let best = ranked.first().cloned();
    match &best {
        Some(row) => info!(
            "best {}: {:.2} with [{}]",
            metric,
            metric.value(&row.metrics),
            row.params
        ),
        None => info!("no combination produced at least {} trades", MIN_TRADES),
    }

    OptimizationOutcome {
        rows,
        ranked,
        best,
        failures,
    }
}

fn evaluate(
    kind: StrategyKind,
    daily: &[Bar],
    weekly: &[Bar],
    params: &ParamSet,
    lookback_bars: usize,
) -> Result<OptimizationRow, UnitFailure> {
    let fail = |reason: String| UnitFailure {
        params: params.clone(),
        reason,
    };

    let strategy = build_strategy(kind, params).map_err(|e| fail(e.to_string()))?;

    let daily_table = strategy
        .calculate_full(daily)
        .map_err(|e| fail(format!("daily pipeline: {}", e)))?;
    let weekly_table = strategy
        .calculate_full(weekly)
        .map_err(|e| fail(format!("weekly pipeline: {}", e)))?;

    let report = strategy.check_convergence(&daily_table, &weekly_table);
    let backtest = Backtester::new(strategy.as_ref()).run(&daily_table, &weekly_table, lookback_bars);

    Ok(OptimizationRow {
        params: params.clone(),
        converged: report.converged,
        metrics: backtest.metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::resample_weekly;
    use crate::strategy::test_fixtures::bars_from_rows;

    /// Triangle wave around 100: repeated crossings so the MA cross
    /// strategy opens and closes several trades
    fn sawtooth(len: usize) -> Vec<Bar> {
        let rows: Vec<(f64, f64, f64)> = (0..len)
            .map(|i| {
                let phase = i % 12;
                let close = if phase < 6 {
                    94.0 + 3.0 * phase as f64
                } else {
                    109.0 - 3.0 * (phase - 6) as f64
                };
                (close + 1.0, close - 1.0, close)
            })
            .collect();
        bars_from_rows(&rows)
    }

    fn grid() -> ParamGrid {
        ParamGrid::new()
            .with("fast", vec![1.0, 2.0])
            .with("slow", vec![9.0, 12.0])
    }

    #[test]
    fn test_combinations_nested_order() {
        let combos = grid().combinations();
        assert_eq!(combos.len(), 4);
        assert_eq!(combos[0].get("fast"), Some(1.0));
        assert_eq!(combos[0].get("slow"), Some(9.0));
        assert_eq!(combos[1].get("slow"), Some(12.0));
        assert_eq!(combos[2].get("fast"), Some(2.0));
    }

    #[test]
    fn test_empty_grid_yields_defaults_combo() {
        let combos = ParamGrid::new().combinations();
        assert_eq!(combos.len(), 1);
        assert!(combos[0].is_empty());
    }

    #[test]
    fn test_entry_without_candidates_empties_search_space() {
        let combos = ParamGrid::new().with("fast", vec![]).combinations();
        assert!(combos.is_empty());
    }

    #[test]
    fn test_optimize_ranks_by_metric() {
        let daily = sawtooth(120);
        let weekly = resample_weekly(&daily);
        let outcome = optimize(
            StrategyKind::MaCross,
            &daily,
            &weekly,
            &grid(),
            RankMetric::TotalReturn,
            DEFAULT_LOOKBACK_BARS,
            &CancelToken::new(),
        );

        assert_eq!(outcome.rows.len(), 4);
        assert!(outcome.failures.is_empty());
        assert!(!outcome.ranked.is_empty(), "sawtooth produces trades");
        assert!(outcome.best.is_some());

        for pair in outcome.ranked.windows(2) {
            assert!(
                pair[0].metrics.total_return >= pair[1].metrics.total_return,
                "ranking must be descending"
            );
        }
    }

    #[test]
    fn test_optimize_is_deterministic() {
        let daily = sawtooth(120);
        let weekly = resample_weekly(&daily);
        let run = || {
            optimize(
                StrategyKind::MaCross,
                &daily,
                &weekly,
                &grid(),
                RankMetric::ProfitFactor,
                DEFAULT_LOOKBACK_BARS,
                &CancelToken::new(),
            )
        };

        let first = run();
        let second = run();

        assert_eq!(first.ranked.len(), second.ranked.len());
        for (a, b) in first.ranked.iter().zip(&second.ranked) {
            assert_eq!(a.params, b.params);
            assert_eq!(a.metrics.total_trades, b.metrics.total_trades);
            assert_eq!(a.metrics.profit_factor, b.metrics.profit_factor);
            assert_eq!(a.metrics.total_return, b.metrics.total_return);
        }
    }

    #[test]
    fn test_bad_combination_is_recorded_not_fatal() {
        let daily = sawtooth(120);
        let weekly = resample_weekly(&daily);
        let grid = ParamGrid::new()
            .with("fast", vec![0.0, 1.0])
            .with("slow", vec![9.0]);
        let outcome = optimize(
            StrategyKind::MaCross,
            &daily,
            &weekly,
            &grid,
            RankMetric::ProfitFactor,
            DEFAULT_LOOKBACK_BARS,
            &CancelToken::new(),
        );

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.rows.len(), 1);
        assert!(outcome.failures[0].reason.contains("fast"));
    }

    #[test]
    fn test_gate_reports_empty_result_not_best_guess() {
        // Strictly monotone highs/lows have no swing points, so the
        // market-structure signal never fires: zero trades, below the
        // gate for every combination
        let daily = crate::strategy::test_fixtures::uptrend(80);
        let weekly = resample_weekly(&daily);
        let outcome = optimize(
            StrategyKind::MarketStructure,
            &daily,
            &weekly,
            &ParamGrid::new(),
            RankMetric::ProfitFactor,
            DEFAULT_LOOKBACK_BARS,
            &CancelToken::new(),
        );

        assert!(!outcome.rows.is_empty());
        assert_eq!(outcome.rows[0].metrics.total_trades, 0);
        assert!(outcome.ranked.is_empty());
        assert!(outcome.best.is_none());
    }

    #[test]
    fn test_cancelled_before_start_produces_nothing() {
        let daily = sawtooth(60);
        let weekly = resample_weekly(&daily);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = optimize(
            StrategyKind::MaCross,
            &daily,
            &weekly,
            &grid(),
            RankMetric::ProfitFactor,
            DEFAULT_LOOKBACK_BARS,
            &cancel,
        );

        assert!(outcome.rows.is_empty());
        assert!(outcome.failures.is_empty());
        assert!(outcome.best.is_none());
    }
}
