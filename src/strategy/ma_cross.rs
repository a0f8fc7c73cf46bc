//! Moving Average Cross Strategy
//!
//! Classic fast/slow EMA cross: long while the fast EMA sits above the
//! slow one. The convergence report also carries the percentage
//! distance between the two EMAs on each timeframe as a strength
//! proxy; it is informational only and never gates the verdict.

use anyhow::Result;

use crate::bars::Bar;
use crate::indicators::ema;

use super::{
    new_table, ConvergenceReport, IndicatorColumn, IndicatorTable, ParamSet, RiskParams,
    SignalTable, Strategy,
};

#[derive(Debug, Clone)]
pub struct MaCrossStrategy {
    pub fast_period: usize,
    pub slow_period: usize,
    pub risk: RiskParams,
}

impl Default for MaCrossStrategy {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
            risk: RiskParams::default(),
        }
    }
}

impl MaCrossStrategy {
    pub fn new(fast_period: usize, slow_period: usize, risk: RiskParams) -> Self {
        Self {
            fast_period,
            slow_period,
            risk,
        }
    }

    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            fast_period: params.period_or("fast", defaults.fast_period)?,
            slow_period: params.period_or("slow", defaults.slow_period)?,
            risk: RiskParams::from_params(params)?,
        })
    }

    /// Percentage distance between fast and slow EMA on the last row,
    /// 0.0 for an empty table.
    fn distance_pct(table: &SignalTable) -> f64 {
        if table.is_empty() {
            return 0.0;
        }
        let fast = table.last_value("ema_fast");
        let slow = table.last_value("ema_slow");
        (fast - slow) / slow * 100.0
    }
}

impl Strategy for MaCrossStrategy {
    fn name(&self) -> &'static str {
        "Moving Average Cross"
    }

    fn description(&self) -> String {
        format!(
            "EMA cross with multi-timeframe convergence. Parameters: fast={}, slow={}",
            self.fast_period, self.slow_period
        )
    }

    fn indicator_names(&self) -> Vec<&'static str> {
        vec!["ema_fast", "ema_slow", "atr"]
    }

    fn calculate_indicators(&self, bars: &[Bar]) -> Result<IndicatorTable> {
        let mut table = new_table(bars)?;

        let closes: Vec<f64> = table.bars.iter().map(|b| b.close).collect();

        table.columns = vec![
            IndicatorColumn { name: "ema_fast", values: ema(&closes, self.fast_period) },
            IndicatorColumn { name: "ema_slow", values: ema(&closes, self.slow_period) },
            self.risk.atr_column(&table.bars),
        ];

        Ok(table)
    }

    fn generate_signals(&self, table: IndicatorTable) -> SignalTable {
        let empty = vec![];
        let fast = table.column("ema_fast").unwrap_or(&empty);
        let slow = table.column("ema_slow").unwrap_or(&empty);

        let signal: Vec<u8> = (0..table.len())
            .map(|i| {
                let f = fast.get(i).copied().unwrap_or(f64::NAN);
                let s = slow.get(i).copied().unwrap_or(f64::NAN);
                u8::from(f > s)
            })
            .collect();

        let (stop_loss, target) = self.risk.levels(&table);
        let events = vec![None; table.len()];

        SignalTable {
            table,
            signal,
            stop_loss,
            target,
            events,
        }
    }

    fn check_convergence(&self, daily: &SignalTable, weekly: &SignalTable) -> ConvergenceReport {
        let mut report = ConvergenceReport::base(daily, weekly);
        report.context = vec![
            ("daily_ema_fast", daily.last_value("ema_fast")),
            ("daily_ema_slow", daily.last_value("ema_slow")),
            ("weekly_ema_fast", weekly.last_value("ema_fast")),
            ("weekly_ema_slow", weekly.last_value("ema_slow")),
            ("daily_distance_pct", Self::distance_pct(daily)),
            ("weekly_distance_pct", Self::distance_pct(weekly)),
        ];
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::resample_weekly;
    use crate::strategy::test_fixtures::{bars_from_rows, uptrend};

    #[test]
    fn test_uptrend_fast_above_slow() {
        let strategy = MaCrossStrategy::default();
        let table = strategy.calculate_full(&uptrend(200)).unwrap();

        // The fast EMA lags less, so it rides above the slow one
        assert_eq!(table.last_signal(), 1);
        let tail_in_setup = table.signal[50..].iter().filter(|&&s| s == 1).count();
        assert_eq!(tail_in_setup, table.len() - 50);
    }

    #[test]
    fn test_downtrend_no_signal() {
        let rows: Vec<(f64, f64, f64)> = (0..100)
            .map(|i| {
                let base = 500.0 - i as f64;
                (base + 2.0, base - 2.0, base)
            })
            .collect();
        let strategy = MaCrossStrategy::default();
        let table = strategy.calculate_full(&bars_from_rows(&rows)).unwrap();

        assert_eq!(table.last_signal(), 0);
    }

    #[test]
    fn test_convergence_reports_distance() {
        let strategy = MaCrossStrategy::default();
        let bars = uptrend(200);
        let daily = strategy.calculate_full(&bars).unwrap();
        let weekly = strategy
            .calculate_full(&resample_weekly(&bars))
            .unwrap();

        let report = strategy.check_convergence(&daily, &weekly);
        assert!(report.converged);

        let daily_distance = report
            .context
            .iter()
            .find(|(name, _)| *name == "daily_distance_pct")
            .map(|(_, v)| *v)
            .unwrap();
        assert!(daily_distance > 0.0, "fast above slow means positive distance");
    }

    #[test]
    fn test_ema_seeded_from_first_close_no_warmup_nan() {
        let strategy = MaCrossStrategy::default();
        let table = strategy.calculate_full(&uptrend(30)).unwrap();
        // Seeded EMAs are defined from the first bar onward
        assert!(table.table.column("ema_fast").unwrap().iter().all(|v| !v.is_nan()));
        assert!(table.table.column("ema_slow").unwrap().iter().all(|v| !v.is_nan()));
    }
}
