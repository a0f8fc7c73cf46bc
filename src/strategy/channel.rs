//! Channel Cross Strategy
//!
//! Trend channel built from rolling means of highs and lows. The
//! channel midline against an EMA signal line decides the setup: long
//! while mid > ema. Convergence requires the setup on both the daily
//! and the weekly timeframe at once.

use anyhow::Result;

use crate::bars::Bar;
use crate::indicators::{ema, rolling_mean};

use super::{
    new_table, ConvergenceReport, IndicatorColumn, IndicatorTable, ParamSet, RiskParams,
    SignalTable, Strategy,
};

#[derive(Debug, Clone)]
pub struct ChannelCrossStrategy {
    /// Rolling window over highs (resistance line)
    pub upper: usize,
    /// Rolling window over lows (support line)
    pub under: usize,
    /// EMA period for the signal line
    pub ema_period: usize,
    pub risk: RiskParams,
}

impl Default for ChannelCrossStrategy {
    fn default() -> Self {
        Self {
            upper: 20,
            under: 30,
            ema_period: 9,
            risk: RiskParams::default(),
        }
    }
}

impl ChannelCrossStrategy {
    pub fn new(upper: usize, under: usize, ema_period: usize, risk: RiskParams) -> Self {
        Self {
            upper,
            under,
            ema_period,
            risk,
        }
    }

    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            upper: params.period_or("upper", defaults.upper)?,
            under: params.period_or("under", defaults.under)?,
            ema_period: params.period_or("ema", defaults.ema_period)?,
            risk: RiskParams::from_params(params)?,
        })
    }
}

impl Strategy for ChannelCrossStrategy {
    fn name(&self) -> &'static str {
        "Channel Cross"
    }

    fn description(&self) -> String {
        format!(
            "Trend channel with multi-timeframe convergence. Parameters: upper={}, under={}, ema={}",
            self.upper, self.under, self.ema_period
        )
    }

    fn indicator_names(&self) -> Vec<&'static str> {
        vec!["channel_upper", "channel_under", "channel_mid", "ema", "atr"]
    }

    fn calculate_indicators(&self, bars: &[Bar]) -> Result<IndicatorTable> {
        let mut table = new_table(bars)?;

        let highs: Vec<f64> = table.bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = table.bars.iter().map(|b| b.low).collect();
        let closes: Vec<f64> = table.bars.iter().map(|b| b.close).collect();

        let upper = rolling_mean(&highs, self.upper);
        let under = rolling_mean(&lows, self.under);
        let mid: Vec<f64> = upper
            .iter()
            .zip(&under)
            .map(|(u, l)| (u + l) / 2.0)
            .collect();

        table.columns = vec![
            IndicatorColumn { name: "channel_upper", values: upper },
            IndicatorColumn { name: "channel_under", values: under },
            IndicatorColumn { name: "channel_mid", values: mid },
            IndicatorColumn { name: "ema", values: ema(&closes, self.ema_period) },
            self.risk.atr_column(&table.bars),
        ];

        Ok(table)
    }

    fn generate_signals(&self, table: IndicatorTable) -> SignalTable {
        let empty = vec![];
        let mid = table.column("channel_mid").unwrap_or(&empty);
        let ema_line = table.column("ema").unwrap_or(&empty);

        // NaN warm-up cells compare false, so the signal stays 0 there
        let signal: Vec<u8> = (0..table.len())
            .map(|i| {
                let m = mid.get(i).copied().unwrap_or(f64::NAN);
                let e = ema_line.get(i).copied().unwrap_or(f64::NAN);
                u8::from(m > e)
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
            ("daily_mid", daily.last_value("channel_mid")),
            ("daily_ema", daily.last_value("ema")),
            ("weekly_mid", weekly.last_value("channel_mid")),
            ("weekly_ema", weekly.last_value("ema")),
        ];
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::resample_weekly;
    use crate::strategy::test_fixtures::uptrend;

    #[test]
    fn test_uptrend_signals_long() {
        let strategy = ChannelCrossStrategy::new(5, 5, 5, RiskParams::default());
        let bars = uptrend(300);
        let table = strategy.calculate_full(&bars).unwrap();

        // After warm-up the rising midline sits above the lagging EMA
        let warm = 50;
        let in_setup = table.signal[warm..].iter().filter(|&&s| s == 1).count();
        assert!(
            in_setup as f64 >= 0.9 * (table.len() - warm) as f64,
            "expected persistent long setup, got {}/{}",
            in_setup,
            table.len() - warm
        );
        assert_eq!(table.last_signal(), 1);
    }

    #[test]
    fn test_uptrend_convergence_with_weekly() {
        let strategy = ChannelCrossStrategy::new(5, 5, 5, RiskParams::default());
        let bars = uptrend(300);
        let daily = strategy.calculate_full(&bars).unwrap();
        let weekly = strategy
            .calculate_full(&resample_weekly(&bars))
            .unwrap();

        let report = strategy.check_convergence(&daily, &weekly);
        assert!(report.daily_signal);
        assert!(report.weekly_signal);
        assert!(report.converged);
        assert!(report.target > report.stop_loss);
    }

    #[test]
    fn test_signal_zero_or_one_and_levels_ordered() {
        let strategy = ChannelCrossStrategy::default();
        let table = strategy.calculate_full(&uptrend(120)).unwrap();

        for i in 0..table.len() {
            assert!(table.signal[i] <= 1);
            if !table.stop_loss[i].is_nan() && !table.target[i].is_nan() {
                assert!(
                    table.target[i] - table.stop_loss[i] > 0.0,
                    "target must sit above stop on defined rows"
                );
            }
        }
    }

    #[test]
    fn test_calculate_full_is_pure() {
        let strategy = ChannelCrossStrategy::default();
        let bars = uptrend(80);
        let before: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let first = strategy.calculate_full(&bars).unwrap();
        let second = strategy.calculate_full(&bars).unwrap();

        let after: Vec<f64> = bars.iter().map(|b| b.close).collect();
        assert_eq!(before, after, "input series must not be mutated");

        // Idempotence: identical output both runs
        assert_eq!(first.signal, second.signal);
        for (a, b) in first.stop_loss.iter().zip(&second.stop_loss) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }

    #[test]
    fn test_short_series_is_all_warmup() {
        let strategy = ChannelCrossStrategy::default();
        let table = strategy.calculate_full(&uptrend(5)).unwrap();
        // Channel windows (20/30) never fill: no setup, NaN levels
        assert!(table.signal.iter().all(|&s| s == 0));
        assert!(table.stop_loss.iter().all(|v| v.is_nan()));
    }
}
