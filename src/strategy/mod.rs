//! Strategy framework
//!
//! One polymorphic contract over three strategy variants:
//! - Channel cross (rolling high/low channel vs. EMA signal line)
//! - Moving average cross (fast vs. slow EMA)
//! - Market structure (swing break detection, BOS/MSS events)
//!
//! Every variant produces the same shape of output: an indicator table,
//! a per-bar 0/1 long signal with ATR-scaled stop/target levels, and a
//! daily-vs-weekly convergence verdict. Callers stay strategy-agnostic.

pub mod channel;
pub mod ma_cross;
pub mod mss;

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::bars::{validate_series, Bar};
use crate::indicators;

pub use channel::ChannelCrossStrategy;
pub use ma_cross::MaCrossStrategy;
pub use mss::MarketStructureStrategy;

/// One named indicator column, aligned with the bar series.
/// NaN cells mark warm-up rows where the rolling window lacks history.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorColumn {
    pub name: &'static str,
    pub values: Vec<f64>,
}

/// Bar series extended with strategy-specific indicator columns.
/// Built fresh per (strategy, series) pair; never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorTable {
    pub bars: Vec<Bar>,
    pub columns: Vec<IndicatorColumn>,
}

impl IndicatorTable {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Last value of a column, 0.0 when the table is empty or the
    /// column is unknown.
    pub fn last_value(&self, name: &str) -> f64 {
        self.column(name)
            .and_then(|values| values.last().copied())
            .unwrap_or(0.0)
    }
}

/// Market structure event classification (MSS strategy only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureEvent {
    /// Bullish structure shift: close broke the last swing high while
    /// structure was bearish or neutral
    MssBull,
    /// Bullish continuation: close broke the last swing high within an
    /// already bullish structure
    BosBull,
    /// Bearish structure shift
    MssBear,
    /// Bearish continuation
    BosBear,
}

impl std::fmt::Display for StructureEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureEvent::MssBull => write!(f, "MSS_BULL"),
            StructureEvent::BosBull => write!(f, "BOS_BULL"),
            StructureEvent::MssBear => write!(f, "MSS_BEAR"),
            StructureEvent::BosBear => write!(f, "BOS_BEAR"),
        }
    }
}

/// Indicator table extended with the per-bar trade signal and
/// ATR-scaled risk levels.
///
/// `signal` is 1 while the long setup holds, 0 otherwise. `stop_loss`
/// and `target` are NaN during ATR warm-up. `events` carries structure
/// break tags for the MSS variant and stays all-None elsewhere.
#[derive(Debug, Clone, Serialize)]
pub struct SignalTable {
    pub table: IndicatorTable,
    pub signal: Vec<u8>,
    pub stop_loss: Vec<f64>,
    pub target: Vec<f64>,
    pub events: Vec<Option<StructureEvent>>,
}

impl SignalTable {
    pub fn bars(&self) -> &[Bar] {
        &self.table.bars
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Signal on the last bar; 0 for an empty table.
    pub fn last_signal(&self) -> u8 {
        self.signal.last().copied().unwrap_or(0)
    }

    pub fn last_event(&self) -> Option<StructureEvent> {
        self.events.last().copied().flatten()
    }

    /// Last value of an indicator column, 0.0 when empty (see
    /// [`IndicatorTable::last_value`]).
    pub fn last_value(&self, name: &str) -> f64 {
        self.table.last_value(name)
    }

    /// Close of the last bar, 0.0 when empty.
    pub fn last_close(&self) -> f64 {
        self.bars().last().map(|b| b.close).unwrap_or(0.0)
    }

    fn last_or_zero(values: &[f64]) -> f64 {
        values.last().copied().unwrap_or(0.0)
    }

    pub fn last_stop_loss(&self) -> f64 {
        Self::last_or_zero(&self.stop_loss)
    }

    pub fn last_target(&self) -> f64 {
        Self::last_or_zero(&self.target)
    }
}

/// Daily/weekly agreement verdict plus the context that justifies it.
///
/// Entry/stop/target are read from the daily table's last bar. Never
/// persisted; recomputed whenever the underlying data changes.
#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceReport {
    pub converged: bool,
    pub daily_signal: bool,
    pub weekly_signal: bool,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub atr: f64,
    /// Strategy-specific indicator snapshot, e.g. ("daily_ema_fast", 123.4)
    pub context: Vec<(&'static str, f64)>,
    pub daily_event: Option<StructureEvent>,
    pub weekly_event: Option<StructureEvent>,
}

impl ConvergenceReport {
    /// Base verdict shared by all variants: AND of last-row signals,
    /// levels from the daily table. Works on empty tables (signal 0,
    /// numeric fields 0.0).
    pub(crate) fn base(daily: &SignalTable, weekly: &SignalTable) -> Self {
        let daily_signal = daily.last_signal() == 1;
        let weekly_signal = weekly.last_signal() == 1;

        Self {
            converged: daily_signal && weekly_signal,
            daily_signal,
            weekly_signal,
            entry_price: daily.last_close(),
            stop_loss: daily.last_stop_loss(),
            target: daily.last_target(),
            atr: daily.last_value("atr"),
            context: Vec::new(),
            daily_event: None,
            weekly_event: None,
        }
    }
}

/// Risk-management parameters shared by every strategy variant.
///
/// Stop distance is an ATR multiple; target distance is a multiple of
/// the stop distance (reward = risk x target_multiplier).
#[derive(Debug, Clone, Copy)]
pub struct RiskParams {
    pub atr_period: usize,
    pub stop_multiplier: f64,
    pub target_multiplier: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            atr_period: 14,
            stop_multiplier: 1.5,
            target_multiplier: 2.0,
        }
    }
}

impl RiskParams {
    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            atr_period: params.period_or("atr_period", defaults.atr_period)?,
            stop_multiplier: params.get_or("stop_multiplier", defaults.stop_multiplier),
            target_multiplier: params.get_or("target_multiplier", defaults.target_multiplier),
        })
    }

    /// ATR column for the series.
    pub fn atr_column(&self, bars: &[Bar]) -> IndicatorColumn {
        IndicatorColumn {
            name: "atr",
            values: indicators::atr(bars, self.atr_period),
        }
    }

    /// Stop/target levels per bar: stop = close - atr * stop_mult,
    /// target = close + atr * stop_mult * target_mult. NaN while ATR
    /// is warming up.
    pub fn levels(&self, table: &IndicatorTable) -> (Vec<f64>, Vec<f64>) {
        let empty = vec![];
        let atr = table.column("atr").unwrap_or(&empty);

        let mut stops = Vec::with_capacity(table.len());
        let mut targets = Vec::with_capacity(table.len());

        for (i, bar) in table.bars.iter().enumerate() {
            let atr_value = atr.get(i).copied().unwrap_or(f64::NAN);
            let stop_distance = atr_value * self.stop_multiplier;
            stops.push(bar.close - stop_distance);
            targets.push(bar.close + stop_distance * self.target_multiplier);
        }

        (stops, targets)
    }
}

/// Named numeric parameter bag used by the factory and the optimizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParamSet {
    values: BTreeMap<String, f64>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    /// Window-length parameter: must round to a positive integer.
    pub fn period_or(&self, name: &str, default: usize) -> Result<usize> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => {
                if !value.is_finite() || value < 1.0 {
                    bail!("parameter '{}' must be a positive period, got {}", name, value);
                }
                Ok(value.round() as usize)
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Display for ParamSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, value) in self.values.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

/// The polymorphic strategy contract
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> String;

    fn indicator_names(&self) -> Vec<&'static str>;

    /// Compute indicator columns for the series. Pure and
    /// deterministic; fails only on a malformed series (out-of-order
    /// timestamps, non-positive prices). Does not mutate the input.
    fn calculate_indicators(&self, bars: &[Bar]) -> Result<IndicatorTable>;

    /// Derive the 0/1 signal and stop/target levels from an indicator
    /// table. Pure function of the table.
    fn generate_signals(&self, table: IndicatorTable) -> SignalTable;

    /// Compare the latest signal state across two timeframes. Reads
    /// only the last row of each table; empty tables count as signal 0
    /// and never fail.
    fn check_convergence(&self, daily: &SignalTable, weekly: &SignalTable) -> ConvergenceReport;

    /// Standard pipeline entry point: indicators then signals.
    fn calculate_full(&self, bars: &[Bar]) -> Result<SignalTable> {
        let table = self.calculate_indicators(bars)?;
        Ok(self.generate_signals(table))
    }
}

/// Copy the series into a fresh table after validating it. Shared head
/// of every variant's `calculate_indicators`.
pub(crate) fn new_table(bars: &[Bar]) -> Result<IndicatorTable> {
    validate_series(bars)?;
    Ok(IndicatorTable {
        bars: bars.to_vec(),
        columns: Vec::new(),
    })
}

/// Closed set of strategy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    ChannelCross,
    MaCross,
    MarketStructure,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::ChannelCross,
        StrategyKind::MaCross,
        StrategyKind::MarketStructure,
    ];
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::ChannelCross => write!(f, "channel-cross"),
            StrategyKind::MaCross => write!(f, "ma-cross"),
            StrategyKind::MarketStructure => write!(f, "market-structure"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "channel-cross" | "channel" => Ok(StrategyKind::ChannelCross),
            "ma-cross" | "ma" => Ok(StrategyKind::MaCross),
            "market-structure" | "mss" => Ok(StrategyKind::MarketStructure),
            other => bail!(
                "unknown strategy '{}' (expected channel-cross, ma-cross or market-structure)",
                other
            ),
        }
    }
}

/// Construct a strategy of the given kind from a parameter bag.
/// Missing parameters fall back to the variant's defaults; invalid
/// period values are a construction error.
pub fn build_strategy(kind: StrategyKind, params: &ParamSet) -> Result<Box<dyn Strategy>> {
    Ok(match kind {
        StrategyKind::ChannelCross => Box::new(ChannelCrossStrategy::from_params(params)?),
        StrategyKind::MaCross => Box::new(MaCrossStrategy::from_params(params)?),
        StrategyKind::MarketStructure => Box::new(MarketStructureStrategy::from_params(params)?),
    })
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// Synthetic uptrend: high/low/close all rise one point per bar.
    /// Bars carry a long upper wick so the channel midline stays above
    /// the close-following EMA on both timeframes.
    pub fn uptrend(len: usize) -> Vec<Bar> {
        (0..len)
            .map(|i| {
                let base = 100.0 + i as f64;
                Bar {
                    timestamp: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
                        + Duration::days(i as i64),
                    open: base,
                    high: base + 12.0,
                    low: base - 2.0,
                    close: base + 1.0,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    pub fn bars_from_rows(rows: &[(f64, f64, f64)]) -> Vec<Bar> {
        rows.iter()
            .enumerate()
            .map(|(i, &(high, low, close))| Bar {
                timestamp: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
                    + Duration::days(i as i64),
                open: close,
                high,
                low,
                close,
                volume: 1_000.0,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in StrategyKind::ALL {
            let parsed: StrategyKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_kind_rejects_unknown() {
        assert!("turtle-soup".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_factory_rejects_bad_period() {
        let params = ParamSet::new().with("atr_period", 0.0);
        assert!(build_strategy(StrategyKind::MaCross, &params).is_err());
    }

    #[test]
    fn test_param_set_defaults() {
        let params = ParamSet::new().with("upper", 15.0);
        assert_eq!(params.get_or("upper", 20.0), 15.0);
        assert_eq!(params.get_or("under", 30.0), 30.0);
        assert_eq!(params.period_or("upper", 20).unwrap(), 15);
    }

    #[test]
    fn test_convergence_on_empty_tables() {
        let strategy = ChannelCrossStrategy::default();
        let empty = strategy.calculate_full(&[]).unwrap();
        let report = strategy.check_convergence(&empty, &empty);
        assert!(!report.converged);
        assert!(!report.daily_signal);
        assert_eq!(report.entry_price, 0.0);
        assert_eq!(report.stop_loss, 0.0);
        assert_eq!(report.target, 0.0);
    }
}
