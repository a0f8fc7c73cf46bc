//! Market Structure Strategy
//!
//! Detects breaks of the last swing extreme and classifies them as
//! continuation (BOS) or structural reversal (MSS). The running
//! structure state makes this an honest sequential fold over the bar
//! sequence: each bar's classification depends on the state left by
//! the previous one, so the scan cannot be vectorized. It parallelizes
//! only across independent series.

use anyhow::Result;

use crate::bars::Bar;
use crate::indicators::{forward_fill, swing_highs, swing_lows};

use super::{
    new_table, ConvergenceReport, IndicatorColumn, IndicatorTable, ParamSet, RiskParams,
    SignalTable, Strategy, StructureEvent,
};

/// Running structure direction threaded through the signal scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Structure {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone)]
pub struct MarketStructureStrategy {
    /// Bars on each side a swing extreme must strictly dominate
    pub swing_length: usize,
    pub risk: RiskParams,
}

impl Default for MarketStructureStrategy {
    fn default() -> Self {
        Self {
            swing_length: 5,
            risk: RiskParams::default(),
        }
    }
}

impl MarketStructureStrategy {
    pub fn new(swing_length: usize, risk: RiskParams) -> Self {
        Self {
            swing_length,
            risk,
        }
    }

    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            swing_length: params.period_or("swing_length", defaults.swing_length)?,
            risk: RiskParams::from_params(params)?,
        })
    }
}

impl Strategy for MarketStructureStrategy {
    fn name(&self) -> &'static str {
        "Market Structure"
    }

    fn description(&self) -> String {
        format!(
            "Swing break detection (BOS/MSS events). Parameters: swing_length={}, atr_period={}",
            self.swing_length, self.risk.atr_period
        )
    }

    fn indicator_names(&self) -> Vec<&'static str> {
        vec![
            "swing_high",
            "swing_low",
            "last_swing_high",
            "last_swing_low",
            "structure_line",
            "atr",
        ]
    }

    fn calculate_indicators(&self, bars: &[Bar]) -> Result<IndicatorTable> {
        let mut table = new_table(bars)?;

        let highs = swing_highs(&table.bars, self.swing_length);
        let lows = swing_lows(&table.bars, self.swing_length);
        let last_high = forward_fill(&highs);
        let last_low = forward_fill(&lows);

        // Midpoint between the carried extremes, for charting layers
        let structure_line: Vec<f64> = last_high
            .iter()
            .zip(&last_low)
            .map(|(h, l)| (h + l) / 2.0)
            .collect();

        table.columns = vec![
            IndicatorColumn { name: "swing_high", values: highs },
            IndicatorColumn { name: "swing_low", values: lows },
            IndicatorColumn { name: "last_swing_high", values: last_high },
            IndicatorColumn { name: "last_swing_low", values: last_low },
            IndicatorColumn { name: "structure_line", values: structure_line },
            self.risk.atr_column(&table.bars),
        ];

        Ok(table)
    }

    fn generate_signals(&self, table: IndicatorTable) -> SignalTable {
        let len = table.len();
        let mut signal = vec![0u8; len];
        let mut events: Vec<Option<StructureEvent>> = vec![None; len];

        let empty = vec![];
        let last_high = table.column("last_swing_high").unwrap_or(&empty);
        let last_low = table.column("last_swing_low").unwrap_or(&empty);

        let mut structure = Structure::Neutral;

        for i in 1..len {
            let close = table.bars[i].close;
            // Levels as of the previous bar; NaN (no swing seen yet)
            // compares false on both branches
            let prior_high = last_high.get(i - 1).copied().unwrap_or(f64::NAN);
            let prior_low = last_low.get(i - 1).copied().unwrap_or(f64::NAN);

            if close > prior_high {
                events[i] = Some(if structure == Structure::Bullish {
                    StructureEvent::BosBull
                } else {
                    StructureEvent::MssBull
                });
                signal[i] = 1;
                structure = Structure::Bullish;
            } else if close < prior_low {
                events[i] = Some(if structure == Structure::Bearish {
                    StructureEvent::BosBear
                } else {
                    StructureEvent::MssBear
                });
                signal[i] = 0;
                structure = Structure::Bearish;
            } else {
                signal[i] = u8::from(structure == Structure::Bullish);
            }
        }

        let (stop_loss, target) = self.risk.levels(&table);

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
            ("daily_swing_high", daily.last_value("last_swing_high")),
            ("daily_swing_low", daily.last_value("last_swing_low")),
            ("weekly_swing_high", weekly.last_value("last_swing_high")),
            ("weekly_swing_low", weekly.last_value("last_swing_low")),
        ];
        report.daily_event = daily.last_event();
        report.weekly_event = weekly.last_event();
        report
    }
}
