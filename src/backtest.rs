//! Backtesting engine
//!
//! Replays a signal-annotated daily series bar by bar under a
//! single-position-at-a-time model and derives aggregate performance
//! statistics from the resulting trade ledger. The ledger is rebuilt
//! from scratch on every run; no state is carried between runs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::strategy::{SignalTable, Strategy};

/// Minimum ledger size for a statistically meaningful result. Applied
/// as a post-hoc filter by the optimizer and scanner, never treated as
/// an error.
pub const MIN_TRADES: usize = 3;

/// Trading days per year, used to annualize the per-trade Sharpe ratio
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    StopLoss,
    Target,
    SignalExit,
    EndOfPeriod,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::Target => write!(f, "target"),
            ExitReason::SignalExit => write!(f, "signal_exit"),
            ExitReason::EndOfPeriod => write!(f, "end_of_period"),
        }
    }
}

/// One completed round trip, immutable once appended to the ledger
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub entry_date: DateTime<Utc>,
    pub exit_date: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub exit_reason: ExitReason,
    pub duration_days: i64,
}

/// Aggregate statistics over a trade ledger. All fields are zero when
/// the ledger is empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winners: usize,
    pub losers: usize,
    pub targets_hit: usize,
    pub stops_hit: usize,
    pub win_rate: f64,
    /// Targets vs. stops only; exits by signal or period end carry no
    /// verdict on the stop/target placement
    pub win_rate_adjusted: f64,
    pub total_return: f64,
    pub avg_return: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub expectancy: f64,
    pub avg_winner: f64,
    pub avg_loser: f64,
    pub largest_winner: f64,
    pub largest_loser: f64,
    pub avg_duration_days: f64,
}

/// Backtest output: metrics plus the full ledger
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub strategy_name: String,
    pub metrics: BacktestMetrics,
    pub trades: Vec<TradeRecord>,
}

struct OpenPosition {
    entry_price: f64,
    entry_date: DateTime<Utc>,
    stop_loss: f64,
    target: f64,
}

/// Generic backtester: works with any [`Strategy`] output
pub struct Backtester<'a> {
    strategy: &'a dyn Strategy,
}

impl<'a> Backtester<'a> {
    pub fn new(strategy: &'a dyn Strategy) -> Self {
        Self { strategy }
    }

    /// Replay the last `lookback_bars` rows of the daily table. The
    /// weekly table is part of the pipeline interface but does not
    /// drive the simulation.
    pub fn run(
        &self,
        daily: &SignalTable,
        _weekly: &SignalTable,
        lookback_bars: usize,
    ) -> BacktestReport {
        let start = daily.len().saturating_sub(lookback_bars);
        let trades = simulate(daily, start);
        let metrics = compute_metrics(&trades);

        BacktestReport {
            strategy_name: self.strategy.name().to_string(),
            metrics,
            trades,
        }
    }
}

/// Single-position replay over `table` rows starting at `start`.
///
/// Entry: signal flips to 1 while flat; the entry bar captures close,
/// stop and target and cannot also exit. Exit priority on later bars:
/// stop breach, then target breach, then signal loss. A position still
/// open after the last bar is flushed at its close.
fn simulate(table: &SignalTable, start: usize) -> Vec<TradeRecord> {
    let mut trades = Vec::new();
    let mut position: Option<OpenPosition> = None;
    let mut last_seen: Option<&crate::bars::Bar> = None;

    for (offset, bar) in table.bars()[start..].iter().enumerate() {
        let i = start + offset;

        // Undefined rows neither enter nor exit, but keep state
        if bar.close.is_nan() {
            continue;
        }
        last_seen = Some(bar);

        position = match position.take() {
            None => {
                if table.signal[i] == 1 {
                    let entry_price = bar.close;
                    let stop = table.stop_loss[i];
                    let target = table.target[i];
                    Some(OpenPosition {
                        entry_price,
                        entry_date: bar.timestamp,
                        // Percentage fallbacks when ATR never warmed up
                        stop_loss: if stop.is_nan() { entry_price * 0.95 } else { stop },
                        target: if target.is_nan() { entry_price * 1.10 } else { target },
                    })
                } else {
                    None
                }
            }
            Some(pos) => {
                let exit = if bar.low <= pos.stop_loss {
                    Some((pos.stop_loss, ExitReason::StopLoss))
                } else if bar.high >= pos.target {
                    Some((pos.target, ExitReason::Target))
                } else if table.signal[i] == 0 {
                    Some((bar.close, ExitReason::SignalExit))
                } else {
                    None
                };

                match exit {
                    Some((exit_price, exit_reason)) => {
                        trades.push(close_trade(pos, exit_price, bar.timestamp, exit_reason));
                        None
                    }
                    None => Some(pos),
                }
            }
        };
    }

    // Flush a position still open after the last bar
    if let (Some(pos), Some(bar)) = (position, last_seen) {
        trades.push(close_trade(
            pos,
            bar.close,
            bar.timestamp,
            ExitReason::EndOfPeriod,
        ));
    }

    trades
}

fn close_trade(
    pos: OpenPosition,
    exit_price: f64,
    exit_date: DateTime<Utc>,
    exit_reason: ExitReason,
) -> TradeRecord {
    let pnl = exit_price - pos.entry_price;
    TradeRecord {
        entry_date: pos.entry_date,
        exit_date,
        entry_price: pos.entry_price,
        exit_price,
        stop_loss: pos.stop_loss,
        target: pos.target,
        pnl,
        pnl_pct: pnl / pos.entry_price * 100.0,
        exit_reason,
        duration_days: (exit_date - pos.entry_date).num_days(),
    }
}

/// Pure function of the ledger; every field is zero on an empty one.
pub fn compute_metrics(trades: &[TradeRecord]) -> BacktestMetrics {
    if trades.is_empty() {
        return BacktestMetrics::default();
    }

    let total = trades.len();
    let winners: Vec<&TradeRecord> = trades.iter().filter(|t| t.pnl > 0.0).collect();
    let losers: Vec<&TradeRecord> = trades.iter().filter(|t| t.pnl <= 0.0).collect();

    let win_rate = winners.len() as f64 / total as f64 * 100.0;

    let targets_hit = trades
        .iter()
        .filter(|t| t.exit_reason == ExitReason::Target)
        .count();
    let stops_hit = trades
        .iter()
        .filter(|t| t.exit_reason == ExitReason::StopLoss)
        .count();
    let defined_exits = targets_hit + stops_hit;
    let win_rate_adjusted = if defined_exits > 0 {
        targets_hit as f64 / defined_exits as f64 * 100.0
    } else {
        0.0
    };

    let total_return: f64 = trades.iter().map(|t| t.pnl_pct).sum();
    let avg_return = total_return / total as f64;

    let gross_profit: f64 = winners.iter().map(|t| t.pnl).sum();
    let gross_loss: f64 = losers.iter().map(|t| t.pnl).sum::<f64>().abs();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        0.0
    };

    // Compound the ledger in chronological order and track the peak
    let mut cumulative = 1.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst_drawdown = 0.0f64;
    for trade in trades {
        cumulative *= 1.0 + trade.pnl_pct / 100.0;
        peak = peak.max(cumulative);
        let drawdown = (cumulative / peak - 1.0) * 100.0;
        worst_drawdown = worst_drawdown.min(drawdown);
    }
    let max_drawdown = worst_drawdown.abs();

    // Per-trade returns annualized as if one trade were one trading
    // day; a rough proxy, kept for comparability across runs
    let sharpe_ratio = if total > 1 {
        let variance = trades
            .iter()
            .map(|t| (t.pnl_pct - avg_return).powi(2))
            .sum::<f64>()
            / (total as f64 - 1.0);
        let std_dev = variance.sqrt();
        if std_dev > 0.0 {
            avg_return / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    let avg_winner = if winners.is_empty() {
        0.0
    } else {
        winners.iter().map(|t| t.pnl_pct).sum::<f64>() / winners.len() as f64
    };
    let avg_loser = if losers.is_empty() {
        0.0
    } else {
        losers.iter().map(|t| t.pnl_pct).sum::<f64>() / losers.len() as f64
    };

    let win_prob = winners.len() as f64 / total as f64;
    let loss_prob = losers.len() as f64 / total as f64;
    let expectancy = win_prob * avg_winner + loss_prob * avg_loser;

    let largest_winner = winners
        .iter()
        .map(|t| t.pnl_pct)
        .fold(f64::NEG_INFINITY, f64::max);
    let largest_loser = losers
        .iter()
        .map(|t| t.pnl_pct)
        .fold(f64::INFINITY, f64::min);

    BacktestMetrics {
        total_trades: total,
        winners: winners.len(),
        losers: losers.len(),
        targets_hit,
        stops_hit,
        win_rate,
        win_rate_adjusted,
        total_return,
        avg_return,
        profit_factor,
        max_drawdown,
        sharpe_ratio,
        expectancy,
        avg_winner,
        avg_loser,
        largest_winner: if winners.is_empty() { 0.0 } else { largest_winner },
        largest_loser: if losers.is_empty() { 0.0 } else { largest_loser },
        avg_duration_days: trades.iter().map(|t| t.duration_days as f64).sum::<f64>()
            / total as f64,
    }
}

impl BacktestReport {
    /// Plain-text performance summary
    pub fn summary(&self) -> String {
        let m = &self.metrics;
        if m.total_trades == 0 {
            return format!(
                "{}: no trades in the analysis window\n",
                self.strategy_name
            );
        }

        let mut out = String::new();
        out.push_str(&format!("Backtest - {}\n\n", self.strategy_name));
        out.push_str(&format!("Total Trades:      {}\n", m.total_trades));
        out.push_str(&format!("Win Rate:          {:.1}%\n", m.win_rate));
        out.push_str(&format!(
            "Win Rate (t/s):    {:.1}%\n",
            m.win_rate_adjusted
        ));
        out.push_str(&format!("Total Return:      {:.2}%\n", m.total_return));
        out.push_str(&format!("Avg Return:        {:.2}%\n", m.avg_return));
        out.push_str(&format!("Profit Factor:     {:.2}\n", m.profit_factor));
        out.push_str(&format!("Expectancy:        {:.2}%\n", m.expectancy));
        out.push_str(&format!("Sharpe Ratio:      {:.2}\n", m.sharpe_ratio));
        out.push_str(&format!("Max Drawdown:      {:.2}%\n", m.max_drawdown));
        out.push_str(&format!(
            "Targets / Stops:   {} / {}\n",
            m.targets_hit, m.stops_hit
        ));
        out.push_str(&format!(
            "Avg Win / Loss:    {:.2}% / {:.2}%\n",
            m.avg_winner, m.avg_loser
        ));
        out.push_str(&format!(
            "Best / Worst:      {:.2}% / {:.2}%\n",
            m.largest_winner, m.largest_loser
        ));
        out.push_str(&format!(
            "Avg Duration:      {:.1} days\n",
            m.avg_duration_days
        ));
        out
    }
}
