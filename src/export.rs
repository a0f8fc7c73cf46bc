//! Result table export
//!
//! Lossless flat CSV of optimizer and scanner result tables (one row
//! per result, one column per field): the forward interface to any
//! reporting or spreadsheet layer.

use std::path::Path;

use anyhow::{Context, Result};

use crate::backtest::{BacktestMetrics, TradeRecord};
use crate::optimize::{OptimizationRow, ParamGrid};
use crate::scan::ScanRow;

const METRIC_HEADERS: [&str; 18] = [
    "total_trades",
    "winners",
    "losers",
    "targets_hit",
    "stops_hit",
    "win_rate",
    "win_rate_adjusted",
    "total_return",
    "avg_return",
    "profit_factor",
    "max_drawdown",
    "sharpe_ratio",
    "expectancy",
    "avg_winner",
    "avg_loser",
    "largest_winner",
    "largest_loser",
    "avg_duration_days",
];

fn metric_fields(m: &BacktestMetrics) -> Vec<String> {
    vec![
        m.total_trades.to_string(),
        m.winners.to_string(),
        m.losers.to_string(),
        m.targets_hit.to_string(),
        m.stops_hit.to_string(),
        m.win_rate.to_string(),
        m.win_rate_adjusted.to_string(),
        m.total_return.to_string(),
        m.avg_return.to_string(),
        m.profit_factor.to_string(),
        m.max_drawdown.to_string(),
        m.sharpe_ratio.to_string(),
        m.expectancy.to_string(),
        m.avg_winner.to_string(),
        m.avg_loser.to_string(),
        m.largest_winner.to_string(),
        m.largest_loser.to_string(),
        m.avg_duration_days.to_string(),
    ]
}

/// Write optimizer rows: one column per grid parameter (in grid
/// order), then convergence and every metric field.
pub fn write_optimization_csv(
    path: &Path,
    rows: &[OptimizationRow],
    grid: &ParamGrid,
) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("failed to create {:?}", path))?;

    let param_names = grid.names();
    let mut headers: Vec<&str> = param_names.clone();
    headers.push("convergence");
    headers.extend(METRIC_HEADERS);
    writer.write_record(&headers)?;

    for row in rows {
        let mut record: Vec<String> = param_names
            .iter()
            .map(|name| {
                row.params
                    .get(name)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            })
            .collect();
        record.push(row.converged.to_string());
        record.extend(metric_fields(&row.metrics));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write scanner rows: ticker, verdict, levels, then every metric field.
pub fn write_scan_csv(path: &Path, rows: &[ScanRow]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("failed to create {:?}", path))?;

    let mut headers = vec![
        "ticker",
        "convergence",
        "daily_signal",
        "weekly_signal",
        "current_price",
        "stop_loss",
        "target",
        "score",
    ];
    headers.extend(METRIC_HEADERS);
    writer.write_record(&headers)?;

    for row in rows {
        let mut record = vec![
            row.ticker.clone(),
            row.converged.to_string(),
            row.daily_signal.to_string(),
            row.weekly_signal.to_string(),
            row.current_price.to_string(),
            row.stop_loss.to_string(),
            row.target.to_string(),
            row.score.to_string(),
        ];
        record.extend(metric_fields(&row.metrics));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write a trade ledger, one row per trade.
pub fn write_trades_csv(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("failed to create {:?}", path))?;

    writer.write_record([
        "entry_date",
        "exit_date",
        "entry_price",
        "exit_price",
        "stop_loss",
        "target",
        "pnl",
        "pnl_pct",
        "exit_reason",
        "duration_days",
    ])?;

    for trade in trades {
        writer.write_record([
            trade.entry_date.format("%Y-%m-%d").to_string(),
            trade.exit_date.format("%Y-%m-%d").to_string(),
            trade.entry_price.to_string(),
            trade.exit_price.to_string(),
            trade.stop_loss.to_string(),
            trade.target.to_string(),
            trade.pnl.to_string(),
            trade.pnl_pct.to_string(),
            trade.exit_reason.to_string(),
            trade.duration_days.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
