// Library crate - exports the strategy, backtest and scanning core

pub mod bars;
pub mod cancel;
pub mod catalog;
pub mod data;
pub mod export;
pub mod indicators;
pub mod backtest;
pub mod optimize;
pub mod scan;
pub mod strategy;

// Re-export commonly used types
pub use backtest::{BacktestMetrics, BacktestReport, Backtester, ExitReason, TradeRecord};
pub use bars::Bar;
pub use cancel::CancelToken;
pub use catalog::AssetCatalog;
pub use data::{CsvDataProvider, MarketDataProvider};
pub use optimize::{optimize, OptimizationOutcome, ParamGrid, RankMetric};
pub use scan::{ScanFilters, ScanOutcome, Scanner};
pub use strategy::{
    build_strategy, ConvergenceReport, ParamSet, SignalTable, Strategy, StrategyKind,
};
