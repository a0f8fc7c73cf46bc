use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mtf_scanner::backtest::Backtester;
use mtf_scanner::cancel::CancelToken;
use mtf_scanner::catalog::AssetCatalog;
use mtf_scanner::data::{CsvDataProvider, MarketDataProvider};
use mtf_scanner::export;
use mtf_scanner::optimize::{optimize, ParamGrid, RankMetric, DEFAULT_LOOKBACK_BARS};
use mtf_scanner::scan::{ScanFilters, Scanner};
use mtf_scanner::strategy::{build_strategy, ParamSet, StrategyKind};

#[derive(Parser, Debug)]
#[command(name = "mtf-scanner")]
#[command(about = "Multi-timeframe strategy backtesting, optimization and scanning")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check daily/weekly convergence for one ticker
    Convergence {
        /// Ticker symbol (resolved to <data-dir>/<ticker>.csv)
        #[arg(short, long)]
        ticker: String,

        /// Directory with OHLCV CSV files
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Strategy: channel-cross, ma-cross or market-structure
        #[arg(short, long, default_value = "channel-cross")]
        strategy: StrategyKind,

        /// Strategy parameter, e.g. --param upper=20 (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Backtest one ticker
    Backtest {
        #[arg(short, long)]
        ticker: String,

        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(short, long, default_value = "channel-cross")]
        strategy: StrategyKind,

        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Number of daily bars to replay
        #[arg(long, default_value_t = DEFAULT_LOOKBACK_BARS)]
        lookback: usize,

        /// Write the trade ledger to this CSV file
        #[arg(long)]
        trades_csv: Option<PathBuf>,
    },

    /// Grid-search strategy parameters on one ticker
    Optimize {
        #[arg(short, long)]
        ticker: String,

        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(short, long, default_value = "channel-cross")]
        strategy: StrategyKind,

        /// Grid entry, e.g. --grid upper=15,20,25 (repeatable)
        #[arg(short, long = "grid")]
        grid: Vec<String>,

        /// Ranking metric: profit_factor, win_rate, win_rate_adjusted,
        /// total_return, sharpe_ratio or expectancy
        #[arg(short, long, default_value = "profit_factor")]
        metric: RankMetric,

        #[arg(long, default_value_t = DEFAULT_LOOKBACK_BARS)]
        lookback: usize,

        /// Write the full ranked table to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// How many top rows to print
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Scan a list of tickers with one configured strategy
    Scan {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// File with one ticker per line
        #[arg(long, conflicts_with = "catalog_dir")]
        tickers_file: Option<PathBuf>,

        /// Directory of <Market>_<Category>.csv catalog files
        #[arg(long)]
        catalog_dir: Option<PathBuf>,

        /// Restrict the catalog to one market
        #[arg(long, requires = "catalog_dir")]
        market: Option<String>,

        /// Restrict the catalog to one category (requires --market)
        #[arg(long, requires = "market")]
        category: Option<String>,

        #[arg(short, long, default_value = "channel-cross")]
        strategy: StrategyKind,

        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Minimum win rate (percent) to pass the quality gate
        #[arg(long, default_value = "50.0")]
        min_win_rate: f64,

        /// Minimum profit factor to pass the quality gate
        #[arg(long, default_value = "1.5")]
        min_profit_factor: f64,

        #[arg(long, default_value_t = DEFAULT_LOOKBACK_BARS)]
        lookback: usize,

        /// Write the result table to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Convergence {
            ticker,
            data_dir,
            strategy,
            params,
        } => run_convergence(ticker, data_dir, strategy, &params),
        Commands::Backtest {
            ticker,
            data_dir,
            strategy,
            params,
            lookback,
            trades_csv,
        } => run_backtest(ticker, data_dir, strategy, &params, lookback, trades_csv),
        Commands::Optimize {
            ticker,
            data_dir,
            strategy,
            grid,
            metric,
            lookback,
            output,
            top,
        } => run_optimize(ticker, data_dir, strategy, &grid, metric, lookback, output, top),
        Commands::Scan {
            data_dir,
            tickers_file,
            catalog_dir,
            market,
            category,
            strategy,
            params,
            min_win_rate,
            min_profit_factor,
            lookback,
            output,
        } => run_scan(
            data_dir,
            tickers_file,
            catalog_dir,
            market,
            category,
            strategy,
            &params,
            min_win_rate,
            min_profit_factor,
            lookback,
            output,
        ),
    }
}

/// Parse repeated `name=value` flags into a parameter bag
fn parse_params(raw: &[String]) -> Result<ParamSet> {
    let mut params = ParamSet::new();
    for entry in raw {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected name=value, got '{}'", entry))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("'{}' is not a number in '{}'", value, entry))?;
        params.set(name.trim(), value);
    }
    Ok(params)
}

/// Parse repeated `name=v1,v2,v3` flags into a grid
fn parse_grid(raw: &[String]) -> Result<ParamGrid> {
    let mut grid = ParamGrid::new();
    for entry in raw {
        let (name, values) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected name=v1,v2,..., got '{}'", entry))?;
        let values: Vec<f64> = values
            .split(',')
            .map(|v| {
                v.trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("'{}' is not a number in '{}'", v, entry))
            })
            .collect::<Result<_>>()?;
        grid.insert(name.trim(), values);
    }
    Ok(grid)
}

fn load_series(
    provider: &CsvDataProvider,
    ticker: &str,
) -> Result<(Vec<mtf_scanner::Bar>, Vec<mtf_scanner::Bar>)> {
    let daily = provider
        .daily(ticker)
        .ok_or_else(|| anyhow::anyhow!("no daily data for {}", ticker))?;
    let weekly = provider
        .weekly(ticker)
        .ok_or_else(|| anyhow::anyhow!("no weekly data for {}", ticker))?;
    Ok((daily, weekly))
}

fn run_convergence(
    ticker: String,
    data_dir: PathBuf,
    kind: StrategyKind,
    raw_params: &[String],
) -> Result<()> {
    let params = parse_params(raw_params)?;
    let strategy = build_strategy(kind, &params)?;
    let provider = CsvDataProvider::new(data_dir);
    let (daily, weekly) = load_series(&provider, &ticker)?;

    let daily_table = strategy.calculate_full(&daily)?;
    let weekly_table = strategy.calculate_full(&weekly)?;
    let report = strategy.check_convergence(&daily_table, &weekly_table);

    println!();
    println!("{} - {}", ticker, strategy.name());
    println!("  Daily signal:   {}", if report.daily_signal { "LONG" } else { "flat" });
    println!("  Weekly signal:  {}", if report.weekly_signal { "LONG" } else { "flat" });
    println!("  Convergence:    {}", if report.converged { "YES" } else { "no" });
    println!();
    println!("  Entry:          {:.2}", report.entry_price);
    println!("  Stop loss:      {:.2}", report.stop_loss);
    println!("  Target:         {:.2}", report.target);
    println!("  ATR:            {:.2}", report.atr);
    for (name, value) in &report.context {
        println!("  {:<15} {:.4}", format!("{}:", name), value);
    }
    if let Some(event) = report.daily_event {
        println!("  Daily event:    {}", event);
    }
    if let Some(event) = report.weekly_event {
        println!("  Weekly event:   {}", event);
    }
    println!();

    Ok(())
}

fn run_backtest(
    ticker: String,
    data_dir: PathBuf,
    kind: StrategyKind,
    raw_params: &[String],
    lookback: usize,
    trades_csv: Option<PathBuf>,
) -> Result<()> {
    let params = parse_params(raw_params)?;
    let strategy = build_strategy(kind, &params)?;
    let provider = CsvDataProvider::new(data_dir);
    let (daily, weekly) = load_series(&provider, &ticker)?;

    let daily_table = strategy.calculate_full(&daily)?;
    let weekly_table = strategy.calculate_full(&weekly)?;
    let report = Backtester::new(strategy.as_ref()).run(&daily_table, &weekly_table, lookback);

    println!();
    print!("{}", report.summary());
    println!();

    if let Some(path) = trades_csv {
        export::write_trades_csv(&path, &report.trades)?;
        info!("trade ledger written to {:?}", path);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_optimize(
    ticker: String,
    data_dir: PathBuf,
    kind: StrategyKind,
    raw_grid: &[String],
    metric: RankMetric,
    lookback: usize,
    output: Option<PathBuf>,
    top: usize,
) -> Result<()> {
    let grid = parse_grid(raw_grid)?;
    if grid.combination_count() == 0 {
        anyhow::bail!("the grid has an entry with no candidate values");
    }

    let provider = CsvDataProvider::new(data_dir);
    let (daily, weekly) = load_series(&provider, &ticker)?;

    let cancel = CancelToken::new();
    let outcome = optimize(kind, &daily, &weekly, &grid, metric, lookback, &cancel);

    println!();
    println!("Optimization - {} on {}", kind, ticker);
    println!(
        "  {} combinations, {} evaluated, {} failed, {} ranked",
        grid.combination_count(),
        outcome.rows.len(),
        outcome.failures.len(),
        outcome.ranked.len()
    );

    match &outcome.best {
        Some(best) => {
            println!("  Best {}: {:.2}", metric, metric.value(&best.metrics));
            println!("  Parameters: [{}]", best.params);
        }
        None => println!("  No combination produced enough trades to rank"),
    }

    if !outcome.ranked.is_empty() {
        println!();
        println!("  Top {}:", top.min(outcome.ranked.len()));
        for (i, row) in outcome.top(top).iter().enumerate() {
            println!(
                "  {:>2}. {}={:.2} trades={} wr={:.1}% pf={:.2} [{}]",
                i + 1,
                metric,
                metric.value(&row.metrics),
                row.metrics.total_trades,
                row.metrics.win_rate,
                row.metrics.profit_factor,
                row.params
            );
        }
    }
    println!();

    if let Some(path) = output {
        let rows = if outcome.ranked.is_empty() {
            &outcome.rows
        } else {
            &outcome.ranked
        };
        export::write_optimization_csv(&path, rows, &grid)?;
        info!("results written to {:?}", path);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_scan(
    data_dir: PathBuf,
    tickers_file: Option<PathBuf>,
    catalog_dir: Option<PathBuf>,
    market: Option<String>,
    category: Option<String>,
    kind: StrategyKind,
    raw_params: &[String],
    min_win_rate: f64,
    min_profit_factor: f64,
    lookback: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    let tickers = resolve_tickers(tickers_file, catalog_dir, market, category)?;
    if tickers.is_empty() {
        anyhow::bail!("no tickers to scan");
    }

    let params = parse_params(raw_params)?;
    let strategy = build_strategy(kind, &params)?;
    let provider = CsvDataProvider::new(data_dir);
    let filters = ScanFilters {
        min_win_rate,
        min_profit_factor,
    };

    let cancel = CancelToken::new();
    let outcome = Scanner::new(strategy.as_ref()).scan(
        &provider,
        &tickers,
        &filters,
        lookback,
        &cancel,
    );

    println!();
    println!("Scan - {} over {} tickers", strategy.name(), tickers.len());
    println!(
        "  {} rows, {} skipped{}",
        outcome.rows.len(),
        outcome.failures.len(),
        if outcome.passed_filters {
            ""
        } else {
            " (nothing passed the filters; showing all results)"
        }
    );
    println!();

    for row in &outcome.rows {
        let mark = if row.converged { "*" } else { " " };
        println!(
            " {} {:<12} price={:<9.2} trades={:<3} wr={:>5.1}% pf={:<5.2} ret={:>7.2}% score={:.1}",
            mark,
            row.ticker,
            row.current_price,
            row.metrics.total_trades,
            row.metrics.win_rate,
            row.metrics.profit_factor,
            row.metrics.total_return,
            row.score
        );
    }

    let summary = outcome.summary();
    if summary.total_scanned > 0 {
        println!();
        println!(
            "  Convergence on {}/{}; avg wr {:.1}%, avg pf {:.2}",
            summary.with_convergence,
            summary.total_scanned,
            summary.avg_win_rate,
            summary.avg_profit_factor
        );
    }
    println!();

    if let Some(path) = output {
        export::write_scan_csv(&path, &outcome.rows)?;
        info!("results written to {:?}", path);
    }

    Ok(())
}

fn resolve_tickers(
    tickers_file: Option<PathBuf>,
    catalog_dir: Option<PathBuf>,
    market: Option<String>,
    category: Option<String>,
) -> Result<Vec<String>> {
    if let Some(path) = tickers_file {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {:?}: {}", path, e))?;
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect());
    }

    if let Some(dir) = catalog_dir {
        let catalog = AssetCatalog::load(&dir);
        return Ok(match (market, category) {
            (Some(market), Some(category)) => catalog
                .tickers(&market, &category)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            (Some(market), None) => catalog
                .categories(&market)
                .iter()
                .flat_map(|cat| {
                    catalog
                        .tickers(&market, cat)
                        .map(<[String]>::to_vec)
                        .unwrap_or_default()
                })
                .collect(),
            _ => catalog.all_tickers(),
        });
    }

    anyhow::bail!("provide either --tickers-file or --catalog-dir")
}
