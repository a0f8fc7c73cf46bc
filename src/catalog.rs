//! Instrument catalog
//!
//! Loads ticker lists from a directory of CSV files into a market ->
//! category -> tickers mapping. File stems follow
//! `<Market>_<Category>.csv` (e.g. `Brasil_Acoes.csv`); the first CSV
//! column holds the ticker. The catalog is read once and consumed
//! read-only.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    markets: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl AssetCatalog {
    /// Load every `*.csv` in `dir`. A missing directory yields an
    /// empty catalog; an unreadable file is logged and skipped.
    pub fn load(dir: &Path) -> Self {
        let mut catalog = Self::default();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("asset catalog directory {:?} unavailable: {}", dir, e);
                return catalog;
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == "csv"))
            .collect();
        paths.sort();

        for path in paths {
            let stem = match path.file_stem() {
                Some(stem) => stem.to_string_lossy().to_string(),
                None => continue,
            };
            let (market, category) = match stem.split_once('_') {
                Some((market, category)) => (market.to_string(), category.to_string()),
                None => ("Other".to_string(), stem),
            };

            match read_ticker_column(&path) {
                Ok(tickers) => {
                    debug!("{}/{}: {} tickers", market, category, tickers.len());
                    catalog
                        .markets
                        .entry(market)
                        .or_default()
                        .insert(category, tickers);
                }
                Err(e) => warn!("skipping catalog file {:?}: {}", path, e),
            }
        }

        catalog
    }

    pub fn markets(&self) -> impl Iterator<Item = &str> {
        self.markets.keys().map(String::as_str)
    }

    pub fn categories(&self, market: &str) -> Vec<&str> {
        self.markets
            .get(market)
            .map(|cats| cats.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn tickers(&self, market: &str, category: &str) -> Option<&[String]> {
        self.markets
            .get(market)
            .and_then(|cats| cats.get(category))
            .map(Vec::as_slice)
    }

    /// Flat list over every market and category
    pub fn all_tickers(&self) -> Vec<String> {
        self.markets
            .values()
            .flat_map(|cats| cats.values())
            .flatten()
            .cloned()
            .collect()
    }

    /// Ticker counts per market and category
    pub fn counts(&self) -> BTreeMap<String, BTreeMap<String, usize>> {
        self.markets
            .iter()
            .map(|(market, cats)| {
                (
                    market.clone(),
                    cats.iter()
                        .map(|(cat, tickers)| (cat.clone(), tickers.len()))
                        .collect(),
                )
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

/// First column of a headered CSV, trimmed, blanks dropped
fn read_ticker_column(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut tickers = Vec::new();

    for record in reader.records() {
        let record = record?;
        if let Some(first) = record.get(0) {
            let ticker = first.trim();
            if !ticker.is_empty() {
                tickers.push(ticker.to_string());
            }
        }
    }

    Ok(tickers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn setup(dir_name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        write!(file, "{}", content).unwrap();
    }

    #[test]
    fn test_load_groups_by_market_and_category() {
        let dir = setup("mtf_scanner_catalog_test");
        write_file(&dir, "Brasil_Acoes.csv", "ticker\nPETR4.SA\nVALE3.SA\n");
        write_file(&dir, "US_Stocks.csv", "ticker\nAAPL\n MSFT \n\n");

        let catalog = AssetCatalog::load(&dir);
        assert_eq!(
            catalog.tickers("Brasil", "Acoes").unwrap(),
            &["PETR4.SA".to_string(), "VALE3.SA".to_string()]
        );
        assert_eq!(
            catalog.tickers("US", "Stocks").unwrap(),
            &["AAPL".to_string(), "MSFT".to_string()]
        );

        let mut all = catalog.all_tickers();
        all.sort();
        assert_eq!(all.len(), 4);

        assert_eq!(catalog.counts()["US"]["Stocks"], 2);
    }

    #[test]
    fn test_missing_directory_is_empty_catalog() {
        let catalog = AssetCatalog::load(Path::new("/definitely/not/here"));
        assert!(catalog.is_empty());
        assert!(catalog.all_tickers().is_empty());
    }

    #[test]
    fn test_file_without_separator_goes_to_other() {
        let dir = setup("mtf_scanner_catalog_test_other");
        write_file(&dir, "watchlist.csv", "ticker\nBTC-USD\n");

        let catalog = AssetCatalog::load(&dir);
        assert_eq!(
            catalog.tickers("Other", "watchlist").unwrap(),
            &["BTC-USD".to_string()]
        );
    }
}
