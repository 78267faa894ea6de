use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use ersa_models::market::{DailyBar, FundamentalRecord, InstrumentMeta};
use ersa_pipeline::{MarketDataProvider, PipelineError};

/// Market-data provider backed by a local directory tree.
///
/// Layout: `<data_path>/<SYMBOL>/meta.json`, `bars.json`,
/// `fundamentals.json`, each holding the serde form of the corresponding
/// model type. An external fetcher keeps the directory current; a missing
/// symbol directory means the symbol is unknown.
pub struct FileMarketData {
    data_path: PathBuf,
}

impl FileMarketData {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
        }
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.data_path.join(symbol)
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        symbol: &str,
        file: &str,
    ) -> Result<Option<T>, PipelineError> {
        let path = self.symbol_dir(symbol).join(file);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| PipelineError::Provider(format!("{}: {e}", path.display())))?;
        let value = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Provider(format!("{}: {e}", path.display())))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl MarketDataProvider for FileMarketData {
    async fn instrument_meta(
        &self,
        symbol: &str,
    ) -> Result<Option<InstrumentMeta>, PipelineError> {
        debug!(symbol = %symbol, path = %self.data_path.display(), "Reading instrument meta");
        self.read_json(symbol, "meta.json")
    }

    async fn daily_history(
        &self,
        symbol: &str,
        window_days: u32,
    ) -> Result<Vec<DailyBar>, PipelineError> {
        let mut bars: Vec<DailyBar> = self.read_json(symbol, "bars.json")?.unwrap_or_default();
        bars.sort_by_key(|b| b.date);

        // Trim to the requested calendar window
        if let Some(last) = bars.last() {
            let cutoff = last.date - chrono::Days::new(window_days as u64);
            bars.retain(|b| b.date >= cutoff);
        }
        Ok(bars)
    }

    async fn fundamentals(
        &self,
        symbol: &str,
    ) -> Result<Option<FundamentalRecord>, PipelineError> {
        self.read_json(symbol, "fundamentals.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn write_symbol(dir: &std::path::Path, symbol: &str, bar_count: u32) {
        let symbol_dir = dir.join(symbol);
        std::fs::create_dir_all(&symbol_dir).unwrap();

        let meta = InstrumentMeta {
            symbol: symbol.to_string(),
            company_name: Some("File Corp".to_string()),
            quote_type: "EQUITY".to_string(),
            exchange: "NYQ".to_string(),
            market_cap: Some(5_000_000_000),
            sector: None,
            industry: None,
            current_price: Some(dec!(42.00)),
            change_usd: None,
            change_pct: None,
            volume: None,
        };
        std::fs::write(
            symbol_dir.join("meta.json"),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let bars: Vec<DailyBar> = (0..bar_count)
            .map(|i| DailyBar {
                date: start + chrono::Days::new(i as u64),
                open: dec!(41.00),
                high: dec!(43.00),
                low: dec!(40.00),
                close: dec!(42.00),
                adj_close: dec!(42.00),
                volume: 100_000,
            })
            .collect();
        std::fs::write(
            symbol_dir.join("bars.json"),
            serde_json::to_string(&bars).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn reads_meta_and_bars() {
        let dir = tempfile::tempdir().unwrap();
        write_symbol(dir.path(), "FILE", 30);

        let provider = FileMarketData::new(dir.path());
        let meta = provider.instrument_meta("FILE").await.unwrap().unwrap();
        assert_eq!(meta.exchange, "NYQ");

        let bars = provider.daily_history("FILE", 730).await.unwrap();
        assert_eq!(bars.len(), 30);
        assert!(bars.windows(2).all(|w| w[0].date <= w[1].date));
    }

    #[tokio::test]
    async fn unknown_symbol_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileMarketData::new(dir.path());
        assert!(provider.instrument_meta("NOPE").await.unwrap().is_none());
        assert!(provider.daily_history("NOPE", 730).await.unwrap().is_empty());
        assert!(provider.fundamentals("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_window_trims_old_bars() {
        let dir = tempfile::tempdir().unwrap();
        write_symbol(dir.path(), "FILE", 100);

        let provider = FileMarketData::new(dir.path());
        let bars = provider.daily_history("FILE", 10).await.unwrap();
        assert_eq!(bars.len(), 11);
    }
}
