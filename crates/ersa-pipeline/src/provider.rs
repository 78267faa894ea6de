use async_trait::async_trait;

use ersa_models::market::{DailyBar, FundamentalRecord, InstrumentMeta};

use crate::error::PipelineError;

/// Boundary to the external market-data provider.
///
/// Quotes are delayed 15-20 minutes; nothing behind this trait is
/// real-time. Concrete HTTP providers implement this outside the core.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Instrument metadata for a symbol. `None` when the provider does not
    /// know the symbol.
    async fn instrument_meta(&self, symbol: &str)
        -> Result<Option<InstrumentMeta>, PipelineError>;

    /// Daily OHLCV bars covering up to `window_days` calendar days,
    /// oldest first.
    async fn daily_history(
        &self,
        symbol: &str,
        window_days: u32,
    ) -> Result<Vec<DailyBar>, PipelineError>;

    /// Latest fundamentals snapshot, when the provider has one.
    async fn fundamentals(&self, symbol: &str)
        -> Result<Option<FundamentalRecord>, PipelineError>;
}
