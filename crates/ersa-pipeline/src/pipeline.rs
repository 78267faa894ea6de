use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use ersa_ledger::UsageLedger;
use ersa_models::config::UniverseConfig;
use ersa_models::market::{
    exchange_display, FundamentalRecord, InstrumentMeta, MarketCapBand, Rejection, StockCard,
    TickerUniverseEntry,
};
use ersa_models::run::TriggerKind;
use ersa_models::usage::{Provider, UsageRecord};
use ersa_models::AgentRole;

use crate::error::PipelineError;
use crate::gates;
use crate::memory::VerdictCache;
use crate::provider::MarketDataProvider;
use crate::rolling::enrich_bars;
use crate::store::MarketStore;

/// Result of one pipeline pass: a validated data bundle, or the first
/// gate's typed rejection. Infrastructure failures are `Err`, never a
/// rejection.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Validated(ValidatedBundle),
    Rejected(Rejection),
}

/// Everything downstream agents need after a successful pass.
#[derive(Debug, Clone)]
pub struct ValidatedBundle {
    pub card: StockCard,
    pub fundamentals: Option<FundamentalRecord>,
    pub rows_stored: usize,
    pub history_days: u32,
}

/// Multi-stage market-data validation and caching pipeline.
///
/// Gates a symbol through the universe rules, then fetches, enriches, and
/// merge-upserts OHLCV and fundamentals. Every pull is written to the usage
/// ledger as a zero-cost row for audit parity with billable calls.
pub struct ValidationPipeline {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<MarketStore>,
    ledger: Arc<UsageLedger>,
    verdicts: VerdictCache,
    config: UniverseConfig,
}

impl ValidationPipeline {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<MarketStore>,
        ledger: Arc<UsageLedger>,
        config: UniverseConfig,
    ) -> Self {
        let verdicts = VerdictCache::new(
            config.verdict_cache_capacity,
            Duration::from_secs(config.verdict_ttl_secs),
        );
        Self {
            provider,
            store,
            ledger,
            verdicts,
            config,
        }
    }

    /// Validate `symbol` and, on a full pass, fetch and cache its market
    /// data. `run_id` ties the audit row to an analysis run when one exists.
    pub async fn run(
        &self,
        symbol: &str,
        triggered_by: TriggerKind,
        run_id: Option<Uuid>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let symbol = symbol.trim().to_ascii_uppercase();

        // Gate 1 is pure; no reason to touch the cache or provider first.
        if let Err(rejection) = gates::check_format(&symbol) {
            return Ok(PipelineOutcome::Rejected(rejection));
        }

        // A fresh cached rejection short-circuits the provider entirely.
        if let Some(entry) = self.fresh_verdict(&symbol).await? {
            if let Some(rejection) = entry.rejection {
                info!(symbol = %symbol, gate = rejection.kind(), "Cached verdict rejection");
                return Ok(PipelineOutcome::Rejected(rejection));
            }
        }

        let started_at = Utc::now();

        let meta = match self.provider.instrument_meta(&symbol).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                let rejection = Rejection::NotFound {
                    symbol: symbol.clone(),
                };
                self.remember_verdict(&symbol, Some(&rejection), None, None)
                    .await?;
                return Ok(PipelineOutcome::Rejected(rejection));
            }
            Err(e) => {
                self.audit_failed_pull(&symbol, triggered_by, run_id, started_at, &e);
                return Err(e);
            }
        };

        if let Err(rejection) = gates::check_instrument(&meta, &self.config) {
            self.remember_verdict(&symbol, Some(&rejection), Some(&meta), None)
                .await?;
            return Ok(PipelineOutcome::Rejected(rejection));
        }

        let bars = match self
            .provider
            .daily_history(&symbol, self.config.history_window_days)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                self.audit_failed_pull(&symbol, triggered_by, run_id, started_at, &e);
                return Err(e);
            }
        };

        if let Err(rejection) = gates::check_history(bars.len(), &self.config) {
            self.remember_verdict(&symbol, Some(&rejection), Some(&meta), Some(bars.len() as u32))
                .await?;
            return Ok(PipelineOutcome::Rejected(rejection));
        }

        // All gates passed: enrich, store, remember the verdict, audit the pull.
        let pulled_at = Utc::now();
        let records = enrich_bars(&symbol, &bars, pulled_at);
        let rows_stored = self.store.upsert_prices(&records)?;

        let fundamentals = match self.provider.fundamentals(&symbol).await {
            Ok(Some(mut record)) => {
                if record.market_cap_band.is_none() {
                    record.market_cap_band = record.market_cap.map(MarketCapBand::from_market_cap);
                }
                self.store.upsert_fundamentals(&record)?;
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                // Prices are already cached; a missing fundamentals pull
                // degrades the bundle rather than failing the pass.
                warn!(symbol = %symbol, error = %e, "Fundamentals fetch failed");
                None
            }
        };

        self.remember_verdict(&symbol, None, Some(&meta), Some(bars.len() as u32))
            .await?;

        let completed_at = Utc::now();
        let audit = UsageRecord::builder(
            AgentRole::DataEngineer,
            Provider::MarketData,
            triggered_by,
            started_at,
            completed_at,
        );
        let audit = match run_id {
            Some(id) => audit.run_id(id),
            None => audit,
        };
        self.ledger.record(&audit.symbol(symbol.clone()).build())?;

        let card = build_card(&meta, records.last());
        info!(
            symbol = %symbol,
            rows = rows_stored,
            history_days = bars.len(),
            "Pipeline pass complete"
        );

        Ok(PipelineOutcome::Validated(ValidatedBundle {
            card,
            fundamentals,
            rows_stored,
            history_days: bars.len() as u32,
        }))
    }

    /// Verdict lookup: moka first, then the universe table, honoring the
    /// TTL. SQLite hits are promoted to the hot cache.
    async fn fresh_verdict(
        &self,
        symbol: &str,
    ) -> Result<Option<TickerUniverseEntry>, PipelineError> {
        if let Some(entry) = self.verdicts.get(symbol).await {
            return Ok(Some(entry));
        }

        if let Some(entry) = self.store.get_universe_entry(symbol)? {
            let age = Utc::now() - entry.checked_at;
            if age < chrono::Duration::seconds(self.config.verdict_ttl_secs as i64) {
                self.verdicts.insert(entry.clone()).await;
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn remember_verdict(
        &self,
        symbol: &str,
        rejection: Option<&Rejection>,
        meta: Option<&InstrumentMeta>,
        history_days: Option<u32>,
    ) -> Result<(), PipelineError> {
        let entry = TickerUniverseEntry {
            symbol: symbol.to_string(),
            rejection: rejection.cloned(),
            exchange: meta.map(|m| m.exchange.clone()),
            quote_type: meta.map(|m| m.quote_type.clone()),
            market_cap: meta.and_then(|m| m.market_cap),
            history_days,
            checked_at: Utc::now(),
        };
        self.store.put_universe_entry(&entry)?;
        self.verdicts.insert(entry).await;
        Ok(())
    }

    /// Audit a failed pull. A ledger write failure here must not mask the
    /// original error, so it is logged and swallowed.
    fn audit_failed_pull(
        &self,
        symbol: &str,
        triggered_by: TriggerKind,
        run_id: Option<Uuid>,
        started_at: chrono::DateTime<Utc>,
        error: &PipelineError,
    ) {
        let builder = UsageRecord::builder(
            AgentRole::DataEngineer,
            Provider::MarketData,
            triggered_by,
            started_at,
            Utc::now(),
        )
        .symbol(symbol)
        .error(error.to_string());
        let builder = match run_id {
            Some(id) => builder.run_id(id),
            None => builder,
        };
        if let Err(e) = self.ledger.record(&builder.build()) {
            warn!(symbol = %symbol, error = %e, "Failed to audit data pull");
        }
    }
}

/// Build the presentation snapshot, preferring provider quote fields and
/// falling back to the latest enriched bar.
fn build_card(
    meta: &InstrumentMeta,
    latest: Option<&ersa_models::market::PriceRecord>,
) -> StockCard {
    StockCard {
        symbol: meta.symbol.clone(),
        company_name: meta
            .company_name
            .clone()
            .unwrap_or_else(|| meta.symbol.clone()),
        exchange: exchange_display(&meta.exchange).to_string(),
        sector: meta.sector.clone().unwrap_or_else(|| "N/A".to_string()),
        industry: meta.industry.clone().unwrap_or_else(|| "N/A".to_string()),
        current_price: meta.current_price.or_else(|| latest.map(|r| r.close)),
        change_usd: meta
            .change_usd
            .or_else(|| latest.and_then(|r| r.daily_change_usd)),
        change_pct: meta
            .change_pct
            .or_else(|| latest.and_then(|r| r.daily_change_pct)),
        volume: meta.volume.or_else(|| latest.map(|r| r.volume)),
        market_cap: meta.market_cap,
        high_52w: latest.map(|r| r.high_52w),
        low_52w: latest.map(|r| r.low_52w),
        fetched_at: Utc::now(),
    }
}
