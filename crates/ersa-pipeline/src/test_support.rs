//! Test support: a canned market-data provider for exercising the pipeline
//! without network access.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use ersa_models::market::{DailyBar, FundamentalRecord, InstrumentMeta, PeriodType};

use crate::error::PipelineError;
use crate::provider::MarketDataProvider;

/// A provider serving fixed data, with per-method call counters and
/// optional failure injection.
pub struct StaticProvider {
    pub meta: Option<InstrumentMeta>,
    pub bars: Vec<DailyBar>,
    pub fundamentals: Option<FundamentalRecord>,
    pub fail_meta: bool,
    pub fail_history: bool,
    pub meta_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
}

impl StaticProvider {
    /// A $2B-cap NASDAQ equity with `history_days` bars of gently rising
    /// prices.
    pub fn equity(symbol: &str, history_days: usize) -> Self {
        Self {
            meta: Some(sample_meta(symbol, "EQUITY", "NMS", Some(2_000_000_000))),
            bars: sample_bars(history_days),
            fundamentals: Some(sample_fundamentals(symbol)),
            fail_meta: false,
            fail_history: false,
            meta_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
        }
    }

    pub fn unknown_symbol() -> Self {
        Self {
            meta: None,
            bars: Vec::new(),
            fundamentals: None,
            fail_meta: false,
            fail_history: false,
            meta_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_meta(mut self, meta: InstrumentMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn failing_history(mut self) -> Self {
        self.fail_history = true;
        self
    }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn instrument_meta(
        &self,
        _symbol: &str,
    ) -> Result<Option<InstrumentMeta>, PipelineError> {
        self.meta_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_meta {
            return Err(PipelineError::Provider("meta fetch failed".to_string()));
        }
        Ok(self.meta.clone())
    }

    async fn daily_history(
        &self,
        _symbol: &str,
        _window_days: u32,
    ) -> Result<Vec<DailyBar>, PipelineError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history {
            return Err(PipelineError::Provider("history fetch failed".to_string()));
        }
        Ok(self.bars.clone())
    }

    async fn fundamentals(
        &self,
        _symbol: &str,
    ) -> Result<Option<FundamentalRecord>, PipelineError> {
        Ok(self.fundamentals.clone())
    }
}

pub fn sample_meta(
    symbol: &str,
    quote_type: &str,
    exchange: &str,
    market_cap: Option<i64>,
) -> InstrumentMeta {
    InstrumentMeta {
        symbol: symbol.to_string(),
        company_name: Some(format!("{symbol} Corp")),
        quote_type: quote_type.to_string(),
        exchange: exchange.to_string(),
        market_cap,
        sector: Some("Technology".to_string()),
        industry: Some("Software".to_string()),
        current_price: Some(Decimal::new(10_050, 2)),
        change_usd: Some(Decimal::new(35, 2)),
        change_pct: Some(Decimal::new(35, 4)),
        volume: Some(1_200_000),
    }
}

pub fn sample_bars(count: usize) -> Vec<DailyBar> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    (0..count)
        .map(|i| {
            let close = Decimal::new(10_000 + i as i64, 2);
            DailyBar {
                date: start + chrono::Days::new(i as u64),
                open: close - Decimal::new(50, 2),
                high: close + Decimal::new(100, 2),
                low: close - Decimal::new(100, 2),
                close,
                adj_close: close,
                volume: 1_000_000 + (i as u64 % 7) * 10_000,
            }
        })
        .collect()
}

pub fn sample_fundamentals(symbol: &str) -> FundamentalRecord {
    FundamentalRecord {
        symbol: symbol.to_string(),
        period_end: Utc::now().date_naive(),
        period_type: PeriodType::Snapshot,
        company_name: Some(format!("{symbol} Corp")),
        exchange: Some("NMS".to_string()),
        sector: Some("Technology".to_string()),
        industry: Some("Software".to_string()),
        market_cap: Some(2_000_000_000),
        market_cap_band: None,
        pe_ratio_ttm: Some(Decimal::new(245, 1)),
        pe_ratio_forward: Some(Decimal::new(221, 1)),
        pb_ratio: None,
        ps_ratio: None,
        profit_margin: Some(Decimal::new(1830, 4)),
        operating_margin: None,
        return_on_equity: None,
        revenue_growth_yoy: Some(Decimal::new(820, 4)),
        earnings_growth_yoy: None,
        total_revenue: Some(900_000_000),
        net_income: Some(160_000_000),
        eps_ttm: Some(Decimal::new(410, 2)),
        total_cash: None,
        total_debt: None,
        free_cash_flow: None,
        dividend_yield: None,
        analyst_target_mean: Some(Decimal::new(11_500, 2)),
        pulled_at: Utc::now(),
    }
}
