use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One raw OHLCV bar as returned by the market-data provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: u64,
}

/// One enriched price row, keyed by (symbol, date). At most one row per key;
/// the derived fields are functions of the row's own trailing window and are
/// recomputed on every upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: u64,
    /// Change from the previous close; None on the first bar of the window.
    pub daily_change_usd: Option<Decimal>,
    pub daily_change_pct: Option<Decimal>,
    /// Trailing 252-trading-day high/low.
    pub high_52w: Decimal,
    pub low_52w: Decimal,
    pub avg_volume_10d: u64,
    pub avg_volume_30d: u64,
    pub pulled_at: DateTime<Utc>,
}

impl PriceRecord {
    pub fn builder(symbol: impl Into<String>, bar: DailyBar) -> PriceRecordBuilder {
        PriceRecordBuilder::new(symbol, bar)
    }
}

/// Typed builder for `PriceRecord`: the bar supplies the required OHLCV
/// fields, derived fields are set explicitly before `build()`.
#[derive(Debug, Clone)]
pub struct PriceRecordBuilder {
    record: PriceRecord,
}

impl PriceRecordBuilder {
    pub fn new(symbol: impl Into<String>, bar: DailyBar) -> Self {
        Self {
            record: PriceRecord {
                symbol: symbol.into(),
                date: bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                adj_close: bar.adj_close,
                volume: bar.volume,
                daily_change_usd: None,
                daily_change_pct: None,
                high_52w: bar.high,
                low_52w: bar.low,
                avg_volume_10d: bar.volume,
                avg_volume_30d: bar.volume,
                pulled_at: Utc::now(),
            },
        }
    }

    pub fn daily_change(mut self, usd: Decimal, pct: Decimal) -> Self {
        self.record.daily_change_usd = Some(usd);
        self.record.daily_change_pct = Some(pct);
        self
    }

    pub fn range_52w(mut self, high: Decimal, low: Decimal) -> Self {
        self.record.high_52w = high;
        self.record.low_52w = low;
        self
    }

    pub fn avg_volumes(mut self, avg_10d: u64, avg_30d: u64) -> Self {
        self.record.avg_volume_10d = avg_10d;
        self.record.avg_volume_30d = avg_30d;
        self
    }

    pub fn pulled_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.pulled_at = at;
        self
    }

    pub fn build(self) -> PriceRecord {
        self.record
    }
}

/// Reporting period of a fundamentals row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    /// Point-in-time snapshot of trailing metrics.
    Snapshot,
    Quarterly,
    Annual,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Snapshot => "snapshot",
            PeriodType::Quarterly => "quarterly",
            PeriodType::Annual => "annual",
        }
    }
}

/// Market-cap band used for reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketCapBand {
    Mega,
    Large,
    Mid,
    Small,
}

impl MarketCapBand {
    pub fn from_market_cap(market_cap: i64) -> MarketCapBand {
        if market_cap >= 200_000_000_000 {
            MarketCapBand::Mega
        } else if market_cap >= 10_000_000_000 {
            MarketCapBand::Large
        } else if market_cap >= 2_000_000_000 {
            MarketCapBand::Mid
        } else {
            MarketCapBand::Small
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCapBand::Mega => "mega",
            MarketCapBand::Large => "large",
            MarketCapBand::Mid => "mid",
            MarketCapBand::Small => "small",
        }
    }
}

/// One fundamentals row, keyed by (symbol, period_end, period_type).
/// Later pulls overwrite via merge, never duplicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundamentalRecord {
    pub symbol: String,
    pub period_end: NaiveDate,
    pub period_type: PeriodType,
    pub company_name: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<i64>,
    pub market_cap_band: Option<MarketCapBand>,
    pub pe_ratio_ttm: Option<Decimal>,
    pub pe_ratio_forward: Option<Decimal>,
    pub pb_ratio: Option<Decimal>,
    pub ps_ratio: Option<Decimal>,
    pub profit_margin: Option<Decimal>,
    pub operating_margin: Option<Decimal>,
    pub return_on_equity: Option<Decimal>,
    pub revenue_growth_yoy: Option<Decimal>,
    pub earnings_growth_yoy: Option<Decimal>,
    pub total_revenue: Option<i64>,
    pub net_income: Option<i64>,
    pub eps_ttm: Option<Decimal>,
    pub total_cash: Option<i64>,
    pub total_debt: Option<i64>,
    pub free_cash_flow: Option<i64>,
    pub dividend_yield: Option<Decimal>,
    pub analyst_target_mean: Option<Decimal>,
    pub pulled_at: DateTime<Utc>,
}

/// Instrument metadata reported by the market-data provider, consumed by
/// the validation gates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentMeta {
    pub symbol: String,
    pub company_name: Option<String>,
    /// Provider quote type, e.g. "EQUITY", "ETF".
    pub quote_type: String,
    /// Provider exchange code, e.g. "NYQ", "NMS".
    pub exchange: String,
    pub market_cap: Option<i64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub current_price: Option<Decimal>,
    pub change_usd: Option<Decimal>,
    pub change_pct: Option<Decimal>,
    pub volume: Option<u64>,
}

/// Typed rejection from the validation gate sequence. The first failing
/// gate determines the rejection; later gates are never evaluated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum Rejection {
    Format { symbol: String },
    NotFound { symbol: String },
    QuoteType { quote_type: String },
    Exchange { exchange: String },
    MarketCap { market_cap: Option<i64> },
    History { days: u32, required: u32 },
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::Format { .. } => "format",
            Rejection::NotFound { .. } => "not_found",
            Rejection::QuoteType { .. } => "quote_type",
            Rejection::Exchange { .. } => "exchange",
            Rejection::MarketCap { .. } => "market_cap",
            Rejection::History { .. } => "history",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Format { symbol } => {
                write!(
                    f,
                    "'{symbol}' is not a valid ticker format; use 1-5 letters (e.g. AAPL, MSFT)"
                )
            }
            Rejection::NotFound { symbol } => {
                write!(f, "'{symbol}' was not found; verify the ticker symbol")
            }
            Rejection::QuoteType { quote_type } => {
                write!(f, "quote type '{quote_type}' is not a common equity")
            }
            Rejection::Exchange { exchange } => {
                write!(f, "'{exchange}' is not an allow-listed exchange")
            }
            Rejection::MarketCap { market_cap } => match market_cap {
                Some(cap) => write!(f, "market cap ${:.0}M is below the floor", *cap as f64 / 1e6),
                None => write!(f, "market cap is unknown"),
            },
            Rejection::History { days, required } => {
                write!(f, "only {days} trading days of history; {required} required")
            }
        }
    }
}

/// Cached validation verdict for one symbol, used to short-circuit repeat
/// validation within its TTL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerUniverseEntry {
    pub symbol: String,
    pub rejection: Option<Rejection>,
    pub exchange: Option<String>,
    pub quote_type: Option<String>,
    pub market_cap: Option<i64>,
    pub history_days: Option<u32>,
    pub checked_at: DateTime<Utc>,
}

impl TickerUniverseEntry {
    pub fn is_valid(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Compact data snapshot returned with a validated bundle for the
/// presentation layer. Quotes are delayed; nothing here is real-time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockCard {
    pub symbol: String,
    pub company_name: String,
    pub exchange: String,
    pub sector: String,
    pub industry: String,
    pub current_price: Option<Decimal>,
    pub change_usd: Option<Decimal>,
    pub change_pct: Option<Decimal>,
    pub volume: Option<u64>,
    pub market_cap: Option<i64>,
    pub high_52w: Option<Decimal>,
    pub low_52w: Option<Decimal>,
    pub fetched_at: DateTime<Utc>,
}

impl StockCard {
    /// Human-readable market cap, e.g. "$2.95T", "$850B", "$600M".
    pub fn market_cap_fmt(&self) -> String {
        match self.market_cap {
            None => "N/A".to_string(),
            Some(mc) if mc >= 1_000_000_000_000 => {
                format!("${:.2}T", mc as f64 / 1e12)
            }
            Some(mc) if mc >= 1_000_000_000 => format!("${:.2}B", mc as f64 / 1e9),
            Some(mc) => format!("${:.0}M", mc as f64 / 1e6),
        }
    }

    pub fn change_sign(&self) -> &'static str {
        match self.change_usd {
            Some(c) if c < Decimal::ZERO => "▼",
            Some(_) => "▲",
            None => "",
        }
    }
}

/// Map a provider exchange code to its display name.
pub fn exchange_display(code: &str) -> &str {
    match code {
        "NYQ" | "NYSE" => "NYSE",
        "NMS" | "NGM" | "NCM" | "NASDAQ" => "NASDAQ",
        other => other,
    }
}
