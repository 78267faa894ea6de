use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;

use ersa_models::market::{FundamentalRecord, PeriodType, PriceRecord, TickerUniverseEntry};

use crate::error::PipelineError;

/// Market cache schema. Prices are decimal strings (exact round-trip, no
/// SQL arithmetic needed); volumes and market caps are integers.
pub const MARKET_DDL: &str = "\
CREATE TABLE IF NOT EXISTS stock_prices (
    symbol              TEXT NOT NULL,
    trade_date          TEXT NOT NULL,
    open_price          TEXT NOT NULL,
    high_price          TEXT NOT NULL,
    low_price           TEXT NOT NULL,
    close_price         TEXT NOT NULL,
    adj_close           TEXT NOT NULL,
    volume              INTEGER NOT NULL,
    daily_change_usd    TEXT,
    daily_change_pct    TEXT,
    high_52w            TEXT NOT NULL,
    low_52w             TEXT NOT NULL,
    avg_volume_10d      INTEGER NOT NULL,
    avg_volume_30d      INTEGER NOT NULL,
    pulled_at           TEXT NOT NULL,
    PRIMARY KEY (symbol, trade_date)
);

CREATE TABLE IF NOT EXISTS stock_fundamentals (
    symbol              TEXT NOT NULL,
    period_end          TEXT NOT NULL,
    period_type         TEXT NOT NULL,
    company_name        TEXT,
    exchange            TEXT,
    sector              TEXT,
    industry            TEXT,
    market_cap          INTEGER,
    market_cap_band     TEXT,
    pe_ratio_ttm        TEXT,
    pe_ratio_forward    TEXT,
    pb_ratio            TEXT,
    ps_ratio            TEXT,
    profit_margin       TEXT,
    operating_margin    TEXT,
    return_on_equity    TEXT,
    revenue_growth_yoy  TEXT,
    earnings_growth_yoy TEXT,
    total_revenue       INTEGER,
    net_income          INTEGER,
    eps_ttm             TEXT,
    total_cash          INTEGER,
    total_debt          INTEGER,
    free_cash_flow      INTEGER,
    dividend_yield      TEXT,
    analyst_target_mean TEXT,
    pulled_at           TEXT NOT NULL,
    PRIMARY KEY (symbol, period_end, period_type)
);

CREATE TABLE IF NOT EXISTS ticker_universe (
    symbol          TEXT PRIMARY KEY,
    rejection_json  TEXT,
    exchange        TEXT,
    quote_type      TEXT,
    market_cap      INTEGER,
    history_days    INTEGER,
    checked_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_prices_symbol ON stock_prices(symbol);
CREATE INDEX IF NOT EXISTS idx_prices_date   ON stock_prices(trade_date);
CREATE INDEX IF NOT EXISTS idx_fund_symbol   ON stock_fundamentals(symbol);
";

/// Writable market-data store.
///
/// Opens the shared database in read-write mode with WAL so the ledger and
/// readers can work concurrently. All writes are merge-upserts: at most one
/// row ever exists per primary key, and a re-upsert replaces the previous
/// values wholesale, derived fields included.
pub struct MarketStore {
    conn: Mutex<Connection>,
}

impl MarketStore {
    pub fn open(path: &str) -> Result<Self, PipelineError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(MARKET_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, PipelineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MARKET_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PipelineError> {
        self.conn
            .lock()
            .map_err(|e| PipelineError::Unavailable(format!("store mutex poisoned: {e}")))
    }

    /// Batch-upsert price rows in one transaction. Returns the number of
    /// rows written.
    pub fn upsert_prices(&self, records: &[PriceRecord]) -> Result<usize, PipelineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO stock_prices (
                    symbol, trade_date, open_price, high_price, low_price, close_price,
                    adj_close, volume, daily_change_usd, daily_change_pct,
                    high_52w, low_52w, avg_volume_10d, avg_volume_30d, pulled_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                ON CONFLICT (symbol, trade_date) DO UPDATE SET
                    open_price       = excluded.open_price,
                    high_price       = excluded.high_price,
                    low_price        = excluded.low_price,
                    close_price      = excluded.close_price,
                    adj_close        = excluded.adj_close,
                    volume           = excluded.volume,
                    daily_change_usd = excluded.daily_change_usd,
                    daily_change_pct = excluded.daily_change_pct,
                    high_52w         = excluded.high_52w,
                    low_52w          = excluded.low_52w,
                    avg_volume_10d   = excluded.avg_volume_10d,
                    avg_volume_30d   = excluded.avg_volume_30d,
                    pulled_at        = excluded.pulled_at",
            )?;
            for record in records {
                stmt.execute(rusqlite::params![
                    record.symbol,
                    record.date,
                    record.open.to_string(),
                    record.high.to_string(),
                    record.low.to_string(),
                    record.close.to_string(),
                    record.adj_close.to_string(),
                    record.volume as i64,
                    record.daily_change_usd.map(|d| d.to_string()),
                    record.daily_change_pct.map(|d| d.to_string()),
                    record.high_52w.to_string(),
                    record.low_52w.to_string(),
                    record.avg_volume_10d as i64,
                    record.avg_volume_30d as i64,
                    record.pulled_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Upsert one fundamentals row; later pulls overwrite, never duplicate.
    pub fn upsert_fundamentals(&self, record: &FundamentalRecord) -> Result<(), PipelineError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO stock_fundamentals (
                symbol, period_end, period_type, company_name, exchange, sector, industry,
                market_cap, market_cap_band, pe_ratio_ttm, pe_ratio_forward, pb_ratio,
                ps_ratio, profit_margin, operating_margin, return_on_equity,
                revenue_growth_yoy, earnings_growth_yoy, total_revenue, net_income, eps_ttm,
                total_cash, total_debt, free_cash_flow, dividend_yield, analyst_target_mean,
                pulled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                      ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)
            ON CONFLICT (symbol, period_end, period_type) DO UPDATE SET
                company_name        = excluded.company_name,
                exchange            = excluded.exchange,
                sector              = excluded.sector,
                industry            = excluded.industry,
                market_cap          = excluded.market_cap,
                market_cap_band     = excluded.market_cap_band,
                pe_ratio_ttm        = excluded.pe_ratio_ttm,
                pe_ratio_forward    = excluded.pe_ratio_forward,
                pb_ratio            = excluded.pb_ratio,
                ps_ratio            = excluded.ps_ratio,
                profit_margin       = excluded.profit_margin,
                operating_margin    = excluded.operating_margin,
                return_on_equity    = excluded.return_on_equity,
                revenue_growth_yoy  = excluded.revenue_growth_yoy,
                earnings_growth_yoy = excluded.earnings_growth_yoy,
                total_revenue       = excluded.total_revenue,
                net_income          = excluded.net_income,
                eps_ttm             = excluded.eps_ttm,
                total_cash          = excluded.total_cash,
                total_debt          = excluded.total_debt,
                free_cash_flow      = excluded.free_cash_flow,
                dividend_yield      = excluded.dividend_yield,
                analyst_target_mean = excluded.analyst_target_mean,
                pulled_at           = excluded.pulled_at",
            rusqlite::params![
                record.symbol,
                record.period_end,
                record.period_type.as_str(),
                record.company_name,
                record.exchange,
                record.sector,
                record.industry,
                record.market_cap,
                record.market_cap_band.map(|b| b.as_str()),
                record.pe_ratio_ttm.map(|d| d.to_string()),
                record.pe_ratio_forward.map(|d| d.to_string()),
                record.pb_ratio.map(|d| d.to_string()),
                record.ps_ratio.map(|d| d.to_string()),
                record.profit_margin.map(|d| d.to_string()),
                record.operating_margin.map(|d| d.to_string()),
                record.return_on_equity.map(|d| d.to_string()),
                record.revenue_growth_yoy.map(|d| d.to_string()),
                record.earnings_growth_yoy.map(|d| d.to_string()),
                record.total_revenue,
                record.net_income,
                record.eps_ttm.map(|d| d.to_string()),
                record.total_cash,
                record.total_debt,
                record.free_cash_flow,
                record.dividend_yield.map(|d| d.to_string()),
                record.analyst_target_mean.map(|d| d.to_string()),
                record.pulled_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent price rows for a symbol, newest first.
    pub fn recent_prices(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<PriceRecord>, PipelineError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, trade_date, open_price, high_price, low_price, close_price,
                    adj_close, volume, daily_change_usd, daily_change_pct,
                    high_52w, low_52w, avg_volume_10d, avg_volume_30d, pulled_at
             FROM stock_prices WHERE symbol = ?1 ORDER BY trade_date DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![symbol, limit as i64], |row| {
                Ok(RawPriceRow {
                    symbol: row.get(0)?,
                    date: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    adj_close: row.get(6)?,
                    volume: row.get(7)?,
                    daily_change_usd: row.get(8)?,
                    daily_change_pct: row.get(9)?,
                    high_52w: row.get(10)?,
                    low_52w: row.get(11)?,
                    avg_volume_10d: row.get(12)?,
                    avg_volume_30d: row.get(13)?,
                    pulled_at: row.get(14)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawPriceRow::into_record).collect()
    }

    pub fn price_count(&self, symbol: &str) -> Result<usize, PipelineError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stock_prices WHERE symbol = ?1",
            rusqlite::params![symbol],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Cached validation verdict, if one has been stored.
    pub fn get_universe_entry(
        &self,
        symbol: &str,
    ) -> Result<Option<TickerUniverseEntry>, PipelineError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, rejection_json, exchange, quote_type, market_cap, history_days, \
                    checked_at \
             FROM ticker_universe WHERE symbol = ?1",
        )?;
        let result = stmt.query_row(rusqlite::params![symbol], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, DateTime<Utc>>(6)?,
            ))
        });
        match result {
            Ok((symbol, rejection_json, exchange, quote_type, market_cap, history_days, checked_at)) => {
                let rejection = rejection_json
                    .map(|json| {
                        serde_json::from_str(&json)
                            .map_err(|e| PipelineError::Corrupt(e.to_string()))
                    })
                    .transpose()?;
                Ok(Some(TickerUniverseEntry {
                    symbol,
                    rejection,
                    exchange,
                    quote_type,
                    market_cap,
                    history_days: history_days.map(|d| d as u32),
                    checked_at,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PipelineError::Sqlite(e)),
        }
    }

    pub fn put_universe_entry(&self, entry: &TickerUniverseEntry) -> Result<(), PipelineError> {
        let rejection_json = entry
            .rejection
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| PipelineError::Corrupt(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO ticker_universe (
                symbol, rejection_json, exchange, quote_type, market_cap, history_days, checked_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (symbol) DO UPDATE SET
                rejection_json = excluded.rejection_json,
                exchange       = excluded.exchange,
                quote_type     = excluded.quote_type,
                market_cap     = excluded.market_cap,
                history_days   = excluded.history_days,
                checked_at     = excluded.checked_at",
            rusqlite::params![
                entry.symbol,
                rejection_json,
                entry.exchange,
                entry.quote_type,
                entry.market_cap,
                entry.history_days.map(|d| d as i64),
                entry.checked_at,
            ],
        )?;
        Ok(())
    }
}

struct RawPriceRow {
    symbol: String,
    date: NaiveDate,
    open: String,
    high: String,
    low: String,
    close: String,
    adj_close: String,
    volume: i64,
    daily_change_usd: Option<String>,
    daily_change_pct: Option<String>,
    high_52w: String,
    low_52w: String,
    avg_volume_10d: i64,
    avg_volume_30d: i64,
    pulled_at: DateTime<Utc>,
}

impl RawPriceRow {
    fn into_record(self) -> Result<PriceRecord, PipelineError> {
        let parse = |s: &str| {
            Decimal::from_str(s).map_err(|e| PipelineError::Corrupt(format!("{s}: {e}")))
        };
        let parse_opt = |s: &Option<String>| match s {
            Some(text) => parse(text).map(Some),
            None => Ok(None),
        };
        Ok(PriceRecord {
            symbol: self.symbol,
            date: self.date,
            open: parse(&self.open)?,
            high: parse(&self.high)?,
            low: parse(&self.low)?,
            close: parse(&self.close)?,
            adj_close: parse(&self.adj_close)?,
            volume: self.volume as u64,
            daily_change_usd: parse_opt(&self.daily_change_usd)?,
            daily_change_pct: parse_opt(&self.daily_change_pct)?,
            high_52w: parse(&self.high_52w)?,
            low_52w: parse(&self.low_52w)?,
            avg_volume_10d: self.avg_volume_10d as u64,
            avg_volume_30d: self.avg_volume_30d as u64,
            pulled_at: self.pulled_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ersa_models::market::{DailyBar, Rejection};
    use rust_decimal_macros::dec;

    fn make_record(symbol: &str, date: NaiveDate, volume: u64) -> PriceRecord {
        PriceRecord::builder(
            symbol,
            DailyBar {
                date,
                open: dec!(100.00),
                high: dec!(101.00),
                low: dec!(99.00),
                close: dec!(100.50),
                adj_close: dec!(100.50),
                volume,
            },
        )
        .daily_change(dec!(0.50), dec!(0.005))
        .range_52w(dec!(120.00), dec!(80.00))
        .avg_volumes(volume, volume)
        .build()
    }

    #[test]
    fn upsert_and_read_back_prices() {
        let store = MarketStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        store.upsert_prices(&[make_record("AAPL", date, 1_000)]).unwrap();

        let rows = store.recent_prices("AAPL", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, dec!(100.50));
        assert_eq!(rows[0].daily_change_usd, Some(dec!(0.50)));
        assert_eq!(rows[0].high_52w, dec!(120.00));
    }

    #[test]
    fn reupsert_replaces_row_and_derived_fields() {
        let store = MarketStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        store.upsert_prices(&[make_record("AAPL", date, 1_000)]).unwrap();

        // Second pull for the same (symbol, date) with different volume and
        // freshly recomputed rolling averages.
        let mut updated = make_record("AAPL", date, 2_000);
        updated.high_52w = dec!(125.00);
        store.upsert_prices(&[updated]).unwrap();

        assert_eq!(store.price_count("AAPL").unwrap(), 1);
        let rows = store.recent_prices("AAPL", 10).unwrap();
        assert_eq!(rows[0].volume, 2_000);
        assert_eq!(rows[0].high_52w, dec!(125.00));
    }

    #[test]
    fn prices_are_keyed_per_symbol() {
        let store = MarketStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        store.upsert_prices(&[make_record("AAPL", date, 1_000)]).unwrap();
        store.upsert_prices(&[make_record("MSFT", date, 3_000)]).unwrap();

        assert_eq!(store.price_count("AAPL").unwrap(), 1);
        assert_eq!(store.recent_prices("MSFT", 10).unwrap()[0].volume, 3_000);
    }

    #[test]
    fn fundamentals_merge_never_duplicates() {
        let store = MarketStore::open_in_memory().unwrap();
        let period_end = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let mut record = FundamentalRecord {
            symbol: "AAPL".to_string(),
            period_end,
            period_type: PeriodType::Snapshot,
            company_name: Some("Apple Inc.".to_string()),
            exchange: Some("NMS".to_string()),
            sector: Some("Technology".to_string()),
            industry: None,
            market_cap: Some(2_900_000_000_000),
            market_cap_band: Some(ersa_models::MarketCapBand::Mega),
            pe_ratio_ttm: Some(dec!(31.2)),
            pe_ratio_forward: None,
            pb_ratio: None,
            ps_ratio: None,
            profit_margin: Some(dec!(0.2531)),
            operating_margin: None,
            return_on_equity: None,
            revenue_growth_yoy: None,
            earnings_growth_yoy: None,
            total_revenue: Some(400_000_000_000),
            net_income: None,
            eps_ttm: Some(dec!(6.42)),
            total_cash: None,
            total_debt: None,
            free_cash_flow: None,
            dividend_yield: None,
            analyst_target_mean: Some(dec!(205.00)),
            pulled_at: Utc::now(),
        };
        store.upsert_fundamentals(&record).unwrap();

        record.pe_ratio_ttm = Some(dec!(30.8));
        store.upsert_fundamentals(&record).unwrap();

        let conn_count: i64 = {
            let conn = store.conn.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM stock_fundamentals", [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(conn_count, 1);
    }

    #[test]
    fn universe_verdict_roundtrip() {
        let store = MarketStore::open_in_memory().unwrap();
        assert!(store.get_universe_entry("AAPL").unwrap().is_none());

        let entry = TickerUniverseEntry {
            symbol: "AAPL".to_string(),
            rejection: None,
            exchange: Some("NMS".to_string()),
            quote_type: Some("EQUITY".to_string()),
            market_cap: Some(2_900_000_000_000),
            history_days: Some(503),
            checked_at: Utc::now(),
        };
        store.put_universe_entry(&entry).unwrap();

        let read = store.get_universe_entry("AAPL").unwrap().unwrap();
        assert!(read.is_valid());
        assert_eq!(read.history_days, Some(503));
    }

    #[test]
    fn universe_verdict_stores_rejections() {
        let store = MarketStore::open_in_memory().unwrap();
        let entry = TickerUniverseEntry {
            symbol: "TINY".to_string(),
            rejection: Some(Rejection::MarketCap {
                market_cap: Some(100_000_000),
            }),
            exchange: Some("NMS".to_string()),
            quote_type: Some("EQUITY".to_string()),
            market_cap: Some(100_000_000),
            history_days: None,
            checked_at: Utc::now(),
        };
        store.put_universe_entry(&entry).unwrap();
        // A later check overwrites the verdict in place
        store.put_universe_entry(&entry).unwrap();

        let read = store.get_universe_entry("TINY").unwrap().unwrap();
        assert!(!read.is_valid());
        assert_eq!(read.rejection.unwrap().kind(), "market_cap");
    }
}
