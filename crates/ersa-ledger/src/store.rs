use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use ersa_models::run::{AnalysisRun, RunStatus, TriggerKind};
use ersa_models::usage::{micros_to_usd, usd_to_micros, DailyAggregate, RunTotals, UsageRecord};
use ersa_models::AgentRole;

use crate::error::LedgerError;
use crate::schema::LEDGER_DDL;

/// Append-only usage ledger plus live daily aggregation.
///
/// Owns the `analysis_runs`, `api_usage`, and `agent_daily` tables. Usage
/// rows are immutable once inserted; the daily aggregate is a materialized
/// view maintained by an `ON CONFLICT DO UPDATE` merge that runs entirely
/// inside SQLite, so concurrent writers never lose an increment.
///
/// Access is synchronized via `Mutex` since `rusqlite::Connection` is not
/// `Sync`.
pub struct UsageLedger {
    conn: Mutex<Connection>,
}

impl UsageLedger {
    /// Open (or create) the ledger database. Applies the schema and enables
    /// WAL so readers don't block the writer.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(LEDGER_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory ledger for tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(LEDGER_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("ledger mutex poisoned: {e}")))
    }

    // ── Run lifecycle (invoked only by the orchestrator) ──

    pub fn create_run(&self, run: &AnalysisRun) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO analysis_runs (run_id, symbol, triggered_by, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                run.id.to_string(),
                run.symbol,
                run.triggered_by.as_str(),
                run.status.as_str(),
                run.created_at,
            ],
        )?;
        Ok(())
    }

    /// Close a run with its terminal status and the usage totals summed from
    /// this run's ledger rows.
    pub fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        failure_reason: Option<&str>,
        totals: &RunTotals,
    ) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE analysis_runs SET status = ?2, failure_reason = ?3, completed_at = ?4, \
             total_cost_micros = ?5, total_tokens = ?6, agent_calls = ?7 \
             WHERE run_id = ?1",
            rusqlite::params![
                run_id.to_string(),
                status.as_str(),
                failure_reason,
                Utc::now(),
                usd_to_micros(totals.total_cost),
                (totals.input_tokens + totals.output_tokens + totals.thinking_tokens) as i64,
                totals.calls as i64,
            ],
        )?;
        if updated == 0 {
            return Err(LedgerError::RunNotFound(run_id));
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: Uuid) -> Result<Option<AnalysisRun>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT run_id, symbol, triggered_by, status, failure_reason, created_at \
             FROM analysis_runs WHERE run_id = ?1",
        )?;
        let result = stmt.query_row(rusqlite::params![run_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, DateTime<Utc>>(5)?,
            ))
        });
        match result {
            Ok((id, symbol, triggered_by, status, failure_reason, created_at)) => {
                Ok(Some(AnalysisRun {
                    id: Uuid::parse_str(&id).map_err(|e| LedgerError::Corrupt(e.to_string()))?,
                    symbol,
                    triggered_by: TriggerKind::from_str(&triggered_by)
                        .map_err(LedgerError::Corrupt)?,
                    status: RunStatus::from_str(&status).map_err(LedgerError::Corrupt)?,
                    failure_reason,
                    created_at,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(LedgerError::Sqlite(e)),
        }
    }

    // ── Write side ──

    /// Append one immutable usage row and merge it into the daily aggregate
    /// for `(date(started_at), agent_role)`, in a single transaction.
    ///
    /// Safe to invoke any number of times for the same role on the same
    /// date: the aggregate merges on conflict rather than duplicating, and
    /// the running latency average is weighted by the previous call count.
    pub fn record(&self, record: &UsageRecord) -> Result<(), LedgerError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO api_usage (
                run_id, symbol, triggered_by, agent_role, provider, model, model_tier,
                started_at, completed_at, duration_ms, request_id,
                input_uncached_tokens, input_cached_tokens, cache_write_tokens,
                output_tokens, thinking_tokens, thinking_estimated,
                input_cost_micros, output_cost_micros, thinking_cost_micros, total_cost_micros,
                is_error, error_kind, attempt, created_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                      ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            rusqlite::params![
                record.run_id.map(|id| id.to_string()),
                record.symbol,
                record.triggered_by.as_str(),
                record.role.as_str(),
                record.provider.as_str(),
                record.model,
                record.tier.map(|t| t.as_str()),
                record.started_at,
                record.completed_at,
                record.duration_ms as i64,
                record.request_id,
                record.usage.input_uncached as i64,
                record.usage.input_cached as i64,
                record.usage.cache_write as i64,
                record.usage.output as i64,
                record.usage.thinking.count() as i64,
                record.usage.thinking.is_estimated(),
                usd_to_micros(record.cost.input_cost),
                usd_to_micros(record.cost.output_cost),
                usd_to_micros(record.cost.thinking_cost),
                usd_to_micros(record.cost.total_cost),
                record.is_error,
                record.error_kind,
                record.attempt as i64,
                record.aggregate_date(),
            ],
        )?;

        // Merge into the daily aggregate. All right-hand expressions see the
        // pre-update row, so the average is weighted by the old call count.
        tx.execute(
            "INSERT INTO agent_daily (
                log_date, agent_role, call_count, total_tokens, total_cost_micros,
                error_count, avg_latency_ms
            ) VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
            ON CONFLICT (log_date, agent_role) DO UPDATE SET
                avg_latency_ms    = (avg_latency_ms * call_count + excluded.avg_latency_ms)
                                    / (call_count + 1),
                call_count        = call_count + 1,
                total_tokens      = total_tokens + excluded.total_tokens,
                total_cost_micros = total_cost_micros + excluded.total_cost_micros,
                error_count       = error_count + excluded.error_count",
            rusqlite::params![
                record.aggregate_date(),
                record.role.as_str(),
                record.usage.total() as i64,
                usd_to_micros(record.cost.total_cost),
                record.is_error as i64,
                record.duration_ms as f64,
            ],
        )?;

        tx.commit()?;

        debug!(
            role = %record.role,
            cost = %record.cost.total_cost,
            error = record.is_error,
            "Recorded usage row"
        );
        Ok(())
    }

    // ── Read side ──

    /// Summed usage for one run, used for budget checks.
    pub fn run_usage(&self, run_id: Uuid) -> Result<RunTotals, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*),
                    COALESCE(SUM(total_cost_micros), 0),
                    COALESCE(SUM(input_uncached_tokens + input_cached_tokens + cache_write_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(thinking_tokens), 0),
                    COALESCE(SUM(input_cached_tokens), 0)
             FROM api_usage WHERE run_id = ?1",
        )?;
        let totals = stmt.query_row(rusqlite::params![run_id.to_string()], |row| {
            Ok(RunTotals {
                calls: row.get::<_, i64>(0)? as u64,
                total_cost: micros_to_usd(row.get::<_, i64>(1)?),
                input_tokens: row.get::<_, i64>(2)? as u64,
                output_tokens: row.get::<_, i64>(3)? as u64,
                thinking_tokens: row.get::<_, i64>(4)? as u64,
                cached_tokens: row.get::<_, i64>(5)? as u64,
            })
        })?;
        Ok(totals)
    }

    /// Total spend across all runs on one calendar date.
    pub fn day_usage(&self, date: NaiveDate) -> Result<Decimal, LedgerError> {
        let conn = self.lock()?;
        let micros: i64 = conn.query_row(
            "SELECT COALESCE(SUM(total_cost_micros), 0) FROM api_usage WHERE created_date = ?1",
            rusqlite::params![date],
            |row| row.get(0),
        )?;
        Ok(micros_to_usd(micros))
    }

    /// The live aggregate row for one (date, role) key, if any calls were
    /// recorded.
    pub fn daily_aggregate(
        &self,
        date: NaiveDate,
        role: AgentRole,
    ) -> Result<Option<DailyAggregate>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT call_count, total_tokens, total_cost_micros, error_count, avg_latency_ms \
             FROM agent_daily WHERE log_date = ?1 AND agent_role = ?2",
        )?;
        let result = stmt.query_row(rusqlite::params![date, role.as_str()], |row| {
            Ok(DailyAggregate {
                date,
                role,
                call_count: row.get::<_, i64>(0)? as u64,
                total_tokens: row.get::<_, i64>(1)? as u64,
                total_cost: micros_to_usd(row.get::<_, i64>(2)?),
                error_count: row.get::<_, i64>(3)? as u64,
                avg_latency_ms: row.get(4)?,
            })
        });
        match result {
            Ok(aggregate) => Ok(Some(aggregate)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(LedgerError::Sqlite(e)),
        }
    }

    /// All aggregate rows for one calendar date, ordered by role name.
    pub fn daily_aggregates(&self, date: NaiveDate) -> Result<Vec<DailyAggregate>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT agent_role, call_count, total_tokens, total_cost_micros, error_count, \
                    avg_latency_ms \
             FROM agent_daily WHERE log_date = ?1 ORDER BY agent_role",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![date], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(role, calls, tokens, cost, errors, avg)| {
                Ok(DailyAggregate {
                    date,
                    role: AgentRole::from_str(&role).map_err(LedgerError::Corrupt)?,
                    call_count: calls as u64,
                    total_tokens: tokens as u64,
                    total_cost: micros_to_usd(cost),
                    error_count: errors as u64,
                    avg_latency_ms: avg,
                })
            })
            .collect()
    }
}
