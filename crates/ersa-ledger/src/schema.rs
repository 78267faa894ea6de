//! Ledger schema: run lifecycle, append-only usage rows, daily aggregates.
//!
//! Monetary columns are INTEGER micro-USD (scale-6 fixed point) so SQL
//! aggregation never drifts. Timestamps are RFC 3339 TEXT in UTC; dates are
//! ISO `YYYY-MM-DD` TEXT.

/// Idempotent DDL, applied on every open.
pub const LEDGER_DDL: &str = "\
CREATE TABLE IF NOT EXISTS analysis_runs (
    run_id              TEXT PRIMARY KEY,
    symbol              TEXT NOT NULL,
    triggered_by        TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'running',
    failure_reason      TEXT,
    created_at          TEXT NOT NULL,
    completed_at        TEXT,
    total_cost_micros   INTEGER NOT NULL DEFAULT 0,
    total_tokens        INTEGER NOT NULL DEFAULT 0,
    agent_calls         INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS api_usage (
    usage_id                INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id                  TEXT,
    symbol                  TEXT,
    triggered_by            TEXT NOT NULL,
    agent_role              TEXT NOT NULL,
    provider                TEXT NOT NULL,
    model                   TEXT,
    model_tier              TEXT,
    started_at              TEXT NOT NULL,
    completed_at            TEXT NOT NULL,
    duration_ms             INTEGER NOT NULL,
    request_id              TEXT,
    input_uncached_tokens   INTEGER NOT NULL DEFAULT 0,
    input_cached_tokens     INTEGER NOT NULL DEFAULT 0,
    cache_write_tokens      INTEGER NOT NULL DEFAULT 0,
    output_tokens           INTEGER NOT NULL DEFAULT 0,
    thinking_tokens         INTEGER NOT NULL DEFAULT 0,
    thinking_estimated      INTEGER NOT NULL DEFAULT 0,
    input_cost_micros       INTEGER NOT NULL DEFAULT 0,
    output_cost_micros      INTEGER NOT NULL DEFAULT 0,
    thinking_cost_micros    INTEGER NOT NULL DEFAULT 0,
    total_cost_micros       INTEGER NOT NULL DEFAULT 0,
    is_error                INTEGER NOT NULL DEFAULT 0,
    error_kind              TEXT,
    attempt                 INTEGER NOT NULL DEFAULT 1,
    created_date            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_daily (
    log_date            TEXT NOT NULL,
    agent_role          TEXT NOT NULL,
    call_count          INTEGER NOT NULL DEFAULT 0,
    total_tokens        INTEGER NOT NULL DEFAULT 0,
    total_cost_micros   INTEGER NOT NULL DEFAULT 0,
    error_count         INTEGER NOT NULL DEFAULT 0,
    avg_latency_ms      REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (log_date, agent_role)
);

CREATE INDEX IF NOT EXISTS idx_usage_run      ON api_usage(run_id);
CREATE INDEX IF NOT EXISTS idx_usage_date     ON api_usage(created_date);
CREATE INDEX IF NOT EXISTS idx_usage_role     ON api_usage(agent_role);
CREATE INDEX IF NOT EXISTS idx_usage_provider ON api_usage(provider);
CREATE INDEX IF NOT EXISTS idx_runs_symbol    ON analysis_runs(symbol);
CREATE INDEX IF NOT EXISTS idx_runs_status    ON analysis_runs(status);
";
