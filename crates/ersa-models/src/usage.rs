use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::role::AgentRole;
use crate::run::TriggerKind;
use crate::tier::ModelTier;

/// Monetary columns are persisted as integer micro-USD (scale-6 fixed point)
/// so SQL aggregation stays exact. These helpers are the only conversion
/// points between storage and the in-memory `Decimal` representation.
pub fn usd_to_micros(usd: Decimal) -> i64 {
    (usd * Decimal::new(1_000_000, 0))
        .round()
        .to_i64()
        .unwrap_or(i64::MAX)
}

pub fn micros_to_usd(micros: i64) -> Decimal {
    Decimal::new(micros, 6)
}

/// Thinking-token count for one call.
///
/// The provider may omit the count, in which case it is estimated from the
/// thinking text at roughly four characters per token. Callers can always
/// tell the two apart; estimates are approximations, not exact accounting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingTokens {
    Reported(u64),
    Estimated(u64),
}

impl ThinkingTokens {
    /// Estimate a token count from thinking text: `ceil(chars / 4)`.
    pub fn estimate_from_chars(chars: usize) -> ThinkingTokens {
        ThinkingTokens::Estimated(((chars as u64) + 3) / 4)
    }

    pub fn count(&self) -> u64 {
        match self {
            ThinkingTokens::Reported(n) | ThinkingTokens::Estimated(n) => *n,
        }
    }

    pub fn is_estimated(&self) -> bool {
        matches!(self, ThinkingTokens::Estimated(_))
    }
}

impl Default for ThinkingTokens {
    fn default() -> Self {
        ThinkingTokens::Reported(0)
    }
}

/// Token breakdown of one API call. Absent fields are zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_uncached: u64,
    pub input_cached: u64,
    pub cache_write: u64,
    pub output: u64,
    #[serde(default)]
    pub thinking: ThinkingTokens,
}

impl TokenUsage {
    pub fn input_total(&self) -> u64 {
        self.input_uncached + self.input_cached + self.cache_write
    }

    pub fn total(&self) -> u64 {
        self.input_total() + self.output + self.thinking.count()
    }
}

/// Cost breakdown of one API call in USD.
///
/// `input_cost` covers uncached input, cache writes, and cache reads.
/// Invariant: `total_cost = input_cost + output_cost + thinking_cost`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostBreakdown {
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub thinking_cost: Decimal,
    pub total_cost: Decimal,
}

impl CostBreakdown {
    pub const ZERO: CostBreakdown = CostBreakdown {
        input_cost: Decimal::ZERO,
        output_cost: Decimal::ZERO,
        thinking_cost: Decimal::ZERO,
        total_cost: Decimal::ZERO,
    };
}

/// Which external system served the call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    ModelApi,
    MarketData,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::ModelApi => "model_api",
            Provider::MarketData => "market_data",
        }
    }
}

/// One immutable row in the usage ledger: a completed call attempt,
/// successful or not. Never updated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub run_id: Option<Uuid>,
    pub symbol: Option<String>,
    pub triggered_by: TriggerKind,
    pub role: AgentRole,
    pub provider: Provider,
    pub model: Option<String>,
    pub tier: Option<ModelTier>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub request_id: Option<String>,
    pub usage: TokenUsage,
    pub cost: CostBreakdown,
    pub is_error: bool,
    pub error_kind: Option<String>,
    /// 1-based attempt number within the retry loop that produced this row.
    pub attempt: u32,
}

impl UsageRecord {
    pub fn builder(
        role: AgentRole,
        provider: Provider,
        triggered_by: TriggerKind,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> UsageRecordBuilder {
        UsageRecordBuilder::new(role, provider, triggered_by, started_at, completed_at)
    }

    /// Calendar date used for daily aggregation, from the request start.
    pub fn aggregate_date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }
}

/// Typed builder for `UsageRecord`. Required fields are constructor
/// arguments; everything else defaults to empty/zero.
#[derive(Debug, Clone)]
pub struct UsageRecordBuilder {
    record: UsageRecord,
}

impl UsageRecordBuilder {
    pub fn new(
        role: AgentRole,
        provider: Provider,
        triggered_by: TriggerKind,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            record: UsageRecord {
                run_id: None,
                symbol: None,
                triggered_by,
                role,
                provider,
                model: None,
                tier: None,
                started_at,
                completed_at,
                duration_ms,
                request_id: None,
                usage: TokenUsage::default(),
                cost: CostBreakdown::ZERO,
                is_error: false,
                error_kind: None,
                attempt: 1,
            },
        }
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.record.run_id = Some(run_id);
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.record.symbol = Some(symbol.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>, tier: ModelTier) -> Self {
        self.record.model = Some(model.into());
        self.record.tier = Some(tier);
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.record.request_id = Some(request_id.into());
        self
    }

    pub fn usage(mut self, usage: TokenUsage) -> Self {
        self.record.usage = usage;
        self
    }

    pub fn cost(mut self, cost: CostBreakdown) -> Self {
        self.record.cost = cost;
        self
    }

    pub fn error(mut self, kind: impl Into<String>) -> Self {
        self.record.is_error = true;
        self.record.error_kind = Some(kind.into());
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.record.attempt = attempt;
        self
    }

    pub fn build(self) -> UsageRecord {
        self.record
    }
}

/// Summed usage for one run, read back from the ledger for budget checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunTotals {
    pub calls: u64,
    pub total_cost: Decimal,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub cached_tokens: u64,
}

/// Live per-day aggregate for one agent role: a materialized view over the
/// usage rows, unique on (date, role).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub role: AgentRole,
    pub call_count: u64,
    pub total_tokens: u64,
    pub total_cost: Decimal,
    pub error_count: u64,
    pub avg_latency_ms: f64,
}
