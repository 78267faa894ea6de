pub mod config;
pub mod market;
pub mod role;
pub mod run;
pub mod tier;
pub mod usage;

pub use config::{ApiCredential, BudgetConfig, ErsaConfig, ModelAssignments, RetryConfig};
pub use market::{
    exchange_display, DailyBar, FundamentalRecord, InstrumentMeta, MarketCapBand, PeriodType,
    PriceRecord, Rejection, StockCard, TickerUniverseEntry,
};
pub use role::{AgentRole, EXECUTION_ORDER};
pub use run::{AnalysisRun, RoleOutput, RunReport, RunStatus, StopReason, TriggerKind};
pub use tier::{ModelTier, RateTable, TierRates};
pub use usage::{
    micros_to_usd, usd_to_micros, CostBreakdown, DailyAggregate, Provider, RunTotals,
    ThinkingTokens, TokenUsage, UsageRecord, UsageRecordBuilder,
};
