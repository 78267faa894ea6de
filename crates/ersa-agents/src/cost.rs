use rust_decimal::Decimal;

use ersa_models::tier::{ModelTier, RateTable};
use ersa_models::usage::{CostBreakdown, ThinkingTokens, TokenUsage};

use crate::client::ProviderUsage;

const TOKENS_PER_MTOK: i64 = 1_000_000;

/// Converts token usage into a cost breakdown using tier rates.
///
/// Multipliers are fixed by the provider's pricing model: cache writes bill
/// at 1.25x the input rate, cache reads at 0.10x, thinking tokens at the
/// output rate. All arithmetic is exact decimal; rounding happens only at
/// the storage boundary.
#[derive(Debug, Clone)]
pub struct CostCalculator {
    rates: RateTable,
}

impl CostCalculator {
    pub fn new(rates: RateTable) -> Self {
        Self { rates }
    }

    /// Cost for one call. Zero token counts are zero cost, never an error.
    pub fn cost_for(&self, tier: ModelTier, usage: &TokenUsage) -> CostBreakdown {
        let rates = self.rates.for_tier(tier);
        let mtok = Decimal::from(TOKENS_PER_MTOK);
        let input_rate = rates.input_per_mtok / mtok;
        let output_rate = rates.output_per_mtok / mtok;

        let cache_write_rate = input_rate * Decimal::new(125, 2);
        let cache_read_rate = input_rate * Decimal::new(10, 2);

        let input_cost = Decimal::from(usage.input_uncached) * input_rate
            + Decimal::from(usage.cache_write) * cache_write_rate
            + Decimal::from(usage.input_cached) * cache_read_rate;
        let output_cost = Decimal::from(usage.output) * output_rate;
        let thinking_cost = Decimal::from(usage.thinking.count()) * output_rate;

        CostBreakdown {
            input_cost,
            output_cost,
            thinking_cost,
            total_cost: input_cost + output_cost + thinking_cost,
        }
    }
}

/// Normalize provider-reported usage into the ledger's token breakdown.
///
/// When the provider omits the thinking count, estimate it from the
/// thinking text at ~4 characters per token; the estimate stays
/// distinguishable from a reported count on the stored record.
pub fn normalize_usage(usage: &ProviderUsage, thinking_content: Option<&str>) -> TokenUsage {
    let thinking = match usage.thinking {
        Some(count) => ThinkingTokens::Reported(count),
        None => match thinking_content {
            Some(text) if !text.is_empty() => ThinkingTokens::estimate_from_chars(text.len()),
            _ => ThinkingTokens::Reported(0),
        },
    };
    TokenUsage {
        input_uncached: usage.input_uncached,
        input_cached: usage.input_cached,
        cache_write: usage.cache_write,
        output: usage.output,
        thinking,
    }
}
