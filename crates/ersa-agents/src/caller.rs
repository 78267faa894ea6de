use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, warn};
use uuid::Uuid;

use ersa_ledger::UsageLedger;
use ersa_models::config::RetryConfig;
use ersa_models::run::TriggerKind;
use ersa_models::tier::ModelTier;
use ersa_models::usage::{CostBreakdown, Provider, TokenUsage, UsageRecord, UsageRecordBuilder};
use ersa_models::AgentRole;

use crate::client::{CompletionRequest, ModelClient, ProviderFailure, ProviderUsage};
use crate::cost::{normalize_usage, CostCalculator};
use crate::error::AgentError;

/// First-class retry policy: an inspectable value, not an implicit wrapper.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0).
    pub jitter_ratio: f64,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Deterministic backoff delay for a 1-based attempt number, before
    /// jitter: `base * multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).round();
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// The actual sleep before the next attempt: backoff plus bounded
    /// jitter, floored at the provider's retry-after hint when one came.
    fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.delay_for(attempt);
        let jitter_bound = (base.as_millis() as f64 * self.jitter_ratio) as u64;
        let jitter = if jitter_bound > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_bound))
        } else {
            Duration::ZERO
        };
        let delay = (base + jitter).min(self.max_delay);
        match retry_after {
            Some(floor) => delay.max(floor),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Everything needed to issue one logical agent call.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub role: AgentRole,
    pub run_id: Option<Uuid>,
    pub symbol: Option<String>,
    pub triggered_by: TriggerKind,
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// Result of one successful logical call (possibly after retries).
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub content: String,
    pub usage: TokenUsage,
    pub cost: CostBreakdown,
    pub duration_ms: u64,
    pub request_id: Option<String>,
    pub tier: ModelTier,
    pub attempts: u32,
    /// False when the usage row could not be persisted; the in-memory
    /// numbers above are still authoritative for this call.
    pub recorded: bool,
}

/// Wraps one outbound model call with timeout, classified retries, costing,
/// and ledger recording.
///
/// Every attempt that produced billable usage is costed and written to the
/// ledger, failed attempts included, so failed-but-billed calls are never
/// lost. Backoff sleeps are the only suspension points.
pub struct RetryableCaller {
    client: Arc<dyn ModelClient>,
    ledger: Arc<UsageLedger>,
    calculator: CostCalculator,
    policy: RetryPolicy,
}

impl RetryableCaller {
    pub fn new(
        client: Arc<dyn ModelClient>,
        ledger: Arc<UsageLedger>,
        calculator: CostCalculator,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            ledger,
            calculator,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issue one logical call. Transient failures retry with backoff up to
    /// the attempt cap; auth and malformed-request failures abort
    /// immediately with a fatal classification.
    pub async fn call(&self, spec: &CallSpec) -> Result<AgentCall, AgentError> {
        let tier = ModelTier::classify(&spec.model);
        let request = CompletionRequest {
            role: spec.role,
            model: spec.model.clone(),
            system: spec.system.clone(),
            prompt: spec.prompt.clone(),
            max_tokens: spec.max_tokens,
        };

        let mut last_message = String::new();

        for attempt in 1..=self.policy.max_attempts {
            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome =
                tokio::time::timeout(self.policy.request_timeout, self.client.complete(&request))
                    .await;
            let completed_at = Utc::now();

            match outcome {
                Ok(Ok(response)) => {
                    let usage = normalize_usage(&response.usage, response.thinking_content.as_deref());
                    let cost = self.calculator.cost_for(tier, &usage);
                    let duration_ms = clock.elapsed().as_millis() as u64;

                    let record = self
                        .record_builder(spec, tier, started_at, completed_at)
                        .usage(usage)
                        .cost(cost)
                        .attempt(attempt);
                    let record = match &response.request_id {
                        Some(id) => record.request_id(id.clone()),
                        None => record,
                    };
                    let recorded = self.persist(&record.build());

                    debug!(
                        role = %spec.role,
                        model = %spec.model,
                        cost = %cost.total_cost,
                        duration_ms,
                        attempt,
                        "Agent call succeeded"
                    );

                    return Ok(AgentCall {
                        content: response.content,
                        usage,
                        cost,
                        duration_ms,
                        request_id: response.request_id,
                        tier,
                        attempts: attempt,
                        recorded,
                    });
                }
                Ok(Err(failure)) => {
                    self.record_billed_failure(spec, tier, started_at, completed_at, attempt, &failure);

                    if !failure.kind.is_transient() {
                        warn!(role = %spec.role, kind = %failure.kind, "Fatal call failure");
                        return Err(AgentError::Fatal {
                            kind: failure.kind,
                            message: failure.message,
                        });
                    }

                    last_message = failure.to_string();
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.next_delay(attempt, failure.retry_after);
                        warn!(
                            role = %spec.role,
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_message,
                            "Transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(_) => {
                    last_message = format!(
                        "request timed out after {}s",
                        self.policy.request_timeout.as_secs()
                    );
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.next_delay(attempt, None);
                        warn!(
                            role = %spec.role,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Request timed out, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(AgentError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            message: last_message,
        })
    }

    fn record_builder(
        &self,
        spec: &CallSpec,
        tier: ModelTier,
        started_at: chrono::DateTime<Utc>,
        completed_at: chrono::DateTime<Utc>,
    ) -> UsageRecordBuilder {
        let builder = UsageRecord::builder(
            spec.role,
            Provider::ModelApi,
            spec.triggered_by,
            started_at,
            completed_at,
        )
        .model(spec.model.clone(), tier);
        let builder = match spec.run_id {
            Some(id) => builder.run_id(id),
            None => builder,
        };
        match &spec.symbol {
            Some(symbol) => builder.symbol(symbol.clone()),
            None => builder,
        }
    }

    /// A failed attempt that still consumed tokens gets its own ledger row.
    fn record_billed_failure(
        &self,
        spec: &CallSpec,
        tier: ModelTier,
        started_at: chrono::DateTime<Utc>,
        completed_at: chrono::DateTime<Utc>,
        attempt: u32,
        failure: &ProviderFailure,
    ) {
        let Some(provider_usage) = failure.usage else {
            return;
        };
        let usage = normalize_usage(&provider_usage, None);
        let cost = self.calculator.cost_for(tier, &usage);
        let record = self
            .record_builder(spec, tier, started_at, completed_at)
            .usage(usage)
            .cost(cost)
            .attempt(attempt)
            .error(failure.kind.as_str());
        let record = match &failure.request_id {
            Some(id) => record.request_id(id.clone()),
            None => record,
        };
        self.persist(&record.build());
    }

    /// Persist with one write retry. A usage row is never silently dropped:
    /// if both writes fail, the full amounts land in the error log and the
    /// caller sees `recorded = false`.
    fn persist(&self, record: &UsageRecord) -> bool {
        for _ in 0..2 {
            match self.ledger.record(record) {
                Ok(()) => return true,
                Err(e) => {
                    warn!(error = %e, "Ledger write failed, retrying once");
                }
            }
        }
        error!(
            role = %record.role,
            run_id = ?record.run_id,
            total_cost = %record.cost.total_cost,
            input_tokens = record.usage.input_total(),
            output_tokens = record.usage.output,
            "Usage row could not be persisted; amounts preserved here"
        );
        false
    }
}

/// Convenience: provider usage with only uncached input and output set.
pub fn uncached_usage(input: u64, output: u64) -> ProviderUsage {
    ProviderUsage {
        input_uncached: input,
        input_cached: 0,
        cache_write: 0,
        output,
        thinking: None,
    }
}
