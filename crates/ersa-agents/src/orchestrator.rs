use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use ersa_ledger::UsageLedger;
use ersa_models::config::{BudgetConfig, ModelAssignments};
use ersa_models::market::StockCard;
use ersa_models::run::{AnalysisRun, RoleOutput, RunReport, RunStatus, StopReason, TriggerKind};
use ersa_models::{AgentRole, EXECUTION_ORDER};
use ersa_pipeline::{PipelineOutcome, ValidationPipeline};

use crate::caller::{CallSpec, RetryableCaller};
use crate::error::AgentError;
use crate::prompts::PromptLibrary;

/// Drives one research run: data gathering through the pipeline, then the
/// billable roles in their fixed order through the retrying caller, under
/// the per-run budget ceiling.
///
/// Calls within a run are strictly sequential: the roles share one budget
/// and one rate-limited caller, so there is nothing to gain from parallel
/// issuance. The orchestrator is the sole owner of the run lifecycle.
pub struct Orchestrator {
    caller: RetryableCaller,
    pipeline: Arc<ValidationPipeline>,
    prompts: PromptLibrary,
    ledger: Arc<UsageLedger>,
    models: ModelAssignments,
    budget: BudgetConfig,
}

impl Orchestrator {
    pub fn new(
        caller: RetryableCaller,
        pipeline: Arc<ValidationPipeline>,
        prompts: PromptLibrary,
        ledger: Arc<UsageLedger>,
        models: ModelAssignments,
        budget: BudgetConfig,
    ) -> Self {
        Self {
            caller,
            pipeline,
            prompts,
            ledger,
            models,
            budget,
        }
    }

    /// Produce a report for `symbol`. The returned report always carries a
    /// terminal status; `Err` is reserved for refusals and infrastructure
    /// failures that prevented the run from being driven at all.
    pub async fn run_report(
        &self,
        symbol: &str,
        triggered_by: TriggerKind,
    ) -> Result<RunReport, AgentError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let clock = Instant::now();

        // Refuse before creating a run when the day's spend is already at
        // the limit. No AnalysisRun row exists for refused runs.
        let spent_today = self.ledger.day_usage(Utc::now().date_naive())?;
        if spent_today >= self.budget.daily_limit_usd {
            return Err(AgentError::DailyBudgetExhausted {
                spent: spent_today,
                limit: self.budget.daily_limit_usd,
            });
        }

        // Prompts are a startup-time concern; verify before spending.
        for role in EXECUTION_ORDER.iter().filter(|r| r.is_billable()) {
            if self.prompts.get(*role).is_none() {
                return Err(AgentError::MissingPrompt(*role));
            }
        }

        let run = AnalysisRun {
            id: Uuid::new_v4(),
            symbol: symbol.clone(),
            triggered_by,
            created_at: Utc::now(),
            status: RunStatus::Running,
            failure_reason: None,
        };
        self.ledger.create_run(&run)?;
        let run_id = run.id;
        info!(run_id = %run_id, symbol = %symbol, "Starting research run");

        let deadline = clock + Duration::from_secs(self.budget.run_deadline_secs);

        let mut outputs: Vec<RoleOutput> = Vec::new();
        let mut card: Option<StockCard> = None;
        let mut stop_reason: Option<StopReason> = None;
        let mut first_degradation: Option<StopReason> = None;

        // Data gathering is the pipeline, not a model call; a rejection or
        // infrastructure failure there fails the run (critical path).
        match self.pipeline.run(&symbol, triggered_by, Some(run_id)).await {
            Ok(PipelineOutcome::Validated(bundle)) => {
                outputs.push(RoleOutput {
                    role: AgentRole::DataEngineer,
                    content: format!(
                        "cached {} price rows covering {} trading days",
                        bundle.rows_stored, bundle.history_days
                    ),
                    model: None,
                    cost: Decimal::ZERO,
                    duration_ms: 0,
                });
                card = Some(bundle.card);
            }
            Ok(PipelineOutcome::Rejected(rejection)) => {
                let reason = StopReason::DataRejected { rejection };
                return self.finish(
                    run_id,
                    &symbol,
                    triggered_by,
                    RunStatus::Failed,
                    Some(reason),
                    outputs,
                    None,
                    clock,
                );
            }
            Err(e) => {
                let reason = StopReason::RoleFailed {
                    role: AgentRole::DataEngineer,
                    message: e.to_string(),
                };
                return self.finish(
                    run_id,
                    &symbol,
                    triggered_by,
                    RunStatus::Failed,
                    Some(reason),
                    outputs,
                    None,
                    clock,
                );
            }
        }

        let mut context = serde_json::json!({
            "symbol": symbol,
            "card": card,
            "role_outputs": {},
        });

        for role in EXECUTION_ORDER.iter().copied().filter(|r| r.is_billable()) {
            // Cancellation is cooperative: deadline and budget are checked
            // between calls, never mid-call.
            if Instant::now() >= deadline {
                stop_reason = Some(StopReason::DeadlineExpired);
                break;
            }

            if let Some(reason) = self.budget_stop(run_id)? {
                stop_reason = Some(reason);
                break;
            }

            // Both hold for every billable role: assignments are total and
            // prompt presence was verified at run start.
            let Some(model) = self.models.for_role(role) else {
                continue;
            };
            let Some(system) = self.prompts.get(role) else {
                continue;
            };

            let spec = CallSpec {
                role,
                run_id: Some(run_id),
                symbol: Some(symbol.clone()),
                triggered_by,
                model: model.to_string(),
                system: system.to_string(),
                prompt: context.to_string(),
                max_tokens: self.budget.max_tokens_per_call,
            };

            match self.caller.call(&spec).await {
                Ok(call) => {
                    if !call.recorded {
                        warn!(run_id = %run_id, role = %role, "Call succeeded but was not durably logged");
                    }
                    context["role_outputs"][role.as_str()] =
                        serde_json::Value::String(call.content.clone());
                    outputs.push(RoleOutput {
                        role,
                        content: call.content,
                        model: Some(model.to_string()),
                        cost: call.cost.total_cost,
                        duration_ms: call.duration_ms,
                    });
                }
                Err(e) => {
                    let reason = StopReason::RoleFailed {
                        role,
                        message: e.to_string(),
                    };
                    if role.is_critical() {
                        stop_reason = Some(reason);
                        break;
                    }
                    warn!(run_id = %run_id, role = %role, error = %e, "Non-critical role failed, continuing");
                    if first_degradation.is_none() {
                        first_degradation = Some(reason);
                    }
                }
            }
        }

        let status = match &stop_reason {
            Some(StopReason::RoleFailed { role, .. }) if role.is_critical() => RunStatus::Failed,
            Some(_) => RunStatus::Partial,
            None if first_degradation.is_some() => RunStatus::Partial,
            None => RunStatus::Complete,
        };
        let stop_reason = stop_reason.or(first_degradation);

        self.finish(
            run_id,
            &symbol,
            triggered_by,
            status,
            stop_reason,
            outputs,
            card,
            clock,
        )
    }

    /// Pre-call budget gate: stop once spent cost plus the projected next
    /// call (mean cost of this run's completed calls) would exceed the
    /// ceiling.
    fn budget_stop(&self, run_id: Uuid) -> Result<Option<StopReason>, AgentError> {
        let ceiling = self.budget.per_run_ceiling_usd;
        let totals = self.ledger.run_usage(run_id)?;
        let projected = if totals.calls > 0 {
            totals.total_cost / Decimal::from(totals.calls)
        } else {
            Decimal::ZERO
        };
        if totals.total_cost >= ceiling || totals.total_cost + projected > ceiling {
            return Ok(Some(StopReason::BudgetExceeded {
                spent: totals.total_cost,
                ceiling,
            }));
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        run_id: Uuid,
        symbol: &str,
        triggered_by: TriggerKind,
        status: RunStatus,
        stop_reason: Option<StopReason>,
        outputs: Vec<RoleOutput>,
        card: Option<StockCard>,
        clock: Instant,
    ) -> Result<RunReport, AgentError> {
        let totals = self.ledger.run_usage(run_id)?;
        let failure_reason = stop_reason.as_ref().map(|r| r.to_string());
        self.ledger
            .finish_run(run_id, status, failure_reason.as_deref(), &totals)?;

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            symbol = %symbol,
            status = status.as_str(),
            cost = %totals.total_cost,
            calls = totals.calls,
            elapsed_ms,
            "Run finished"
        );

        Ok(RunReport {
            run_id,
            symbol: symbol.to_string(),
            triggered_by,
            status,
            stop_reason,
            outputs,
            card,
            total_cost: totals.total_cost,
            elapsed_ms,
        })
    }
}
