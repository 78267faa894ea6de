use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::market::{Rejection, StockCard};
use crate::role::AgentRole;

/// What triggered a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    UserAnalysis,
    ScheduledRefresh,
    DeepDive,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::UserAnalysis => "user_analysis",
            TriggerKind::ScheduledRefresh => "scheduled_refresh",
            TriggerKind::DeepDive => "deep_dive",
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_analysis" => Ok(TriggerKind::UserAnalysis),
            "scheduled_refresh" => Ok(TriggerKind::ScheduledRefresh),
            "deep_dive" => Ok(TriggerKind::DeepDive),
            other => Err(format!("unknown trigger kind: {other}")),
        }
    }
}

/// Run lifecycle status. `Running` is the open state; the other three are
/// the only terminal states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Complete,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "complete" => Ok(RunStatus::Complete),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One end-to-end report-generation attempt for a symbol.
///
/// Created at run start and closed exactly once by the orchestrator, which
/// is the sole owner of the run lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub symbol: String,
    pub triggered_by: TriggerKind,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub failure_reason: Option<String>,
}

/// Why a run stopped before completing every role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// Cumulative cost plus the projected next call would exceed the
    /// per-run ceiling.
    BudgetExceeded { spent: Decimal, ceiling: Decimal },
    /// The run deadline expired between calls.
    DeadlineExpired,
    /// A role failed fatally. Critical-path roles fail the run; others
    /// degrade it to partial.
    RoleFailed { role: AgentRole, message: String },
    /// The market-data gates rejected the symbol.
    DataRejected { rejection: Rejection },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::BudgetExceeded { spent, ceiling } => {
                write!(f, "budget ceiling reached: ${spent} spent of ${ceiling}")
            }
            StopReason::DeadlineExpired => write!(f, "run deadline expired"),
            StopReason::RoleFailed { role, message } => {
                write!(f, "role {role} failed: {message}")
            }
            StopReason::DataRejected { rejection } => {
                write!(f, "symbol rejected: {rejection}")
            }
        }
    }
}

/// The output one role contributed to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleOutput {
    pub role: AgentRole,
    pub content: String,
    pub model: Option<String>,
    pub cost: Decimal,
    pub duration_ms: u64,
}

/// Final result of a run: terminal status, whatever role outputs were
/// produced, and a typed stop reason when the run is not complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub symbol: String,
    pub triggered_by: TriggerKind,
    pub status: RunStatus,
    pub stop_reason: Option<StopReason>,
    pub outputs: Vec<RoleOutput>,
    /// Snapshot for the presentation layer, present when data gathering ran.
    pub card: Option<StockCard>,
    pub total_cost: Decimal,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn output_for(&self, role: AgentRole) -> Option<&RoleOutput> {
        self.outputs.iter().find(|o| o.role == role)
    }
}
