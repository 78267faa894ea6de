use rust_decimal::Decimal;
use thiserror::Error;

use ersa_models::AgentRole;

/// Classification of one failed attempt against the model API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network/transport-level failure. Retryable.
    Transport,
    /// Provider signalled rate limiting or overload. Retryable.
    RateLimited,
    /// The request timed out. Retryable.
    Timeout,
    /// Credential rejected. Never retried.
    Auth,
    /// The provider rejected the request shape. Never retried.
    MalformedRequest,
}

impl FailureKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::Transport | FailureKind::RateLimited | FailureKind::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Timeout => "timeout",
            FailureKind::Auth => "auth",
            FailureKind::MalformedRequest => "malformed_request",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    /// Authentication or malformed-request failure: the call was aborted
    /// without retrying.
    #[error("fatal call failure ({kind}): {message}")]
    Fatal { kind: FailureKind, message: String },

    /// Transient failures persisted through every allowed attempt.
    #[error("retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("no system prompt loaded for role: {0}")]
    MissingPrompt(AgentRole),

    #[error("model API credential is not configured")]
    Unconfigured,

    #[error("daily budget limit reached: ${spent} already spent of ${limit}")]
    DailyBudgetExhausted { spent: Decimal, limit: Decimal },

    #[error("ledger error: {0}")]
    Ledger(#[from] ersa_ledger::LedgerError),

    #[error("data pipeline error: {0}")]
    Pipeline(#[from] ersa_pipeline::PipelineError),
}

impl AgentError {
    /// Whether this error aborts the current role without any retry.
    pub fn is_fatal_call(&self) -> bool {
        matches!(self, AgentError::Fatal { .. })
    }
}
