use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ersa_models::AgentRole;

use crate::error::FailureKind;

/// One outbound request to the generative-model API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub role: AgentRole,
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// Token usage as reported by the provider. The thinking count may be
/// absent; the caller estimates it from `thinking_content` when so.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderUsage {
    pub input_uncached: u64,
    pub input_cached: u64,
    pub cache_write: u64,
    pub output: u64,
    pub thinking: Option<u64>,
}

/// A successful provider response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    /// Raw thinking text when the model produced any.
    pub thinking_content: Option<String>,
    pub usage: ProviderUsage,
    pub request_id: Option<String>,
}

/// A failed attempt. Rate-limit failures may carry a retry-after hint, and
/// any failure may carry billed usage; billed failures are still costed and
/// written to the ledger.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Floor on the next backoff delay when the provider sent one.
    pub retry_after: Option<Duration>,
    pub usage: Option<ProviderUsage>,
    pub request_id: Option<String>,
}

impl ProviderFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            usage: None,
            request_id: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: FailureKind::RateLimited,
            message: message.into(),
            retry_after,
            usage: None,
            request_id: None,
        }
    }

    pub fn with_usage(mut self, usage: ProviderUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Boundary to the hosted generative-model API. Mockable for tests; the
/// concrete HTTP transport lives outside the core.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderFailure>;
}
