pub mod caller;
pub mod client;
pub mod cost;
pub mod error;
pub mod orchestrator;
pub mod prompts;

pub mod test_support;

pub use caller::{AgentCall, CallSpec, RetryPolicy, RetryableCaller};
pub use client::{CompletionRequest, CompletionResponse, ModelClient, ProviderFailure, ProviderUsage};
pub use cost::{normalize_usage, CostCalculator};
pub use error::{AgentError, FailureKind};
pub use orchestrator::Orchestrator;
pub use prompts::{PromptError, PromptLibrary};
