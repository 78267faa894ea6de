//! Test support: a scripted model client for exercising the caller and
//! orchestrator without a real API.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{
    CompletionRequest, CompletionResponse, ModelClient, ProviderFailure, ProviderUsage,
};

/// A model client that replays a queue of scripted outcomes, then falls
/// back to a default response. Records every request it saw.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<CompletionResponse, ProviderFailure>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    default_response: CompletionResponse,
}

impl ScriptedClient {
    /// Every call succeeds with `default_response`.
    pub fn always(default_response: CompletionResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            default_response,
        }
    }

    /// Replay `outcomes` in order, then fall back to `default_response`.
    pub fn scripted(
        outcomes: Vec<Result<CompletionResponse, ProviderFailure>>,
        default_response: CompletionResponse,
    ) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
            default_response,
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderFailure> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.default_response.clone()),
        }
    }
}

/// A successful response with the given content and usage.
pub fn ok_response(content: &str, usage: ProviderUsage) -> CompletionResponse {
    CompletionResponse {
        content: content.to_string(),
        thinking_content: None,
        usage,
        request_id: Some(format!("req-{}", content.len())),
    }
}
