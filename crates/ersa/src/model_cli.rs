use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use ersa_agents::{
    CompletionRequest, CompletionResponse, FailureKind, ModelClient, ProviderFailure,
    ProviderUsage,
};

/// Model transport that shells out to an external CLI.
///
/// The command is expected to accept the prompt, system prompt, model, and
/// max-token bound as flags, and to print a JSON object on stdout with the
/// response text plus a usage object (input/output/cache token counts).
/// Authentication is the command's own concern.
pub struct CommandModelClient {
    command: String,
}

impl CommandModelClient {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ModelClient for CommandModelClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderFailure> {
        debug!(command = %self.command, model = %request.model, "Invoking model CLI");

        let output = Command::new(&self.command)
            .args([
                "-p",
                &request.prompt,
                "--system-prompt",
                &request.system,
                "--model",
                &request.model,
                "--max-tokens",
                &request.max_tokens.to_string(),
                "--output-format",
                "json",
            ])
            .output()
            .await
            .map_err(|e| {
                ProviderFailure::new(
                    FailureKind::Transport,
                    format!("failed to spawn {}: {e}", self.command),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr, "Model CLI failed");
            return Err(classify_cli_failure(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_response(&stdout)
    }
}

/// Map CLI stderr to a failure classification. Anything unrecognized is a
/// retryable transport failure.
fn classify_cli_failure(stderr: &str) -> ProviderFailure {
    let lower = stderr.to_ascii_lowercase();
    let kind = if lower.contains("rate limit") || lower.contains("overloaded") || lower.contains("429") {
        FailureKind::RateLimited
    } else if lower.contains("authentication") || lower.contains("api key") || lower.contains("401") {
        FailureKind::Auth
    } else if lower.contains("invalid request") || lower.contains("400") {
        FailureKind::MalformedRequest
    } else {
        FailureKind::Transport
    };
    ProviderFailure::new(kind, stderr.trim().to_string())
}

/// Parse the CLI's JSON output into a completion response.
fn parse_response(stdout: &str) -> Result<CompletionResponse, ProviderFailure> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        ProviderFailure::new(
            FailureKind::Transport,
            format!("unparseable model CLI output: {e}"),
        )
    })?;

    let content = value
        .get("result")
        .or_else(|| value.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ProviderFailure::new(
                FailureKind::Transport,
                "model CLI output missing result text".to_string(),
            )
        })?
        .to_string();

    let usage = value.get("usage").cloned().unwrap_or_default();
    let count = |key: &str| usage.get(key).and_then(|v| v.as_u64()).unwrap_or(0);

    Ok(CompletionResponse {
        content,
        thinking_content: value
            .get("thinking")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        usage: ProviderUsage {
            input_uncached: count("input_tokens"),
            input_cached: count("cache_read_input_tokens"),
            cache_write: count("cache_creation_input_tokens"),
            output: count("output_tokens"),
            thinking: usage.get("thinking_tokens").and_then(|v| v.as_u64()),
        },
        request_id: value
            .get("request_id")
            .or_else(|| value.get("session_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}
