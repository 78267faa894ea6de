//! Retry, classification, and ledger behavior of the retrying caller,
//! driven end-to-end against a scripted model client and an in-memory
//! ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;

use ersa_agents::caller::uncached_usage;
use ersa_agents::test_support::{ok_response, ScriptedClient};
use ersa_agents::{
    AgentError, CallSpec, CostCalculator, FailureKind, ProviderFailure, RetryPolicy,
    RetryableCaller,
};
use ersa_ledger::UsageLedger;
use ersa_models::run::TriggerKind;
use ersa_models::tier::RateTable;
use ersa_models::usage::ThinkingTokens;
use ersa_models::AgentRole;
use uuid::Uuid;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(10),
        jitter_ratio: 0.0,
        request_timeout: Duration::from_secs(5),
    }
}

fn spec(run_id: Uuid) -> CallSpec {
    CallSpec {
        role: AgentRole::BusinessAnalyst,
        run_id: Some(run_id),
        symbol: Some("AAPL".to_string()),
        triggered_by: TriggerKind::UserAnalysis,
        model: "claude-sonnet-4-6".to_string(),
        system: "system".to_string(),
        prompt: "{}".to_string(),
        max_tokens: 4096,
    }
}

fn build_caller(client: Arc<ScriptedClient>, ledger: Arc<UsageLedger>) -> RetryableCaller {
    RetryableCaller::new(
        client,
        ledger,
        CostCalculator::new(RateTable::default()),
        fast_policy(),
    )
}

#[tokio::test]
async fn success_records_one_row_with_cost() {
    let client = Arc::new(ScriptedClient::always(ok_response(
        "analysis",
        uncached_usage(1_000_000, 0),
    )));
    let ledger = Arc::new(UsageLedger::open_in_memory().unwrap());
    let caller = build_caller(client.clone(), ledger.clone());
    let run_id = Uuid::new_v4();

    let call = caller.call(&spec(run_id)).await.unwrap();
    assert_eq!(call.content, "analysis");
    assert_eq!(call.attempts, 1);
    assert!(call.recorded);
    // 1M uncached input at the standard $3/Mtok rate
    assert_eq!(call.cost.total_cost, dec!(3));

    let totals = ledger.run_usage(run_id).unwrap();
    assert_eq!(totals.calls, 1);
    assert_eq!(totals.total_cost, dec!(3));
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let client = Arc::new(ScriptedClient::scripted(
        vec![
            Err(ProviderFailure::new(FailureKind::Transport, "connection reset")),
            Err(ProviderFailure::rate_limited(
                "slow down",
                Some(Duration::from_millis(2)),
            )),
        ],
        ok_response("recovered", uncached_usage(1_000, 100)),
    ));
    let ledger = Arc::new(UsageLedger::open_in_memory().unwrap());
    let caller = build_caller(client.clone(), ledger.clone());

    let call = caller.call(&spec(Uuid::new_v4())).await.unwrap();
    assert_eq!(call.content, "recovered");
    assert_eq!(call.attempts, 3);
    assert_eq!(client.request_count(), 3);
}

#[tokio::test]
async fn never_exceeds_max_attempts() {
    let client = Arc::new(ScriptedClient::scripted(
        vec![
            Err(ProviderFailure::new(FailureKind::Transport, "down")),
            Err(ProviderFailure::new(FailureKind::Transport, "down")),
            Err(ProviderFailure::new(FailureKind::Transport, "down")),
            Err(ProviderFailure::new(FailureKind::Transport, "down")),
        ],
        ok_response("never reached", uncached_usage(1, 1)),
    ));
    let ledger = Arc::new(UsageLedger::open_in_memory().unwrap());
    let caller = build_caller(client.clone(), ledger);

    let error = caller.call(&spec(Uuid::new_v4())).await.unwrap_err();
    assert!(matches!(
        error,
        AgentError::RetriesExhausted { attempts: 3, .. }
    ));
    assert_eq!(client.request_count(), 3);
}

#[tokio::test]
async fn fatal_classification_never_triggers_a_second_attempt() {
    for kind in [FailureKind::Auth, FailureKind::MalformedRequest] {
        let client = Arc::new(ScriptedClient::scripted(
            vec![Err(ProviderFailure::new(kind, "rejected"))],
            ok_response("never reached", uncached_usage(1, 1)),
        ));
        let ledger = Arc::new(UsageLedger::open_in_memory().unwrap());
        let caller = build_caller(client.clone(), ledger);

        let error = caller.call(&spec(Uuid::new_v4())).await.unwrap_err();
        match error {
            AgentError::Fatal { kind: got, .. } => assert_eq!(got, kind),
            other => panic!("expected fatal, got {other}"),
        }
        assert_eq!(client.request_count(), 1);
    }
}

#[tokio::test]
async fn failed_but_billed_attempts_land_in_the_ledger() {
    let client = Arc::new(ScriptedClient::scripted(
        vec![Err(ProviderFailure::new(FailureKind::Transport, "cut off mid-response")
            .with_usage(uncached_usage(500_000, 2_000)))],
        ok_response("second try", uncached_usage(500_000, 2_000)),
    ));
    let ledger = Arc::new(UsageLedger::open_in_memory().unwrap());
    let caller = build_caller(client, ledger.clone());
    let run_id = Uuid::new_v4();

    caller.call(&spec(run_id)).await.unwrap();

    // One row for the billed failure, one for the success
    let totals = ledger.run_usage(run_id).unwrap();
    assert_eq!(totals.calls, 2);

    let aggregate = ledger
        .daily_aggregate(Utc::now().date_naive(), AgentRole::BusinessAnalyst)
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.call_count, 2);
    assert_eq!(aggregate.error_count, 1);
}

#[tokio::test]
async fn estimated_thinking_tokens_are_flagged_and_billed() {
    // Provider reports no thinking count but returns thinking text
    let response = ersa_agents::CompletionResponse {
        content: "done".to_string(),
        thinking_content: Some("t".repeat(4_000)),
        usage: uncached_usage(0, 1_000_000),
        request_id: None,
    };
    let client = Arc::new(ScriptedClient::always(response));
    let ledger = Arc::new(UsageLedger::open_in_memory().unwrap());
    let caller = build_caller(client, ledger);

    let call = caller.call(&spec(Uuid::new_v4())).await.unwrap();
    assert_eq!(call.usage.thinking, ThinkingTokens::Estimated(1_000));
    // Thinking bills at the output rate: 1000 tokens at $15/Mtok
    assert_eq!(call.cost.thinking_cost, dec!(0.015));
    assert_eq!(
        call.cost.total_cost,
        call.cost.input_cost + call.cost.output_cost + call.cost.thinking_cost
    );
}
