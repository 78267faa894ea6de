//! End-to-end pipeline tests: gate ordering, verdict caching, cache
//! upserts, audit rows, and daemon shutdown.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;

use ersa_ledger::UsageLedger;
use ersa_models::config::{RefreshConfig, UniverseConfig};
use ersa_models::market::Rejection;
use ersa_models::run::TriggerKind;
use ersa_models::AgentRole;
use ersa_pipeline::test_support::{sample_meta, StaticProvider};
use ersa_pipeline::{MarketStore, PipelineOutcome, RefreshDaemon, ValidationPipeline};

fn build_pipeline(provider: StaticProvider) -> (Arc<StaticProvider>, ValidationPipeline, Arc<UsageLedger>, Arc<MarketStore>) {
    let provider = Arc::new(provider);
    let store = Arc::new(MarketStore::open_in_memory().unwrap());
    let ledger = Arc::new(UsageLedger::open_in_memory().unwrap());
    let pipeline = ValidationPipeline::new(
        provider.clone(),
        store.clone(),
        ledger.clone(),
        UniverseConfig::default(),
    );
    (provider, pipeline, ledger, store)
}

#[tokio::test]
async fn full_pass_stores_data_and_audit_row() {
    let (_, pipeline, ledger, store) = build_pipeline(StaticProvider::equity("ACME", 504));

    let outcome = pipeline
        .run("acme", TriggerKind::UserAnalysis, None)
        .await
        .unwrap();

    let bundle = match outcome {
        PipelineOutcome::Validated(bundle) => bundle,
        PipelineOutcome::Rejected(r) => panic!("unexpected rejection: {r}"),
    };
    assert_eq!(bundle.rows_stored, 504);
    assert_eq!(bundle.history_days, 504);
    assert_eq!(bundle.card.symbol, "ACME");
    assert_eq!(bundle.card.exchange, "NASDAQ");
    assert!(bundle.fundamentals.is_some());
    // Banding derived when the provider left it unset
    assert!(bundle.fundamentals.unwrap().market_cap_band.is_some());

    assert_eq!(store.price_count("ACME").unwrap(), 504);

    // Zero-cost audit row with data-engineer role
    let aggregate = ledger
        .daily_aggregate(Utc::now().date_naive(), AgentRole::DataEngineer)
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.call_count, 1);
    assert_eq!(aggregate.total_cost, dec!(0));
    assert_eq!(aggregate.error_count, 0);
}

#[tokio::test]
async fn short_history_is_rejected_without_storing_prices() {
    // 400 trading days for a $2B-cap NASDAQ equity: history gate rejects.
    let (_, pipeline, _ledger, store) = build_pipeline(StaticProvider::equity("NEWCO", 400));

    let outcome = pipeline
        .run("NEWCO", TriggerKind::UserAnalysis, None)
        .await
        .unwrap();

    match outcome {
        PipelineOutcome::Rejected(Rejection::History { days, required }) => {
            assert_eq!(days, 400);
            assert_eq!(required, 480);
        }
        other => panic!("expected history rejection, got {other:?}"),
    }
    assert_eq!(store.price_count("NEWCO").unwrap(), 0);
}

#[tokio::test]
async fn earlier_gate_wins_over_later_gates() {
    // Fails both exchange and market-cap gates; the exchange rejection is
    // the one reported.
    let provider = StaticProvider::equity("LSEX", 504)
        .with_meta(sample_meta("LSEX", "EQUITY", "LSE", Some(100_000_000)));
    let (_, pipeline, _, _) = build_pipeline(provider);

    let outcome = pipeline
        .run("LSEX", TriggerKind::UserAnalysis, None)
        .await
        .unwrap();
    match outcome {
        PipelineOutcome::Rejected(rejection) => assert_eq!(rejection.kind(), "exchange"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn format_gate_runs_before_any_provider_call() {
    let (provider, pipeline, _, _) = build_pipeline(StaticProvider::equity("ACME", 504));

    for bad in ["", "TOOLONG", "BRK.B", "AB1"] {
        let outcome = pipeline
            .run(bad, TriggerKind::UserAnalysis, None)
            .await
            .unwrap();
        match outcome {
            PipelineOutcome::Rejected(rejection) => assert_eq!(rejection.kind(), "format"),
            other => panic!("expected format rejection, got {other:?}"),
        }
    }
    assert_eq!(provider.meta_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_symbol_is_a_not_found_rejection() {
    let (_, pipeline, _, store) = build_pipeline(StaticProvider::unknown_symbol());

    let outcome = pipeline
        .run("GHOST", TriggerKind::UserAnalysis, None)
        .await
        .unwrap();
    match outcome {
        PipelineOutcome::Rejected(rejection) => assert_eq!(rejection.kind(), "not_found"),
        other => panic!("expected not_found, got {other:?}"),
    }
    // The verdict is remembered for the short-circuit path
    let entry = store.get_universe_entry("GHOST").unwrap().unwrap();
    assert!(!entry.is_valid());
}

#[tokio::test]
async fn cached_rejection_short_circuits_the_provider() {
    let provider = StaticProvider::equity("ETFY", 504)
        .with_meta(sample_meta("ETFY", "ETF", "NYQ", Some(10_000_000_000)));
    let (provider, pipeline, _, _) = build_pipeline(provider);

    let first = pipeline
        .run("ETFY", TriggerKind::UserAnalysis, None)
        .await
        .unwrap();
    assert!(matches!(first, PipelineOutcome::Rejected(_)));
    assert_eq!(provider.meta_calls.load(Ordering::SeqCst), 1);

    // Second validation within the TTL never reaches the provider.
    let second = pipeline
        .run("ETFY", TriggerKind::UserAnalysis, None)
        .await
        .unwrap();
    match second {
        PipelineOutcome::Rejected(rejection) => assert_eq!(rejection.kind(), "quote_type"),
        other => panic!("expected cached rejection, got {other:?}"),
    }
    assert_eq!(provider.meta_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn infrastructure_failure_is_an_error_not_a_rejection() {
    let (_, pipeline, ledger, _) =
        build_pipeline(StaticProvider::equity("ACME", 504).failing_history());

    let result = pipeline.run("ACME", TriggerKind::UserAnalysis, None).await;
    assert!(result.is_err());

    // The failed pull still left an audit trail
    let aggregate = ledger
        .daily_aggregate(Utc::now().date_naive(), AgentRole::DataEngineer)
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.error_count, 1);
}

#[tokio::test]
async fn reupsert_keeps_one_row_with_latest_values() {
    let (_, pipeline, _, store) = build_pipeline(StaticProvider::equity("ACME", 504));
    pipeline
        .run("ACME", TriggerKind::UserAnalysis, None)
        .await
        .unwrap();

    // Second pull with different volumes for the same dates
    let provider2 = Arc::new({
        let mut p = StaticProvider::equity("ACME", 504);
        for bar in &mut p.bars {
            bar.volume *= 2;
        }
        p
    });
    let ledger2 = Arc::new(UsageLedger::open_in_memory().unwrap());
    let pipeline2 = ValidationPipeline::new(
        provider2,
        store.clone(),
        ledger2,
        UniverseConfig::default(),
    );
    pipeline2
        .run("ACME", TriggerKind::ScheduledRefresh, None)
        .await
        .unwrap();

    // Exactly one row per (symbol, date), carrying the second write's values
    assert_eq!(store.price_count("ACME").unwrap(), 504);
    let latest = &store.recent_prices("ACME", 1).unwrap()[0];
    assert!(latest.volume >= 2_000_000);
    // Rolling averages were recomputed from the doubled window, not left stale
    assert!(latest.avg_volume_10d >= 2_000_000);
    assert!(latest.avg_volume_30d >= 2_000_000);
}

#[tokio::test]
async fn daemon_refreshes_and_shuts_down_on_cancel() {
    let (_, pipeline, _, store) = build_pipeline(StaticProvider::equity("ACME", 504));
    let daemon = RefreshDaemon::new(
        Arc::new(pipeline),
        RefreshConfig {
            enabled: true,
            symbols: vec!["ACME".to_string()],
            interval_secs: 3_600,
        },
    );
    let cancel = daemon.cancel_token();

    let handle = tokio::spawn(async move { daemon.run().await });

    // Give the immediate first cycle a moment, then cancel.
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("daemon did not shut down promptly")
        .unwrap();

    assert_eq!(store.price_count("ACME").unwrap(), 504);
}
