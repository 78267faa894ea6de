//! ERSA - Equity Research Sequencing Agents
//!
//! Assembles multi-agent equity research runs: a validation/caching
//! pipeline gates market data, an orchestrator sequences model-API agent
//! calls through a retrying caller, and every call is costed into an
//! append-only usage ledger under a hard per-run budget ceiling.

pub use ersa_agents as agents;
pub use ersa_ledger as ledger;
pub use ersa_models as models;
pub use ersa_pipeline as pipeline;

pub mod file_provider;
pub mod model_cli;

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use ersa_agents::{
    CostCalculator, ModelClient, Orchestrator, PromptLibrary, RetryPolicy, RetryableCaller,
};
use ersa_ledger::UsageLedger;
use ersa_models::config::{ApiCredential, ErsaConfig};
use ersa_pipeline::{MarketDataProvider, MarketStore, RefreshDaemon, ValidationPipeline};

use crate::file_provider::FileMarketData;
use crate::model_cli::CommandModelClient;

/// All wired components for one process.
pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub pipeline: Arc<ValidationPipeline>,
    pub ledger: Arc<UsageLedger>,
    pub config: ErsaConfig,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn refresh_daemon(&self) -> RefreshDaemon {
        RefreshDaemon::new(self.pipeline.clone(), self.config.refresh.clone())
    }
}

/// Build a runtime with the default transports: the model CLI command and
/// the local market-data directory.
///
/// Fails with an actionable message when the API credential is not
/// configured; nothing here crashes on a missing environment variable.
pub fn build_runtime(config: ErsaConfig) -> Result<Runtime> {
    match ApiCredential::from_env(&config.api_key_env) {
        ApiCredential::Configured(_) => {}
        ApiCredential::Unconfigured => {
            bail!(
                "model API credential is not configured: set the {} environment variable",
                config.api_key_env
            );
        }
    }

    let client: Arc<dyn ModelClient> =
        Arc::new(CommandModelClient::new(config.model_api.command.clone()));
    let provider: Arc<dyn MarketDataProvider> =
        Arc::new(FileMarketData::new(config.market_data.data_path.clone()));
    build_runtime_with(config, client, provider)
}

/// Build a runtime around explicit transports. Used by tests and by
/// embedders that bring their own client or provider.
pub fn build_runtime_with(
    config: ErsaConfig,
    client: Arc<dyn ModelClient>,
    provider: Arc<dyn MarketDataProvider>,
) -> Result<Runtime> {
    let ledger = Arc::new(
        UsageLedger::open(&config.storage.sqlite_path)
            .with_context(|| format!("failed to open ledger DB: {}", config.storage.sqlite_path))?,
    );
    let store = Arc::new(
        MarketStore::open(&config.storage.sqlite_path).with_context(|| {
            format!("failed to open market store: {}", config.storage.sqlite_path)
        })?,
    );

    let pipeline = Arc::new(ValidationPipeline::new(
        provider,
        store,
        ledger.clone(),
        config.universe.clone(),
    ));

    let prompts = PromptLibrary::load(&config.prompts.dir)
        .with_context(|| format!("failed to load prompts from {}", config.prompts.dir))?;

    let caller = RetryableCaller::new(
        client,
        ledger.clone(),
        CostCalculator::new(config.rates.clone()),
        RetryPolicy::from_config(&config.retry),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        caller,
        pipeline.clone(),
        prompts,
        ledger.clone(),
        config.models.clone(),
        config.budget.clone(),
    ));

    Ok(Runtime {
        orchestrator,
        pipeline,
        ledger,
        config,
    })
}
