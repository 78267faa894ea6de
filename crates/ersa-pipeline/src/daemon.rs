use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ersa_models::config::RefreshConfig;
use ersa_models::run::TriggerKind;

use crate::pipeline::{PipelineOutcome, ValidationPipeline};

/// Scheduled-refresh daemon: periodically re-runs the data pipeline for the
/// configured symbols so their cached prices and fundamentals stay fresh.
///
/// Pulls are recorded with trigger kind `scheduled_refresh` and no run id.
pub struct RefreshDaemon {
    pipeline: Arc<ValidationPipeline>,
    config: RefreshConfig,
    cancel: CancellationToken,
}

impl RefreshDaemon {
    pub fn new(pipeline: Arc<ValidationPipeline>, config: RefreshConfig) -> Self {
        Self {
            pipeline,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for triggering shutdown from outside the run loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. The first cycle starts immediately.
    pub async fn run(&self) {
        let interval = std::time::Duration::from_secs(self.config.interval_secs);
        info!(
            symbols = self.config.symbols.len(),
            interval_secs = self.config.interval_secs,
            "Refresh daemon starting"
        );

        self.refresh_cycle().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Refresh daemon shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    self.refresh_cycle().await;
                }
            }
        }
    }

    async fn refresh_cycle(&self) {
        for symbol in &self.config.symbols {
            if self.cancel.is_cancelled() {
                return;
            }
            match self
                .pipeline
                .run(symbol, TriggerKind::ScheduledRefresh, None)
                .await
            {
                Ok(PipelineOutcome::Validated(bundle)) => {
                    info!(symbol = %symbol, rows = bundle.rows_stored, "Refreshed");
                }
                Ok(PipelineOutcome::Rejected(rejection)) => {
                    warn!(symbol = %symbol, gate = rejection.kind(), "Refresh symbol rejected");
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "Refresh failed");
                }
            }
        }
    }
}
