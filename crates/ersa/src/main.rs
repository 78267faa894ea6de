use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ersa::models::config::ErsaConfig;
use ersa::models::run::TriggerKind;
use ersa::pipeline::PipelineOutcome;

#[derive(Parser, Debug)]
#[command(
    name = "ersa",
    about = "ERSA - Equity Research Sequencing Agents: multi-agent research reports with cost-accounted model calls"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/ersa.toml")]
    config: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run the full research pipeline for a symbol and print the report
    Analyze {
        symbol: String,
        /// Run a deeper analysis pass
        #[arg(long)]
        deep: bool,
        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Validate a symbol and cache its market data without any model calls
    Validate { symbol: String },
    /// Run the scheduled-refresh daemon until interrupted
    Refresh,
    /// Print the per-agent daily usage aggregates
    Usage {
        /// Date to report (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read config: {}", cli.config))?;
    let config: ErsaConfig = toml::from_str(&config_str).context("failed to parse config")?;

    match cli.command {
        CliCommand::Analyze {
            symbol,
            deep,
            pretty,
        } => {
            let runtime = ersa::build_runtime(config)?;
            let trigger = if deep {
                TriggerKind::DeepDive
            } else {
                TriggerKind::UserAnalysis
            };
            let report = runtime
                .orchestrator
                .run_report(&symbol, trigger)
                .await
                .map_err(|e| anyhow::anyhow!("analysis failed: {e}"))?;

            let output = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{output}");
        }
        CliCommand::Validate { symbol } => {
            // Validation needs no model transport; wire the pipeline alone.
            let provider = std::sync::Arc::new(ersa::file_provider::FileMarketData::new(
                config.market_data.data_path.clone(),
            ));
            let ledger = std::sync::Arc::new(
                ersa::ledger::UsageLedger::open(&config.storage.sqlite_path)
                    .context("failed to open ledger DB")?,
            );
            let store = std::sync::Arc::new(
                ersa::pipeline::MarketStore::open(&config.storage.sqlite_path)
                    .context("failed to open market store")?,
            );
            let pipeline = ersa::pipeline::ValidationPipeline::new(
                provider,
                store,
                ledger,
                config.universe.clone(),
            );

            match pipeline
                .run(&symbol, TriggerKind::UserAnalysis, None)
                .await?
            {
                PipelineOutcome::Validated(bundle) => {
                    println!("{}", serde_json::to_string_pretty(&bundle.card)?);
                }
                PipelineOutcome::Rejected(rejection) => {
                    eprintln!("rejected ({}): {rejection}", rejection.kind());
                    std::process::exit(1);
                }
            }
        }
        CliCommand::Refresh => {
            let runtime = ersa::build_runtime(config)?;
            if !runtime.config.refresh.enabled {
                anyhow::bail!("refresh is disabled in config ([refresh] enabled = false)");
            }
            let daemon = runtime.refresh_daemon();
            let cancel = daemon.cancel_token();

            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received shutdown signal");
                cancel.cancel();
            });

            daemon.run().await;
        }
        CliCommand::Usage { date } => {
            let ledger = ersa::ledger::UsageLedger::open(&config.storage.sqlite_path)
                .context("failed to open ledger DB")?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let aggregates = ledger.daily_aggregates(date)?;
            println!("{}", serde_json::to_string_pretty(&aggregates)?);
        }
    }

    Ok(())
}
