use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reelhub_sync::{reconcile_collections, report_recent_markdown, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "reelhub")]
#[command(about = "ReelHub catalog acquisition and aggregation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one acquisition + aggregation pass.
    Sync,
    /// Run the pipeline on the configured cron schedule until Ctrl-C.
    Schedule,
    /// Validate sources.yaml and list its sources.
    Sources,
    /// Print a markdown digest of recent runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    /// Rebuild collection indexes from the collection files.
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .try_init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = SyncPipeline::new(config)?.run_once().await?;
            println!(
                "sync complete: run_id={} sources={} items={} real={:.1}% new={} duration_ms={}",
                summary.run_id,
                summary.sources.len(),
                summary.totals.total,
                summary.totals.real_percentage,
                summary.global.added,
                summary.duration_ms
            );
        }
        Commands::Schedule => {
            let cron = config.sync_cron.clone();
            let pipeline = Arc::new(SyncPipeline::new(config)?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                anyhow::bail!(
                    "scheduler is disabled; set REELHUB_SCHEDULER_ENABLED=1 to run `reelhub schedule`"
                );
            };
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Sources => {
            let registry = SyncPipeline::new(config)?.load_registry().await?;
            let settings = registry.settings();
            println!(
                "pipeline: min_items={} max_retries={} parallelism={} cache_ttl_secs={}",
                settings.min_items,
                settings.max_retries,
                settings.parallelism,
                settings.cache_ttl_secs
            );
            for source in registry.sources() {
                println!(
                    "{:<24} {:<14} {:?} endpoints={} min_items={} {}",
                    source.name,
                    source.category,
                    source.adapter,
                    source.endpoints.len(),
                    registry.min_items_for(source),
                    if source.enabled { "enabled" } else { "disabled" }
                );
            }
        }
        Commands::Report { runs } => {
            println!("{}", report_recent_markdown(runs, &config.reports_dir())?);
        }
        Commands::Reconcile => {
            for (name, recovered) in reconcile_collections(&config).await? {
                println!("{name}: recovered {recovered} ids");
            }
        }
    }

    Ok(())
}
