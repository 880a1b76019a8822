//! Sync pipeline orchestration: registry → batched acquisition → aggregation → stores → report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use reelhub_adapters::SourceAdapter;
use reelhub_core::{AdapterKind, CollectionStats, ContentRecord};
use reelhub_storage::{
    AttemptLog, CacheStore, HealthProbe, HttpClientConfig, HttpFetcher, IncrementalStore,
};
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod aggregate;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod synthetic;

pub use aggregate::{write_snapshot, Aggregator};
pub use normalize::Normalizer;
pub use orchestrator::{FetchOrchestrator, Served, SourceOutcome};
pub use registry::{PipelineSettings, RegistryError, SourceRegistry};
pub use report::{report_recent_markdown, CollectionReport, RunSummary, SourceReport};
pub use synthetic::SyntheticGenerator;

pub const CRATE_NAME: &str = "reelhub-sync";

/// Name of the cross-category collection.
pub const GLOBAL_COLLECTION: &str = "all";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub sources_path: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sources_path: PathBuf::from("./sources.yaml"),
            scheduler_enabled: false,
            sync_cron: "0 0 */6 * * *".to_string(),
            user_agent: "reelhub-bot/0.1".to_string(),
            http_timeout_secs: 30,
            probe_timeout_secs: 5,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("REELHUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            sources_path: std::env::var("REELHUB_SOURCES")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_path),
            scheduler_enabled: std::env::var("REELHUB_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.scheduler_enabled),
            sync_cron: std::env::var("REELHUB_SYNC_CRON").unwrap_or(defaults.sync_cron),
            user_agent: std::env::var("REELHUB_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("REELHUB_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            probe_timeout_secs: std::env::var("REELHUB_PROBE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.probe_timeout_secs),
        }
    }

    /// Everything under one data root, e.g. for tests.
    pub fn rooted(data_dir: impl Into<PathBuf>, sources_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            sources_path: sources_path.into(),
            ..Self::default()
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn collections_dir(&self) -> PathBuf {
        self.data_dir.join("collections")
    }

    pub fn category_collections_dir(&self) -> PathBuf {
        self.collections_dir().join("categories")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    http: Arc<HttpFetcher>,
    probe: Option<Arc<dyn HealthProbe>>,
    adapters: Vec<(AdapterKind, Arc<dyn SourceAdapter>)>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Ok(Self {
            config,
            http: Arc::new(http),
            probe: None,
            adapters: Vec::new(),
        })
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Replace the built-in adapter for `kind`.
    pub fn with_adapter(mut self, kind: AdapterKind, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push((kind, adapter));
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn load_registry(&self) -> Result<SourceRegistry> {
        SourceRegistry::load(&self.config.sources_path)
            .await
            .with_context(|| {
                format!("loading sources from {}", self.config.sources_path.display())
            })
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let registry = self.load_registry().await?;
        self.run_with_registry(&registry).await
    }

    pub async fn run_with_registry(&self, registry: &SourceRegistry) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let settings = registry.settings();
        let enabled: Vec<_> = registry.enabled().collect();
        info!(
            %run_id,
            sources = enabled.len(),
            parallelism = settings.parallelism,
            "sync run started"
        );

        let orchestrator = self.orchestrator(settings);
        let mut outcomes = Vec::with_capacity(enabled.len());
        for batch in enabled.chunks(settings.parallelism.max(1)) {
            let results = join_all(batch.iter().map(|s| orchestrator.acquire(s, run_id))).await;
            for (source, result) in batch.iter().zip(results) {
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => {
                        error!(
                            source = %source.name,
                            stage = "acquire",
                            error = %format!("{err:#}"),
                            "persistence failure; source aborted"
                        );
                        outcomes.push(SourceOutcome::aborted(source, &err));
                    }
                }
            }
        }

        let records: Vec<ContentRecord> = outcomes
            .iter()
            .flat_map(|o| o.records.iter().cloned())
            .collect();
        let mut aggregator = Aggregator::new(settings.min_items, settings.shuffle_seed);
        let aggregates = aggregator.aggregate(&registry.categories(), records, Utc::now());

        let snapshots_dir = self.config.snapshots_dir();
        let categories_dir = self.config.category_collections_dir();
        let mut category_reports = Vec::with_capacity(aggregates.len());
        for aggregate in &aggregates {
            write_snapshot(&snapshots_dir, aggregate)
                .await
                .inspect_err(|err| persistence_failure(&aggregate.category, "snapshot", err))?;
            let report = append_collection(&categories_dir, &aggregate.category, &aggregate.items)
                .await
                .inspect_err(|err| persistence_failure(&aggregate.category, "collection", err))?;
            category_reports.push(CollectionReport {
                stats: aggregate.stats,
                ..report
            });
        }

        let everything: Vec<ContentRecord> = aggregates
            .iter()
            .flat_map(|a| a.items.iter().cloned())
            .collect();
        let collections_dir = self.config.collections_dir();
        let mut global = append_collection(&collections_dir, GLOBAL_COLLECTION, &everything)
            .await
            .inspect_err(|err| persistence_failure(GLOBAL_COLLECTION, "collection", err))?;
        global.stats = CollectionStats::from_records(&everything);

        let summary = RunSummary::reduce(run_id, started_at, &outcomes, category_reports, global);
        let reports_dir = summary
            .write(&self.config.reports_dir())
            .await
            .inspect_err(|err| persistence_failure("report", "report", err))?;

        info!(
            %run_id,
            items = summary.totals.total,
            real_percentage = summary.totals.real_percentage,
            global_added = summary.global.added,
            reports = %reports_dir.display(),
            "sync run finished"
        );
        Ok(summary)
    }

    /// Cron job that runs the pipeline on every trigger. `None` unless enabled in config.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }
        self.build_scheduler().await.map(Some)
    }

    pub async fn build_scheduler(self: &Arc<Self>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.clone();
        let pipeline = Arc::clone(self);
        let job = Job::new_async(&cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync finished"),
                    Err(err) => warn!(error = %format!("{err:#}"), "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }

    fn orchestrator(&self, settings: &PipelineSettings) -> FetchOrchestrator {
        let mut orchestrator = FetchOrchestrator::new(
            Arc::clone(&self.http),
            CacheStore::new(self.config.cache_dir()),
            AttemptLog::new(self.config.logs_dir()),
            settings.backoff(),
            settings.min_items,
            settings.cache_ttl_secs,
        );
        if let Some(probe) = &self.probe {
            orchestrator = orchestrator.with_probe(Arc::clone(probe));
        }
        for (kind, adapter) in &self.adapters {
            orchestrator = orchestrator.with_adapter(*kind, Arc::clone(adapter));
        }
        orchestrator
    }
}

fn persistence_failure(scope: &str, stage: &str, err: &anyhow::Error) {
    error!(scope, stage, error = %format!("{err:#}"), "persistence failure; aborting run");
}

async fn append_collection(
    root: &Path,
    name: &str,
    records: &[ContentRecord],
) -> Result<CollectionReport> {
    let mut store = IncrementalStore::open(root, name).await?;
    let added = store.append(records).await?;
    Ok(CollectionReport {
        name: name.to_string(),
        stats: store.stats(),
        added,
        stored_total: store.len(),
    })
}

pub async fn run_sync_once_from_env() -> Result<RunSummary> {
    SyncPipeline::new(SyncConfig::from_env())?.run_once().await
}

/// Force an index rebuild for every collection under the data directory.
pub async fn reconcile_collections(config: &SyncConfig) -> Result<Vec<(String, usize)>> {
    let mut results = Vec::new();
    for dir in [config.collections_dir(), config.category_collections_dir()] {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err).with_context(|| format!("reading {}", dir.display())),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("reading {}", dir.display()))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.ends_with(".index.json") || file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(".json") {
                names.push(name.to_string());
            }
        }
        names.sort();
        for name in names {
            let mut store = IncrementalStore::open(&dir, &name).await?;
            let recovered = store.reconcile().await?;
            results.push((name, recovered));
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn scheduler_is_built_only_when_enabled() {
        let dir = tempdir().expect("tempdir");
        let config = SyncConfig::rooted(dir.path().join("data"), dir.path().join("sources.yaml"));
        assert!(!config.scheduler_enabled);

        let disabled = Arc::new(SyncPipeline::new(config.clone()).unwrap());
        assert!(disabled.maybe_build_scheduler().await.unwrap().is_none());

        let enabled = Arc::new(
            SyncPipeline::new(SyncConfig {
                scheduler_enabled: true,
                ..config
            })
            .unwrap(),
        );
        assert!(enabled.maybe_build_scheduler().await.unwrap().is_some());
    }
}
