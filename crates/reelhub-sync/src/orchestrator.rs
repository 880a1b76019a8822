//! Per-source acquisition: cache reuse, retries with failover and backoff, and the
//! live → cached → synthetic fallback ladder.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reelhub_adapters::{adapter_for_kind, AdapterError, PageContext, SourceAdapter};
use reelhub_core::{AdapterKind, ContentRecord, QualityTier, RawRecord, SourceDefinition};
use reelhub_storage::{
    AttemptLog, AttemptRecord, BackoffPolicy, CacheEntry, CacheOrigin, CacheStore, HealthProbe,
    HttpFetcher, ProbeStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::normalize::Normalizer;
use crate::synthetic::SyntheticGenerator;

/// Which rung of the fallback ladder produced a source's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Served {
    /// Fresh cache, no network I/O.
    Cache,
    Live,
    /// Live result was short and the cache held strictly more items.
    CacheSizeFallback,
    /// Every attempt failed; the last real snapshot was served regardless of age.
    StaleCache,
    /// Every attempt failed; an earlier synthetic snapshot was reused.
    SyntheticCache,
    Synthetic,
    /// A persistence failure stopped this source.
    Aborted,
}

/// Immutable result of acquiring one source. Reduced into the run summary after each batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutcome {
    pub source: String,
    pub category: String,
    pub served: Served,
    pub tier: QualityTier,
    #[serde(skip)]
    pub records: Vec<ContentRecord>,
    pub item_count: usize,
    pub attempts: u32,
    pub failed_attempts: u32,
    pub endpoint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn aborted(source: &SourceDefinition, err: &anyhow::Error) -> Self {
        Self {
            source: source.name.clone(),
            category: source.category.clone(),
            served: Served::Aborted,
            tier: QualityTier::Synthetic,
            records: Vec::new(),
            item_count: 0,
            attempts: 0,
            failed_attempts: 0,
            endpoint: None,
            started_at: Utc::now(),
            duration_ms: 0,
            error: Some(format!("{err:#}")),
        }
    }

    pub fn real_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.quality_tier == QualityTier::Real)
            .count()
    }
}

#[derive(Debug, Default)]
struct LiveResult {
    records: Option<Vec<ContentRecord>>,
    attempts: u32,
    failures: u32,
    endpoint: Option<String>,
    last_error: Option<String>,
}

/// Drives every source through cache check, live attempts and fallbacks.
///
/// Fetch failures never leave this type; only cache and attempt-log write failures do.
pub struct FetchOrchestrator {
    http: Arc<HttpFetcher>,
    probe: Arc<dyn HealthProbe>,
    adapters: HashMap<AdapterKind, Arc<dyn SourceAdapter>>,
    cache: CacheStore,
    log: AttemptLog,
    backoff: BackoffPolicy,
    default_min_items: usize,
    cache_ttl_secs: u64,
    generator: SyntheticGenerator,
}

impl FetchOrchestrator {
    pub fn new(
        http: Arc<HttpFetcher>,
        cache: CacheStore,
        log: AttemptLog,
        backoff: BackoffPolicy,
        default_min_items: usize,
        cache_ttl_secs: u64,
    ) -> Self {
        let adapters = [AdapterKind::StaticHtml, AdapterKind::JsonApi, AdapterKind::Fixture]
            .into_iter()
            .map(|kind| (kind, adapter_for_kind(kind)))
            .collect();
        let probe: Arc<dyn HealthProbe> = http.clone();
        Self {
            http,
            probe,
            adapters,
            cache,
            log,
            backoff,
            default_min_items,
            cache_ttl_secs,
            generator: SyntheticGenerator,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_adapter(mut self, kind: AdapterKind, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn min_items_for(&self, source: &SourceDefinition) -> usize {
        source.min_items.unwrap_or(self.default_min_items).max(1)
    }

    pub async fn acquire(
        &self,
        source: &SourceDefinition,
        run_id: Uuid,
    ) -> anyhow::Result<SourceOutcome> {
        let span = info_span!("acquire_source", source = %source.name, category = %source.category);
        self.acquire_inner(source, run_id).instrument(span).await
    }

    async fn acquire_inner(
        &self,
        source: &SourceDefinition,
        run_id: Uuid,
    ) -> anyhow::Result<SourceOutcome> {
        let started = Instant::now();
        let started_at = Utc::now();
        let min_items = self.min_items_for(source);

        let cached = match self.cache.load(&source.name).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ignoring unreadable cache entry");
                None
            }
        };

        let finish = |served: Served,
                      tier: QualityTier,
                      records: Vec<ContentRecord>,
                      live: &LiveResult| SourceOutcome {
            source: source.name.clone(),
            category: source.category.clone(),
            served,
            tier,
            item_count: records.len(),
            records,
            attempts: live.attempts,
            failed_attempts: live.failures,
            endpoint: live.endpoint.clone(),
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            error: live.last_error.clone(),
        };

        if let Some(entry) = cached.as_ref().filter(|e| e.is_usable(Utc::now(), min_items)) {
            info!(items = entry.len(), "serving fresh cache");
            return Ok(finish(
                Served::Cache,
                QualityTier::Real,
                retag(entry.records.clone(), source),
                &LiveResult::default(),
            ));
        }

        let mut live = self.acquire_live(source, run_id, min_items).await?;

        if let Some(records) = live.records.take() {
            let larger_cache = cached
                .filter(|e| e.origin == CacheOrigin::Live && e.len() > records.len());
            if records.len() < min_items {
                if let Some(entry) = larger_cache {
                    info!(
                        live = records.len(),
                        cached = entry.len(),
                        "live result short; preferring larger cache"
                    );
                    return Ok(finish(
                        Served::CacheSizeFallback,
                        QualityTier::Real,
                        retag(entry.records, source),
                        &live,
                    ));
                }
            }

            let entry = CacheEntry::new(
                source.name.clone(),
                records,
                Utc::now(),
                self.cache_ttl_secs,
                CacheOrigin::Live,
            );
            self.cache
                .save(&entry)
                .await
                .with_context(|| format!("refreshing cache for source {}", source.name))?;
            info!(items = entry.len(), "live acquisition accepted");
            return Ok(finish(Served::Live, QualityTier::Real, entry.records, &live));
        }

        if let Some(entry) = cached.as_ref().filter(|e| e.is_last_resort()) {
            let mut records: Vec<ContentRecord> = retag(entry.records.clone(), source)
                .into_iter()
                .map(|r| {
                    if r.is_synthetic() {
                        r
                    } else {
                        r.with_tier(QualityTier::CacheFallback)
                    }
                })
                .collect();
            if records.len() < min_items {
                let top_up = self.generator.generate(
                    &source.name,
                    &source.category,
                    min_items - records.len(),
                );
                records.extend(top_up);
            }
            warn!(
                cached = entry.len(),
                served = records.len(),
                "all attempts failed; serving last real snapshot"
            );
            return Ok(finish(
                Served::StaleCache,
                QualityTier::CacheFallback,
                records,
                &live,
            ));
        }

        if let Some(entry) = cached
            .filter(|e| e.origin == CacheOrigin::Synthetic && e.len() >= min_items)
        {
            warn!("all attempts failed; reusing synthetic snapshot");
            let mut records = retag(entry.records, source);
            records.truncate(min_items);
            return Ok(finish(
                Served::SyntheticCache,
                QualityTier::Synthetic,
                records,
                &live,
            ));
        }

        let records = self
            .generator
            .generate(&source.name, &source.category, min_items);
        let entry = CacheEntry::new(
            source.name.clone(),
            records,
            Utc::now(),
            self.cache_ttl_secs,
            CacheOrigin::Synthetic,
        );
        self.cache
            .save(&entry)
            .await
            .with_context(|| format!("caching synthetic records for source {}", source.name))?;
        warn!(items = entry.len(), "all attempts failed; synthesized records");
        Ok(finish(
            Served::Synthetic,
            QualityTier::Synthetic,
            entry.records,
            &live,
        ))
    }

    async fn acquire_live(
        &self,
        source: &SourceDefinition,
        run_id: Uuid,
        min_items: usize,
    ) -> anyhow::Result<LiveResult> {
        let normalizer = Normalizer::for_source(source);
        let mut result = LiveResult::default();
        if source.endpoints.is_empty() {
            result.last_error = Some("no endpoints configured".into());
            return Ok(result);
        }

        let mut endpoint_idx = 0usize;
        let mut probed = HashSet::new();
        let max_retries = self.backoff.max_retries.max(1);

        for attempt in 1..=max_retries {
            let endpoint = &source.endpoints[endpoint_idx];
            if probed.insert(endpoint_idx) {
                self.probe_endpoint(endpoint).await;
            }

            let (records, error) = match self.fetch_pages(source, run_id, endpoint, min_items).await {
                Ok(raws) => {
                    let records = normalizer.normalize_all(raws, Utc::now());
                    let error = if records.is_empty() {
                        Some("no items".to_string())
                    } else if records.iter().all(ContentRecord::is_synthetic) {
                        Some("only placeholder items".to_string())
                    } else {
                        None
                    };
                    (records, error)
                }
                Err(err) => (Vec::new(), Some(err.to_string())),
            };

            let real_count = records.iter().filter(|r| !r.is_synthetic()).count();
            let success = error.is_none();
            self.log
                .append(&AttemptRecord {
                    timestamp: Utc::now(),
                    source: source.name.clone(),
                    attempt,
                    endpoint: endpoint.clone(),
                    success,
                    item_count: records.len(),
                    real_count,
                    fallback_count: records.len() - real_count,
                    error: error.clone(),
                })
                .await
                .with_context(|| format!("writing attempt log for source {}", source.name))?;

            result.attempts = attempt;
            result.endpoint = Some(endpoint.clone());
            if success {
                debug!(attempt, endpoint = %endpoint, items = records.len(), "attempt succeeded");
                result.records = Some(records);
                return Ok(result);
            }

            result.failures += 1;
            warn!(
                attempt,
                endpoint = %endpoint,
                error = error.as_deref().unwrap_or_default(),
                "acquisition attempt failed"
            );
            result.last_error = error;

            if attempt < max_retries {
                tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                if source.endpoints.len() > 1 {
                    endpoint_idx = (endpoint_idx + 1) % source.endpoints.len();
                }
            }
        }
        Ok(result)
    }

    async fn probe_endpoint(&self, endpoint: &str) {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return;
        }
        match self.probe.probe(endpoint).await {
            ProbeStatus::Healthy => debug!(endpoint, "endpoint healthy"),
            status => warn!(endpoint, ?status, "health probe failed; attempting anyway"),
        }
    }

    /// Bounded pagination: stop on an empty page or once `min_items` raw records are in hand.
    async fn fetch_pages(
        &self,
        source: &SourceDefinition,
        run_id: Uuid,
        endpoint: &str,
        min_items: usize,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let adapter = self.adapters.get(&source.adapter).ok_or_else(|| {
            AdapterError::Config(format!("no adapter registered for {:?}", source.adapter))
        })?;

        let mut collected = Vec::new();
        for page in 1..=source.pagination.max_pages.max(1) {
            let ctx = PageContext::new(run_id, source, endpoint, page);
            match adapter.fetch(&self.http, source, &ctx).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    collected.extend(batch);
                    if collected.len() >= min_items {
                        break;
                    }
                }
                Err(err) if page == 1 => return Err(err),
                Err(err) => {
                    warn!(page, error = %err, "pagination stopped early");
                    break;
                }
            }
        }
        Ok(collected)
    }
}

/// Cached records follow the source's current category, not the one they were cached under.
fn retag(mut records: Vec<ContentRecord>, source: &SourceDefinition) -> Vec<ContentRecord> {
    for record in &mut records {
        if record.category != source.category {
            record.category.clone_from(&source.category);
        }
    }
    records
}
